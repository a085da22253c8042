//! Contract for external CCA/PLS estimators and a recovery check against a
//! constructed model.

use crate::error::CovarianceError;
use crate::model::JointCovarianceModel;
use ndarray::{Array1, Array2, ArrayView1};

/// A fitted CCA- or PLS-type estimator.
pub trait LatentEstimator {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<(), CovarianceError>;

    /// `px x k` estimated directions, strongest first.
    fn x_rotations(&self) -> &Array2<f64>;

    fn y_rotations(&self) -> &Array2<f64>;

    /// Achieved score correlations, non-increasing.
    fn corrs(&self) -> &Array1<f64>;
}

/// How well an estimator recovered the leading latent mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryReport {
    /// `1 - |cos|` between true and estimated leading X direction.
    pub dissimilarity_x: f64,
    pub dissimilarity_y: f64,
    pub leading_corr: f64,
    pub target_corr: f64,
}

impl RecoveryReport {
    pub fn corr_error(&self) -> f64 {
        (self.leading_corr - self.target_corr).abs()
    }
}

pub fn cosine_similarity(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let denom = (a.dot(&a) * b.dot(&b)).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    a.dot(&b) / denom
}

/// Sample `n` observations from `model`, fit `estimator`, and compare its
/// leading mode with the model's.
pub fn cross_check_recovery<E, R>(
    model: &JointCovarianceModel,
    estimator: &mut E,
    n: usize,
    rng: &mut R,
) -> Result<RecoveryReport, CovarianceError>
where
    E: LatentEstimator + ?Sized,
    R: rand::Rng + ?Sized,
{
    let (x, y) = model.generate_data(n, rng)?;
    estimator.fit(&x, &y)?;
    let (x_rot, y_rot, corrs) = (
        estimator.x_rotations(),
        estimator.y_rotations(),
        estimator.corrs(),
    );
    if x_rot.ncols() == 0 || y_rot.ncols() == 0 || corrs.is_empty() {
        return Err(CovarianceError::config("estimator produced no latent modes"));
    }
    let truth = &model.construction;
    let report = RecoveryReport {
        dissimilarity_x: 1.0 - cosine_similarity(truth.u_latent.column(0), x_rot.column(0)).abs(),
        dissimilarity_y: 1.0 - cosine_similarity(truth.v_latent.column(0), y_rot.column(0)).abs(),
        leading_corr: corrs[0],
        target_corr: truth.true_corrs[0],
    };
    log::debug!(
        "recovery with n = {n}: corr {:.4} vs {:.4}, dissimilarity {:.2e}/{:.2e}",
        report.leading_corr,
        report.target_corr,
        report.dissimilarity_x,
        report.dissimilarity_y
    );
    Ok(report)
}
