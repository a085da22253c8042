//! Cross-block covariance assembly for the CCA and PLS parameterizations.

use crate::error::CovarianceError;
use crate::linalg::faer_ndarray::FaerSvd;
use crate::linalg::utils::{argsort_descending, inverse_sqrt_spd, is_isotropic, quadratic_form};
use crate::schur::joint_min_eigenvalue;
use crate::types::ModelKind;
use ndarray::{Array1, Array2, Axis};

/// Result of assembling `Sigmaxy` from latent directions and target strengths.
#[derive(Debug, Clone)]
pub struct AssembledCrossBlock {
    pub sigma_xy: Array2<f64>,
    /// All `min(px, py)` singular values of the cross block; canonical
    /// correlations for CCA, plain singular values for PLS. Non-increasing.
    pub singular_values: Array1<f64>,
    /// Latent directions for X, reordered to match `associations`.
    pub u: Array2<f64>,
    pub v: Array2<f64>,
    /// Smallest eigenvalue of the Schur complement of the joint matrix.
    pub min_eval: f64,
    pub true_corrs: Array1<f64>,
    /// Per-mode covariance (PLS) or correlation (CCA), non-increasing.
    pub associations: Array1<f64>,
}

/// Maps latent directions and target correlations to a cross-block covariance.
pub trait CrossBlockAssembler {
    fn kind(&self) -> ModelKind;

    fn assemble(
        &self,
        sigma_xx: &Array2<f64>,
        sigma_yy: &Array2<f64>,
        u: &Array2<f64>,
        v: &Array2<f64>,
        true_corrs: &Array1<f64>,
    ) -> Result<AssembledCrossBlock, CovarianceError>;
}

/// Assembler matching a model kind.
pub fn assembler_for(kind: ModelKind) -> Box<dyn CrossBlockAssembler> {
    match kind {
        ModelKind::Cca => Box::new(CcaAssembler),
        ModelKind::Pls => Box::new(PlsAssembler),
    }
}

fn check_shapes(
    sigma_xx: &Array2<f64>,
    sigma_yy: &Array2<f64>,
    u: &Array2<f64>,
    v: &Array2<f64>,
    true_corrs: &Array1<f64>,
) -> Result<usize, CovarianceError> {
    let m = true_corrs.len();
    if m == 0 {
        return Err(CovarianceError::config("at least one latent mode is required"));
    }
    if u.dim() != (sigma_xx.nrows(), m) || v.dim() != (sigma_yy.nrows(), m) {
        return Err(CovarianceError::config(format!(
            "latent directions have shapes {:?} and {:?}, expected ({}, {m}) and ({}, {m})",
            u.dim(),
            v.dim(),
            sigma_xx.nrows(),
            sigma_yy.nrows()
        )));
    }
    Ok(m)
}

/// Reorder modes by decreasing association.
fn order_modes(
    associations: &Array1<f64>,
    u: &Array2<f64>,
    v: &Array2<f64>,
    true_corrs: &Array1<f64>,
) -> (Array1<f64>, Array2<f64>, Array2<f64>, Array1<f64>) {
    let order = argsort_descending(&associations.to_vec());
    (
        associations.select(Axis(0), &order),
        u.select(Axis(1), &order),
        v.select(Axis(1), &order),
        true_corrs.select(Axis(0), &order),
    )
}

fn block_variances(sigma: &Array2<f64>, dirs: &Array2<f64>) -> Array1<f64> {
    Array1::from_iter(dirs.columns().into_iter().map(|d| quadratic_form(sigma, d)))
}

/// `Sigmaxy = sum_i s_i u_i v_i^T` with `s_i = r_i sqrt(var_x,i var_y,i)`, the
/// covariance of two latent scores with correlation `r_i`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlsAssembler;

impl CrossBlockAssembler for PlsAssembler {
    fn kind(&self) -> ModelKind {
        ModelKind::Pls
    }

    fn assemble(
        &self,
        sigma_xx: &Array2<f64>,
        sigma_yy: &Array2<f64>,
        u: &Array2<f64>,
        v: &Array2<f64>,
        true_corrs: &Array1<f64>,
    ) -> Result<AssembledCrossBlock, CovarianceError> {
        check_shapes(sigma_xx, sigma_yy, u, v, true_corrs)?;
        let var_x = block_variances(sigma_xx, u);
        let var_y = block_variances(sigma_yy, v);
        let covs = Array1::from_shape_fn(true_corrs.len(), |i| {
            true_corrs[i] * (var_x[i] * var_y[i]).sqrt()
        });
        let (associations, u, v, true_corrs) = order_modes(&covs, u, v, true_corrs);

        let scaled_u = &u * &associations.view().insert_axis(Axis(0));
        let sigma_xy = scaled_u.dot(&v.t());
        let singular_values = sigma_xy.singular_values()?;
        let min_eval = joint_min_eigenvalue(sigma_xx.view(), sigma_xy.view(), sigma_yy.view())?;

        Ok(AssembledCrossBlock {
            sigma_xy,
            singular_values,
            u,
            v,
            min_eval,
            true_corrs,
            associations,
        })
    }
}

/// `Sigmaxy = Sxx U~ diag(r) V~^T Syy` where `U~` scales each direction to
/// unit latent variance, so a single mode has canonical correlation exactly
/// `r`. Several modes are only supported for isotropic block covariances.
#[derive(Debug, Clone, Copy, Default)]
pub struct CcaAssembler;

impl CrossBlockAssembler for CcaAssembler {
    fn kind(&self) -> ModelKind {
        ModelKind::Cca
    }

    fn assemble(
        &self,
        sigma_xx: &Array2<f64>,
        sigma_yy: &Array2<f64>,
        u: &Array2<f64>,
        v: &Array2<f64>,
        true_corrs: &Array1<f64>,
    ) -> Result<AssembledCrossBlock, CovarianceError> {
        let m = check_shapes(sigma_xx, sigma_yy, u, v, true_corrs)?;
        if m > 1 && !(is_isotropic(sigma_xx) && is_isotropic(sigma_yy)) {
            return Err(CovarianceError::NotImplemented(format!(
                "CCA cross block with {m} modes requires isotropic within-block covariances"
            )));
        }
        let (associations, u, v, true_corrs) = order_modes(true_corrs, u, v, true_corrs);

        let var_x = block_variances(sigma_xx, &u);
        let var_y = block_variances(sigma_yy, &v);
        if var_x.iter().chain(var_y.iter()).any(|&s| s <= 0.0) {
            return Err(CovarianceError::config(
                "latent directions must have positive within-block variance",
            ));
        }
        let u_tilde = &u / &var_x.mapv(f64::sqrt).insert_axis(Axis(0));
        let v_tilde = &v / &var_y.mapv(f64::sqrt).insert_axis(Axis(0));
        let weighted = &u_tilde * &associations.view().insert_axis(Axis(0));
        let sigma_xy = sigma_xx.dot(&weighted).dot(&v_tilde.t()).dot(sigma_yy);

        let whitened = inverse_sqrt_spd(sigma_xx)?
            .dot(&sigma_xy)
            .dot(&inverse_sqrt_spd(sigma_yy)?);
        let singular_values = whitened.singular_values()?;
        let min_eval = joint_min_eigenvalue(sigma_xx.view(), sigma_xy.view(), sigma_yy.view())?;

        Ok(AssembledCrossBlock {
            sigma_xy,
            singular_values,
            u,
            v,
            min_eval,
            true_corrs,
            associations,
        })
    }
}
