//! Search for latent directions whose assembled joint covariance is positive
//! definite with a margin.
//!
//! Three strategies share the [`LatentModeSearch`] interface:
//! - [`Pc1Search`]: first principal components, completed toward the
//!   low-variance subspace with a weight annealed to 1.
//! - [`RandomSearch`]: random orthonormal directions inside the dominant
//!   subspace, best margin wins.
//! - [`OptimizationSearch`]: BFGS on the negative margin over unit coefficient
//!   vectors, single mode only.

mod optimize;
mod pc1;
mod random;

pub use optimize::OptimizationSearch;
pub use pc1::Pc1Search;
pub use random::RandomSearch;

use crate::assembly::{AssembledCrossBlock, CrossBlockAssembler};
use crate::error::CovarianceError;
use crate::linalg::faer_ndarray::FaerQr;
use crate::linalg::utils::{quadratic_form, standard_normal_matrix};
use crate::spectrum::WithinBlockCovariance;
use crate::types::LatentModeAlgorithm;
use ndarray::{Array1, Array2, ArrayView1, Axis, s};

/// Everything a strategy needs to propose and judge latent directions.
pub struct SearchProblem<'a> {
    pub sigma_xx: &'a WithinBlockCovariance,
    pub sigma_yy: &'a WithinBlockCovariance,
    pub assembler: &'a dyn CrossBlockAssembler,
    pub true_corrs: &'a Array1<f64>,
    pub qx: usize,
    pub qy: usize,
    /// Floor on each direction's variance relative to the mean dominant
    /// eigenvalue; also the minimum completion weight.
    pub expl_var_ratio_thr: f64,
    pub min_eval_thr: f64,
    pub max_n_sigma_trials: usize,
    pub verbose: bool,
}

impl SearchProblem<'_> {
    pub fn m(&self) -> usize {
        self.true_corrs.len()
    }

    pub fn px(&self) -> usize {
        self.sigma_xx.dim()
    }

    pub fn py(&self) -> usize {
        self.sigma_yy.dim()
    }

    pub(crate) fn trial_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    /// Assemble the cross block for full-length directions.
    pub fn assemble(
        &self,
        u: &Array2<f64>,
        v: &Array2<f64>,
    ) -> Result<AssembledCrossBlock, CovarianceError> {
        self.assembler.assemble(
            &self.sigma_xx.matrix,
            &self.sigma_yy.matrix,
            u,
            v,
            self.true_corrs,
        )
    }

    /// Map `qx x m` / `qy x m` coefficients to directions in the dominant
    /// subspaces.
    pub fn dominant_directions(
        &self,
        u_rot: &Array2<f64>,
        v_rot: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        (
            self.sigma_xx.basis.slice(s![.., ..self.qx]).dot(u_rot),
            self.sigma_yy.basis.slice(s![.., ..self.qy]).dot(v_rot),
        )
    }

    /// Every direction carries at least `expl_var_ratio_thr` times the mean
    /// variance of its block's dominant subspace.
    pub fn meets_explained_variance(&self, u: &Array2<f64>, v: &Array2<f64>) -> bool {
        let floor_x = self.expl_var_ratio_thr * self.sigma_xx.dominant_mean_variance(self.qx);
        let floor_y = self.expl_var_ratio_thr * self.sigma_yy.dominant_mean_variance(self.qy);
        let tol = 1e-12;
        u.columns()
            .into_iter()
            .all(|c| quadratic_form(&self.sigma_xx.matrix, c) >= floor_x - tol)
            && v.columns()
                .into_iter()
                .all(|c| quadratic_form(&self.sigma_yy.matrix, c) >= floor_y - tol)
    }

    pub(crate) fn solution(
        &self,
        cross: AssembledCrossBlock,
        algorithm: LatentModeAlgorithm,
        trials: usize,
    ) -> LatentModeSolution {
        LatentModeSolution {
            explained_variance_x: direction_variance_ratios(&self.sigma_xx.matrix, &cross.u),
            explained_variance_y: direction_variance_ratios(&self.sigma_yy.matrix, &cross.v),
            cross,
            algorithm,
            trials,
        }
    }
}

/// Latent directions accepted by a strategy, with the assembled cross block.
#[derive(Debug, Clone)]
pub struct LatentModeSolution {
    pub cross: AssembledCrossBlock,
    /// `u' Sxx u / tr(Sxx)` per mode.
    pub explained_variance_x: Array1<f64>,
    pub explained_variance_y: Array1<f64>,
    pub algorithm: LatentModeAlgorithm,
    /// Assemblies evaluated before acceptance.
    pub trials: usize,
}

/// One feasible candidate: its margin and the dominant-subspace coefficients.
#[derive(Debug, Clone)]
pub struct RotationTrial {
    pub score: f64,
    pub u_rot: Array2<f64>,
    pub v_rot: Array2<f64>,
}

pub trait LatentModeSearch {
    fn algorithm(&self) -> LatentModeAlgorithm;

    fn search<R: rand::Rng + ?Sized>(
        &self,
        problem: &SearchProblem<'_>,
        rng: &mut R,
    ) -> Result<LatentModeSolution, CovarianceError>;
}

/// Fraction of total block variance carried by each direction.
pub fn direction_variance_ratios(sigma: &Array2<f64>, dirs: &Array2<f64>) -> Array1<f64> {
    let total = sigma.diag().sum();
    Array1::from_iter(
        dirs.columns()
            .into_iter()
            .map(|d| quadratic_form(sigma, d) / total),
    )
}

/// Random `q x m` matrix with orthonormal columns.
pub fn generate_random_dominant_subspace_rotations<R: rand::Rng + ?Sized>(
    q: usize,
    m: usize,
    rng: &mut R,
) -> Result<Array2<f64>, CovarianceError> {
    Ok(standard_normal_matrix(q, m, rng).thin_q()?)
}

/// Negative margin of the single-mode cross block spanned by the normalized
/// coefficient vectors. Candidates with margin `>= min_eval_thr` are appended
/// to `trials`.
pub fn negative_min_eval(
    problem: &SearchProblem<'_>,
    u_rot: ArrayView1<'_, f64>,
    v_rot: ArrayView1<'_, f64>,
    min_eval_thr: f64,
    trials: &mut Vec<RotationTrial>,
) -> Result<f64, CovarianceError> {
    assert_eq!(problem.m(), 1, "margin objective is defined for one mode");
    assert!(min_eval_thr > 0.0, "margin threshold must be positive");
    assert_eq!(u_rot.len(), problem.qx, "u coefficients have wrong length");
    assert_eq!(v_rot.len(), problem.qy, "v coefficients have wrong length");

    let u_rot = unit_column(u_rot);
    let v_rot = unit_column(v_rot);
    let (u, v) = problem.dominant_directions(&u_rot, &v_rot);
    let cross = problem.assemble(&u, &v)?;
    if cross.min_eval >= min_eval_thr {
        trials.push(RotationTrial {
            score: cross.min_eval,
            u_rot,
            v_rot,
        });
    }
    Ok(-cross.min_eval)
}

fn unit_column(coefs: ArrayView1<'_, f64>) -> Array2<f64> {
    let norm = coefs.dot(&coefs).sqrt();
    let unit = if norm > 0.0 {
        coefs.mapv(|c| c / norm)
    } else {
        coefs.to_owned()
    };
    unit.insert_axis(Axis(1))
}

/// Highest-scoring trial.
pub fn dominant_rotations_from_trials(trials: &[RotationTrial]) -> Option<&RotationTrial> {
    trials.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Per-trial errors that only reject the candidate.
pub(crate) fn is_trial_rejection(err: &CovarianceError) -> bool {
    matches!(err, CovarianceError::Linalg(_))
}
