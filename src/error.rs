use crate::linalg::faer_ndarray::FaerLinalgError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CovarianceError {
    /// Invalid or contradictory parameters; raised before any numerical work.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(
        "No feasible joint covariance found by the {algorithm} search after {trials} trials \
        (best minimum eigenvalue: {best_min_eval:.4e})."
    )]
    Infeasible {
        algorithm: String,
        trials: usize,
        best_min_eval: f64,
    },

    /// Well-formed request that the construction does not support.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}

impl CovarianceError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::Infeasible { .. })
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
}
