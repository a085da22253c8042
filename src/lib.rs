#![deny(dead_code)]
#![deny(unused_imports)]

pub mod assembly;
pub mod completion;
pub mod error;
pub mod estimator;
pub mod linalg;
pub mod model;
pub mod sampling;
pub mod schur;
pub mod search;
pub mod spectrum;
pub mod types;

pub use assembly::{
    AssembledCrossBlock, CcaAssembler, CrossBlockAssembler, PlsAssembler, assembler_for,
};
pub use completion::{
    GaussianLowVarianceCompletion, LowVarianceCompletion, add_lowvariance_subspace_component,
    add_lowvariance_subspace_components,
};
pub use error::CovarianceError;
pub use estimator::{LatentEstimator, RecoveryReport, cosine_similarity, cross_check_recovery};
pub use model::{
    GenerativeModelConfig, JointCovarianceModel, ModelConstruction, assemble_joint,
    joint_covariance, setup_model, setup_model_with_rng,
};
pub use sampling::generate_data;
pub use schur::{SchurKind, calc_schur_complement, calc_schur_complement_split, joint_min_eigenvalue};
pub use search::{
    LatentModeSearch, LatentModeSolution, OptimizationSearch, Pc1Search, RandomSearch,
    RotationTrial, SearchProblem, dominant_rotations_from_trials,
    generate_random_dominant_subspace_rotations, negative_min_eval,
};
pub use spectrum::{
    SpectrumSpec, WithinBlockCovariance, build_within_block_covariance,
    decay_exponent_for_explained_variance, explained_variance_ratios, power_law_eigenvalues,
};
pub use types::{Advisory, LatentModeAlgorithm, ModelKind, SubspaceDimension};
