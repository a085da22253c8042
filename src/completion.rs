//! Mixing low-variance basis directions into latent directions chosen inside
//! the dominant subspace.

use crate::linalg::utils::standard_normal_matrix;
use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use rand::RngExt;

/// Extends dominant latent directions with a component from the trailing
/// `p - q` basis columns.
pub trait LowVarianceCompletion {
    /// `basis` is `p x p` with columns ordered by decreasing variance and
    /// `dominant` is `p x m`. Panics if `min_weight` is outside `[0, 1]`.
    fn complete<R: rand::Rng + ?Sized>(
        &self,
        basis: &Array2<f64>,
        dominant: &Array2<f64>,
        min_weight: f64,
        q: usize,
        rng: &mut R,
    ) -> Array2<f64>;
}

/// Each column keeps a squared weight drawn uniformly from `[min_weight, 1]`
/// on its dominant part; the remainder goes to a random unit direction in the
/// low-variance subspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianLowVarianceCompletion;

impl LowVarianceCompletion for GaussianLowVarianceCompletion {
    fn complete<R: rand::Rng + ?Sized>(
        &self,
        basis: &Array2<f64>,
        dominant: &Array2<f64>,
        min_weight: f64,
        q: usize,
        rng: &mut R,
    ) -> Array2<f64> {
        add_lowvariance_subspace_components(basis, dominant, min_weight, q, rng)
    }
}

/// Complete a single dominant direction.
pub fn add_lowvariance_subspace_component<R: rand::Rng + ?Sized>(
    basis: &Array2<f64>,
    dominant: ArrayView1<'_, f64>,
    min_weight: f64,
    q: usize,
    rng: &mut R,
) -> Array1<f64> {
    assert!(
        (0.0..=1.0).contains(&min_weight),
        "completion weight must lie in [0, 1], got {min_weight}"
    );
    let p = basis.nrows();
    assert!(q >= 1 && q <= p, "dominant subspace size {q} outside [1, {p}]");
    assert_eq!(dominant.len(), p, "dominant direction has wrong length");
    if q == p {
        return dominant.to_owned();
    }

    let weight = rng.random_range(min_weight..=1.0);
    let coefs = standard_normal_matrix(p - q, 1, rng);
    let mut low = basis.slice(s![.., q..]).dot(&coefs).index_axis_move(Axis(1), 0);
    let low_norm = low.dot(&low).sqrt();
    if low_norm > 0.0 {
        low /= low_norm;
    }
    let mut out = &dominant * weight.sqrt() + &(low * (1.0 - weight).sqrt());
    let norm = out.dot(&out).sqrt();
    if norm > 0.0 {
        out /= norm;
    }
    out
}

/// Complete every column of `dominant`; `q == p` returns it unchanged.
pub fn add_lowvariance_subspace_components<R: rand::Rng + ?Sized>(
    basis: &Array2<f64>,
    dominant: &Array2<f64>,
    min_weight: f64,
    q: usize,
    rng: &mut R,
) -> Array2<f64> {
    assert!(
        (0.0..=1.0).contains(&min_weight),
        "completion weight must lie in [0, 1], got {min_weight}"
    );
    if q == basis.nrows() {
        return dominant.clone();
    }
    let mut out = Array2::zeros(dominant.raw_dim());
    for (k, col) in dominant.columns().into_iter().enumerate() {
        let completed = add_lowvariance_subspace_component(basis, col, min_weight, q, rng);
        out.column_mut(k).assign(&completed);
    }
    out
}
