//! Within-block covariance matrices with power-law eigenvalue decay.
//!
//! Eigenvalues follow `lambda_i = c1 * i^a` for `i = 1..p`, so the leading
//! eigenvalue equals `c1` and `a <= 0` controls how fast variance decays.

use crate::error::CovarianceError;
use crate::linalg::faer_ndarray::FaerQr;
use crate::linalg::utils::{argsort_descending, standard_normal_matrix, symmetrize};
use ndarray::{Array1, Array2, Axis};

const MAX_BISECTION_STEPS: usize = 200;
const MIN_DECAY_EXPONENT: f64 = -1.0e3;

/// Input to [`build_within_block_covariance`].
#[derive(Debug, Clone, Copy)]
pub struct SpectrumSpec<'a> {
    pub dim: usize,
    pub decay: f64,
    /// Leading eigenvalue; `None` means 1.
    pub leading: Option<f64>,
    /// Explicit eigenvalues overriding the power law.
    pub explicit: Option<&'a [f64]>,
}

/// A symmetric positive-definite block covariance together with its
/// eigenbasis ordered by decreasing variance.
#[derive(Debug, Clone)]
pub struct WithinBlockCovariance {
    pub matrix: Array2<f64>,
    /// Eigenvalues, non-increasing.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns, matching `eigenvalues`.
    pub basis: Array2<f64>,
}

impl WithinBlockCovariance {
    pub fn dim(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn trace(&self) -> f64 {
        self.eigenvalues.sum()
    }

    /// Mean variance of the leading `q` principal directions.
    pub fn dominant_mean_variance(&self, q: usize) -> f64 {
        let q = q.clamp(1, self.dim());
        self.eigenvalues.iter().take(q).sum::<f64>() / q as f64
    }

    /// Apply a uniformly random orthogonal change of basis. The spectrum is
    /// unchanged; the principal directions stop being coordinate axes.
    pub fn rotated<R: rand::Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<WithinBlockCovariance, CovarianceError> {
        let p = self.dim();
        let q = standard_normal_matrix(p, p, rng).thin_q()?;
        let basis = q.dot(&self.basis);
        let scaled = &basis * &self.eigenvalues.view().insert_axis(Axis(0));
        Ok(WithinBlockCovariance {
            matrix: symmetrize(&scaled.dot(&basis.t())),
            eigenvalues: self.eigenvalues.clone(),
            basis,
        })
    }
}

/// `c1 * i^a` for `i = 1..p`.
pub fn power_law_eigenvalues(
    p: usize,
    decay: f64,
    leading: f64,
) -> Result<Array1<f64>, CovarianceError> {
    if p == 0 {
        return Err(CovarianceError::config("block dimension must be positive"));
    }
    if !decay.is_finite() || decay > 0.0 {
        return Err(CovarianceError::config(format!(
            "variance decay exponent must be finite and <= 0, got {decay}"
        )));
    }
    if !leading.is_finite() || leading <= 0.0 {
        return Err(CovarianceError::config(format!(
            "leading eigenvalue must be finite and positive, got {leading}"
        )));
    }
    Ok(Array1::from_shape_fn(p, |i| leading * ((i + 1) as f64).powf(decay)))
}

/// Diagonal block covariance with either a power-law or an explicit spectrum.
pub fn build_within_block_covariance(
    spec: &SpectrumSpec<'_>,
) -> Result<WithinBlockCovariance, CovarianceError> {
    let p = spec.dim;
    let diagonal = match spec.explicit {
        Some(values) => {
            if spec.leading.is_some() {
                return Err(CovarianceError::config(
                    "an explicit eigenvalue list and a leading eigenvalue cannot both be given",
                ));
            }
            if values.len() != p {
                return Err(CovarianceError::config(format!(
                    "explicit eigenvalue list has length {} but the block has dimension {p}",
                    values.len()
                )));
            }
            if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v <= 0.0) {
                return Err(CovarianceError::config(format!(
                    "explicit eigenvalues must be finite and positive, found {bad}"
                )));
            }
            Array1::from(values.to_vec())
        }
        None => power_law_eigenvalues(p, spec.decay, spec.leading.unwrap_or(1.0))?,
    };

    let order = argsort_descending(&diagonal.to_vec());
    let eigenvalues = Array1::from_iter(order.iter().map(|&i| diagonal[i]));
    let basis = Array2::<f64>::eye(p).select(Axis(1), &order);
    Ok(WithinBlockCovariance {
        matrix: Array2::from_diag(&diagonal),
        eigenvalues,
        basis,
    })
}

/// Fraction of total variance carried by each principal component.
pub fn explained_variance_ratios(eigenvalues: &Array1<f64>) -> Array1<f64> {
    let total = eigenvalues.sum();
    if total <= 0.0 {
        return Array1::zeros(eigenvalues.len());
    }
    eigenvalues / total
}

fn leading_ratio(p: usize, decay: f64) -> f64 {
    let total: f64 = (1..=p).map(|i| (i as f64).powf(decay)).sum();
    1.0 / total
}

/// Decay exponent `a <= 0` for which the first principal component of a
/// `p`-dimensional power-law spectrum explains `ratio` of the total variance.
pub fn decay_exponent_for_explained_variance(
    p: usize,
    ratio: f64,
) -> Result<f64, CovarianceError> {
    if p == 0 {
        return Err(CovarianceError::config("block dimension must be positive"));
    }
    let flat = 1.0 / p as f64;
    if !ratio.is_finite() || ratio < flat || ratio >= 1.0 {
        return Err(CovarianceError::config(format!(
            "first-component explained variance ratio must lie in [{flat}, 1) for dimension {p}, got {ratio}"
        )));
    }
    if p == 1 || (ratio - flat).abs() <= f64::EPSILON {
        return Ok(0.0);
    }

    let mut hi = 0.0;
    let mut lo = -1.0;
    while leading_ratio(p, lo) < ratio {
        hi = lo;
        lo *= 2.0;
        if lo < MIN_DECAY_EXPONENT {
            return Err(CovarianceError::config(format!(
                "explained variance ratio {ratio} needs a decay steeper than {MIN_DECAY_EXPONENT}"
            )));
        }
    }
    for _ in 0..MAX_BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if leading_ratio(p, mid) < ratio {
            hi = mid;
        } else {
            lo = mid;
        }
        if (hi - lo).abs() < 1e-13 {
            break;
        }
    }
    Ok(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn flat_spectrum_is_identity() {
        let cov = build_within_block_covariance(&SpectrumSpec {
            dim: 4,
            decay: 0.0,
            leading: None,
            explicit: None,
        })
        .unwrap();
        assert_eq!(cov.matrix, Array2::<f64>::eye(4));
        assert_abs_diff_eq!(cov.trace(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn power_law_is_strictly_decreasing() {
        let eig = power_law_eigenvalues(5, -1.0, 2.0).unwrap();
        assert_abs_diff_eq!(eig[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig[4], 0.4, epsilon = 1e-12);
        for w in eig.windows(2) {
            assert!(w[0] > w[1]);
        }
    }

    #[test]
    fn rejects_positive_decay_and_bad_leading() {
        assert!(power_law_eigenvalues(3, 0.2, 1.0).unwrap_err().is_config());
        assert!(power_law_eigenvalues(3, -1.0, 0.0).unwrap_err().is_config());
    }

    #[test]
    fn explicit_spectrum_overrides_power_law() {
        let values = [1.0, 3.0, 2.0];
        let cov = build_within_block_covariance(&SpectrumSpec {
            dim: 3,
            decay: -1.0,
            leading: None,
            explicit: Some(&values),
        })
        .unwrap();
        assert_eq!(cov.eigenvalues.to_vec(), vec![3.0, 2.0, 1.0]);
        assert_abs_diff_eq!(cov.basis[[1, 0]], 1.0, epsilon = 0.0);
        assert_abs_diff_eq!(cov.matrix[[0, 0]], 1.0, epsilon = 0.0);
    }

    #[test]
    fn explicit_spectrum_length_and_conflicts_are_config_errors() {
        let values = [1.0, 2.0];
        let short = build_within_block_covariance(&SpectrumSpec {
            dim: 3,
            decay: 0.0,
            leading: None,
            explicit: Some(&values),
        });
        assert!(short.unwrap_err().is_config());

        let both = build_within_block_covariance(&SpectrumSpec {
            dim: 2,
            decay: 0.0,
            leading: Some(1.0),
            explicit: Some(&values),
        });
        assert!(both.unwrap_err().is_config());
    }

    #[test]
    fn decay_exponent_matches_requested_ratio() {
        for &(p, ratio) in &[(4usize, 0.5), (16, 0.3), (32, 0.9)] {
            let a = decay_exponent_for_explained_variance(p, ratio).unwrap();
            assert!(a <= 0.0);
            let eig = power_law_eigenvalues(p, a, 1.0).unwrap();
            assert_abs_diff_eq!(explained_variance_ratios(&eig)[0], ratio, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(
            decay_exponent_for_explained_variance(4, 0.25).unwrap(),
            0.0,
            epsilon = 1e-12
        );
        assert!(decay_exponent_for_explained_variance(4, 0.1).unwrap_err().is_config());
        assert!(decay_exponent_for_explained_variance(4, 1.0).unwrap_err().is_config());
    }

    #[test]
    fn rotation_preserves_spectrum() {
        let cov = build_within_block_covariance(&SpectrumSpec {
            dim: 4,
            decay: -1.0,
            leading: None,
            explicit: None,
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let rotated = cov.rotated(&mut rng).unwrap();
        for k in 0..4 {
            let u = rotated.basis.column(k);
            let su = rotated.matrix.dot(&u);
            for i in 0..4 {
                assert_abs_diff_eq!(su[i], rotated.eigenvalues[k] * u[i], epsilon = 1e-10);
            }
        }
    }
}
