use crate::linalg::faer_ndarray::{FaerEigh, FaerLinalgError};
use faer::Side;
use ndarray::{Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};
use rand_distr::{Distribution, StandardNormal};

const ISOTROPY_REL_TOL: f64 = 1e-10;

/// Average `M` with its transpose to remove round-off asymmetry.
pub fn symmetrize<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let mut out = matrix.to_owned();
    let n = out.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (out[[i, j]] + out[[j, i]]);
            out[[i, j]] = avg;
            out[[j, i]] = avg;
        }
    }
    out
}

/// Smallest eigenvalue of a symmetric matrix.
pub fn min_eigenvalue<S: Data<Elem = f64>>(
    matrix: &ArrayBase<S, Ix2>,
) -> Result<f64, FaerLinalgError> {
    let (vals, _) = symmetrize(matrix).eigh(Side::Lower)?;
    Ok(vals.iter().copied().fold(f64::INFINITY, f64::min))
}

/// `S^{-1/2}` for a symmetric positive-definite matrix.
pub fn inverse_sqrt_spd<S: Data<Elem = f64>>(
    matrix: &ArrayBase<S, Ix2>,
) -> Result<Array2<f64>, FaerLinalgError> {
    let (vals, vecs) = symmetrize(matrix).eigh(Side::Lower)?;
    if vals.iter().any(|&v| v <= 0.0) {
        return Err(FaerLinalgError::FactorizationFailed);
    }
    let scaled = &vecs * &vals.mapv(|v| 1.0 / v.sqrt()).insert_axis(Axis(0));
    Ok(symmetrize(&scaled.dot(&vecs.t())))
}

/// True when the matrix is a scalar multiple of the identity.
pub fn is_isotropic<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> bool {
    let n = matrix.nrows();
    if n == 0 || matrix.ncols() != n {
        return false;
    }
    let lead = matrix[[0, 0]];
    let tol = ISOTROPY_REL_TOL * lead.abs().max(1.0);
    for i in 0..n {
        for j in 0..n {
            let expected = if i == j { lead } else { 0.0 };
            if (matrix[[i, j]] - expected).abs() > tol {
                return false;
            }
        }
    }
    true
}

/// Variance of the projection `u^T S u`.
#[inline]
pub fn quadratic_form<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>, u: ArrayView1<'_, f64>) -> f64 {
    u.dot(&matrix.dot(&u))
}

/// Scale each column to unit Euclidean norm. Zero columns are left untouched.
pub fn normalize_columns(matrix: &mut Array2<f64>) {
    for mut col in matrix.columns_mut() {
        let norm = col.dot(&col).sqrt();
        if norm > 0.0 {
            col /= norm;
        }
    }
}

/// `rows x cols` matrix of independent standard normal draws, filled row by row.
pub fn standard_normal_matrix<R: rand::Rng + ?Sized>(
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Array2<f64> {
    Array2::from_shape_simple_fn((rows, cols), || StandardNormal.sample(&mut *rng))
}

/// Stable descending argsort.
pub fn argsort_descending(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[j].total_cmp(&values[i]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn inverse_sqrt_of_diagonal_matrix() {
        let s = array![[4.0, 0.0], [0.0, 9.0]];
        let r = inverse_sqrt_spd(&s).expect("spd");
        assert!((r[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((r[[1, 1]] - 1.0 / 3.0).abs() < 1e-12);
        assert!(r[[0, 1]].abs() < 1e-12);
    }

    #[test]
    fn inverse_sqrt_rejects_indefinite_matrix() {
        let s = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(inverse_sqrt_spd(&s).is_err());
    }

    #[test]
    fn isotropy_detects_scaled_identity_only() {
        assert!(is_isotropic(&(Array2::<f64>::eye(3) * 2.5)));
        assert!(!is_isotropic(&Array2::from_diag(&array![2.0, 1.0])));
        assert!(!is_isotropic(&array![[1.0, 0.1], [0.1, 1.0]]));
    }

    #[test]
    fn argsort_is_stable_for_ties() {
        assert_eq!(argsort_descending(&[0.5, 1.0, 0.5, 2.0]), vec![3, 1, 0, 2]);
    }
}
