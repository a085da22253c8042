use faer::diag::DiagRef;
pub use faer::linalg::solvers::{Ldlt as FaerLdlt, Llt as FaerLlt, Solve as FaerSolve};
use faer::linalg::solvers::{self};
use faer::{MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

const SYMMETRY_REL_TOL: f64 = 1e-12;
const SYMMETRY_ABS_TOL: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Factorization failed")]
    FactorizationFailed,
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
    #[error("Matrix shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("Matrix contains non-finite entries")]
    NonFinite,
}

pub enum FaerSymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl FaerSymmetricFactor {
    #[inline]
    pub fn solve(&self, rhs: MatRef<'_, f64>) -> faer::Mat<f64> {
        match self {
            FaerSymmetricFactor::Llt(f) => f.solve(rhs),
            FaerSymmetricFactor::Ldlt(f) => f.solve(rhs),
        }
    }
}

/// Factorize a symmetric system with an LLT first attempt and LDLT fallback.
#[inline]
pub fn factorize_symmetric_with_fallback(
    matrix: MatRef<'_, f64>,
    side: Side,
) -> Result<FaerSymmetricFactor, FaerLinalgError> {
    if let Ok(llt) = FaerLlt::new(matrix, side) {
        return Ok(FaerSymmetricFactor::Llt(llt));
    }
    let ldlt = FaerLdlt::new(matrix, side).map_err(FaerLinalgError::Ldlt)?;
    Ok(FaerSymmetricFactor::Ldlt(ldlt))
}

/// Solve `A X = B` for symmetric `A` without forming the inverse.
pub fn solve_symmetric<S1, S2>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Result<Array2<f64>, FaerLinalgError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let (n, n2) = a.dim();
    if n != n2 || b.nrows() != n {
        return Err(FaerLinalgError::ShapeMismatch {
            expected: format!("square lhs with {} rows", b.nrows()),
            actual: format!("{n}x{n2}"),
        });
    }
    if !a.iter().chain(b.iter()).all(|v| v.is_finite()) {
        return Err(FaerLinalgError::NonFinite);
    }
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    let factor = factorize_symmetric_with_fallback(a_view.as_ref(), Side::Lower)?;
    let x = factor.solve(b_view.as_ref());
    let out = mat_to_array(x.as_ref());
    if !out.iter().all(|v| v.is_finite()) {
        return Err(FaerLinalgError::FactorizationFailed);
    }
    Ok(out)
}

/// Solve `A X = B` for a general square `A` with partial-pivoting LU.
pub fn solve_general<S1, S2>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Result<Array2<f64>, FaerLinalgError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let (n, n2) = a.dim();
    if n != n2 || b.nrows() != n {
        return Err(FaerLinalgError::ShapeMismatch {
            expected: format!("square lhs with {} rows", b.nrows()),
            actual: format!("{n}x{n2}"),
        });
    }
    if !a.iter().chain(b.iter()).all(|v| v.is_finite()) {
        return Err(FaerLinalgError::NonFinite);
    }
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    let lu = a_view.as_ref().partial_piv_lu();
    let out = mat_to_array(lu.solve(b_view.as_ref()).as_ref());
    if !out.iter().all(|v| v.is_finite()) {
        return Err(FaerLinalgError::FactorizationFailed);
    }
    Ok(out)
}

/// Symmetry up to `abs_tol + rel_tol * max(|a_ij|, 1)`.
pub fn is_symmetric<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> bool {
    let (nrows, ncols) = matrix.dim();
    if nrows != ncols {
        return false;
    }
    let scale = matrix.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let tol = SYMMETRY_ABS_TOL + SYMMETRY_REL_TOL * scale.max(1.0);
    for i in 0..nrows {
        for j in i + 1..ncols {
            if (matrix[[i, j]] - matrix[[j, i]]).abs() > tol {
                return false;
            }
        }
    }
    true
}

pub(crate) fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

/// Borrowed faer view over an ndarray matrix. Layouts with non-positive
/// strides are copied into a compact owned buffer first.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.as_standard_layout().into_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = match &self.owned {
            Some(owned) => {
                let strides = owned.strides();
                (
                    owned.as_ptr(),
                    owned.nrows(),
                    owned.ncols(),
                    strides[0],
                    strides[1],
                )
            }
            None => (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            ),
        };
        // SAFETY: pointer/shape/strides come either from a live ndarray view with
        // positive strides or from the owned copy held by `self`.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

/// Symmetric eigendecomposition. Eigenvalues are returned in ascending order,
/// eigenvectors as the matching columns.
pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        if !self.iter().all(|v| v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
        let sorted_values = Array1::from_iter(order.iter().map(|&i| values[i]));
        let sorted_vectors = vectors.select(ndarray::Axis(1), &order);
        Ok((sorted_values, sorted_vectors))
    }
}

/// Thin singular value decomposition `A = U diag(s) V^T` with `s` descending.
pub trait FaerSvd {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;

    fn singular_values(&self) -> Result<Array1<f64>, FaerLinalgError> {
        self.thin_svd().map(|(_, s, _)| s)
    }
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        if !self.iter().all(|v| v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let faer_view = FaerArrayView::new(self);
        let svd = faer_view
            .as_ref()
            .thin_svd()
            .map_err(|_| FaerLinalgError::SvdNoConvergence)?;
        let s = diag_to_array(svd.S());
        let u = mat_to_array(svd.U());
        let v = mat_to_array(svd.V());

        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&i, &j| s[j].total_cmp(&s[i]));
        Ok((
            u.select(ndarray::Axis(1), &order),
            Array1::from_iter(order.iter().map(|&i| s[i])),
            v.select(ndarray::Axis(1), &order),
        ))
    }
}

/// Thin QR factorization; returns the `n x min(n, k)` orthonormal factor.
pub trait FaerQr {
    fn thin_q(&self) -> Result<Array2<f64>, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerQr for ArrayBase<S, Ix2> {
    fn thin_q(&self) -> Result<Array2<f64>, FaerLinalgError> {
        if !self.iter().all(|v| v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let faer_view = FaerArrayView::new(self);
        let qr = faer_view.as_ref().qr();
        let q = mat_to_array(qr.compute_Q().as_ref());
        let k = self.nrows().min(self.ncols());
        Ok(q.slice(ndarray::s![.., ..k]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn eigh_sorts_ascending_and_reconstructs() {
        let a = array![[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 1.0]];
        let (vals, vecs) = a.eigh(Side::Lower).expect("eigh should succeed");
        for w in vals.windows(2) {
            assert!(w[0] <= w[1]);
        }
        let rec = vecs.dot(&Array2::from_diag(&vals)).dot(&vecs.t());
        let err = (&rec - &a).iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
        assert!(err < 1e-10, "reconstruction error {err:e}");
    }

    #[test]
    fn thin_svd_returns_descending_values() {
        let a = array![[0.25, 0.0, 0.0], [0.0, 0.5, 0.0]];
        let (u, s, v) = a.thin_svd().expect("svd should succeed");
        assert_eq!(s.len(), 2);
        assert!((s[0] - 0.5).abs() < 1e-12);
        assert!((s[1] - 0.25).abs() < 1e-12);
        let rec = u.dot(&Array2::from_diag(&s)).dot(&v.t());
        let err = (&rec - &a).iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
        assert!(err < 1e-12);
    }

    #[test]
    fn thin_q_has_orthonormal_columns() {
        let a = array![[1.0, 2.0], [0.5, -1.0], [3.0, 0.25], [0.0, 1.0]];
        let q = a.thin_q().expect("qr should succeed");
        assert_eq!(q.dim(), (4, 2));
        let gram = q.t().dot(&q);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn solve_general_handles_non_symmetric_lhs() {
        let a = array![[2.0, 1.0], [0.0, 2.0]];
        let b = Array2::<f64>::eye(2);
        let x = solve_general(&a, &b).expect("lu should succeed");
        let expected = array![[0.5, -0.25], [0.0, 0.5]];
        for (got, want) in x.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12);
        }
        assert!(!is_symmetric(&a));
        assert!(is_symmetric(&a.dot(&a.t())));
    }

    #[test]
    fn solve_symmetric_rejects_non_finite_input() {
        let a = array![[1.0, f64::NAN], [f64::NAN, 2.0]];
        let b = Array2::<f64>::eye(2);
        assert!(matches!(
            solve_symmetric(&a, &b),
            Err(FaerLinalgError::NonFinite)
        ));
    }
}
