use crate::error::CovarianceError;
use crate::linalg::faer_ndarray::FaerEigh;
use crate::linalg::utils::{standard_normal_matrix, symmetrize};
use faer::Side;
use ndarray::{Array2, Axis, s};

/// Symmetric square root `R` with `R R^T = Sigma`. Negative eigenvalues from
/// round-off are clipped to zero, so singular PSD matrices are accepted.
pub fn covariance_root(sigma: &Array2<f64>) -> Result<Array2<f64>, CovarianceError> {
    let (vals, vecs) = symmetrize(sigma).eigh(Side::Lower)?;
    let scale = vals.mapv(|v| v.max(0.0).sqrt());
    Ok(&vecs * &scale.insert_axis(Axis(0)))
}

/// Draw `n` rows from `N(0, Sigma)` and split the columns after `px` into the
/// two blocks `(X, Y)`.
pub fn generate_data<R: rand::Rng + ?Sized>(
    sigma: &Array2<f64>,
    px: usize,
    n: usize,
    rng: &mut R,
) -> Result<(Array2<f64>, Array2<f64>), CovarianceError> {
    let (d, d2) = sigma.dim();
    if d != d2 {
        return Err(CovarianceError::config(format!(
            "joint covariance must be square, got {d}x{d2}"
        )));
    }
    if px == 0 || px >= d {
        return Err(CovarianceError::config(format!(
            "split index px = {px} must lie in 1..{d}"
        )));
    }
    if sigma.iter().any(|v| !v.is_finite()) {
        return Err(CovarianceError::config(
            "joint covariance contains non-finite values",
        ));
    }
    let root = covariance_root(sigma)?;
    let z = standard_normal_matrix(n, d, rng);
    let data = z.dot(&root.t());
    Ok((
        data.slice(s![.., ..px]).to_owned(),
        data.slice(s![.., px..]).to_owned(),
    ))
}
