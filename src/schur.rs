//! Schur complements of 2x2 block matrices and the feasibility margin built on
//! them.
//!
//! For `M = [[A, B], [C, D]]` with `D` positive definite, `M` is positive
//! semi-definite exactly when `A - B D^-1 C` is, so the smallest eigenvalue of
//! that complement is the margin every candidate covariance is judged by.

use crate::error::CovarianceError;
use crate::linalg::faer_ndarray::{is_symmetric, solve_general, solve_symmetric};
use crate::linalg::utils::{min_eigenvalue, symmetrize};
use ndarray::{Array2, ArrayView2, s};
use std::fmt;
use std::str::FromStr;

/// Which diagonal block the complement is taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchurKind {
    /// `A - B D^-1 C`
    A,
    /// `D - C A^-1 B`
    D,
}

impl FromStr for SchurKind {
    type Err = CovarianceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(SchurKind::A),
            "D" => Ok(SchurKind::D),
            other => Err(CovarianceError::config(format!(
                "Schur complement kind must be 'A' or 'D', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SchurKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchurKind::A => f.write_str("A"),
            SchurKind::D => f.write_str("D"),
        }
    }
}

fn shape_error(what: &str, expected: (usize, usize), actual: (usize, usize)) -> CovarianceError {
    CovarianceError::config(format!(
        "block {what} has shape {}x{}, expected {}x{}",
        actual.0, actual.1, expected.0, expected.1
    ))
}

/// Inverse of the pivot block applied to `rhs`. Symmetric pivots (every
/// covariance block) go through LLT/LDLT, anything else through LU.
fn solve_pivot(
    pivot: ArrayView2<'_, f64>,
    rhs: ArrayView2<'_, f64>,
) -> Result<Array2<f64>, CovarianceError> {
    let x = if is_symmetric(&pivot) {
        solve_symmetric(&pivot, &rhs)?
    } else {
        solve_general(&pivot, &rhs)?
    };
    Ok(x)
}

/// Schur complement from four explicit blocks.
pub fn calc_schur_complement(
    a: ArrayView2<'_, f64>,
    b: ArrayView2<'_, f64>,
    c: ArrayView2<'_, f64>,
    d: ArrayView2<'_, f64>,
    kind: SchurKind,
) -> Result<Array2<f64>, CovarianceError> {
    let (na, na2) = a.dim();
    let (nd, nd2) = d.dim();
    if na != na2 {
        return Err(shape_error("A", (na, na), a.dim()));
    }
    if nd != nd2 {
        return Err(shape_error("D", (nd, nd), d.dim()));
    }
    if b.dim() != (na, nd) {
        return Err(shape_error("B", (na, nd), b.dim()));
    }
    if c.dim() != (nd, na) {
        return Err(shape_error("C", (nd, na), c.dim()));
    }

    let complement = match kind {
        SchurKind::A => {
            let d_inv_c = solve_pivot(d, c)?;
            &a - &b.dot(&d_inv_c)
        }
        SchurKind::D => {
            let a_inv_b = solve_pivot(a, b)?;
            &d - &c.dot(&a_inv_b)
        }
    };
    Ok(complement)
}

/// Schur complement of a square matrix partitioned after row/column `split`.
pub fn calc_schur_complement_split(
    matrix: ArrayView2<'_, f64>,
    split: usize,
    kind: SchurKind,
) -> Result<Array2<f64>, CovarianceError> {
    let (n, n2) = matrix.dim();
    if n != n2 {
        return Err(shape_error("M", (n, n), (n, n2)));
    }
    if split == 0 || split >= n {
        return Err(CovarianceError::config(format!(
            "split index must lie in 1..{n}, got {split}"
        )));
    }
    calc_schur_complement(
        matrix.slice(s![..split, ..split]),
        matrix.slice(s![..split, split..]),
        matrix.slice(s![split.., ..split]),
        matrix.slice(s![split.., split..]),
        kind,
    )
}

/// Smallest eigenvalue of `Sxx - Sxy Syy^-1 Syx`.
pub fn joint_min_eigenvalue(
    sigma_xx: ArrayView2<'_, f64>,
    sigma_xy: ArrayView2<'_, f64>,
    sigma_yy: ArrayView2<'_, f64>,
) -> Result<f64, CovarianceError> {
    let complement = calc_schur_complement(
        sigma_xx,
        sigma_xy,
        sigma_xy.t(),
        sigma_yy,
        SchurKind::A,
    )?;
    Ok(min_eigenvalue(&symmetrize(&complement))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn spd_4x4() -> Array2<f64> {
        array![
            [4.0, 1.0, 0.5, 0.2],
            [1.0, 3.0, 0.3, 0.1],
            [0.5, 0.3, 2.0, 0.4],
            [0.2, 0.1, 0.4, 1.5],
        ]
    }

    #[test]
    fn a_kind_matches_explicit_formula() {
        let a = array![[2.0, 0.5], [0.5, 1.0]];
        let b = array![[0.3, 0.1], [0.2, 0.4]];
        let d = array![[2.0, 0.0], [0.0, 4.0]];
        let got = calc_schur_complement(a.view(), b.view(), b.t(), d.view(), SchurKind::A)
            .unwrap();
        let d_inv = array![[0.5, 0.0], [0.0, 0.25]];
        let expected = &a - &b.dot(&d_inv).dot(&b.t());
        for (g, e) in got.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*g, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn non_symmetric_pivot_uses_full_inverse() {
        let a = Array2::<f64>::eye(2) * 3.0;
        let eye = Array2::<f64>::eye(2);
        let d = array![[2.0, 1.0], [0.0, 2.0]];
        let got = calc_schur_complement(a.view(), eye.view(), eye.view(), d.view(), SchurKind::A)
            .unwrap();
        let expected = array![[2.5, 0.25], [0.0, 2.5]];
        for (g, e) in got.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*g, *e, epsilon = 1e-12);
        }

        let flipped =
            calc_schur_complement(d.view(), eye.view(), eye.view(), a.view(), SchurKind::D)
                .unwrap();
        for (g, e) in flipped.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*g, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn split_form_agrees_with_block_form() {
        let m = spd_4x4();
        for kind in [SchurKind::A, SchurKind::D] {
            let split = calc_schur_complement_split(m.view(), 2, kind).unwrap();
            let blocks = calc_schur_complement(
                m.slice(s![..2, ..2]),
                m.slice(s![..2, 2..]),
                m.slice(s![2.., ..2]),
                m.slice(s![2.., 2..]),
                kind,
            )
            .unwrap();
            assert_eq!(split, blocks);
        }
    }

    #[test]
    fn bad_kind_and_split_are_config_errors() {
        assert!("B".parse::<SchurKind>().unwrap_err().is_config());
        assert_eq!("D".parse::<SchurKind>().unwrap(), SchurKind::D);
        let m = spd_4x4();
        assert!(calc_schur_complement_split(m.view(), 0, SchurKind::A)
            .unwrap_err()
            .is_config());
        assert!(calc_schur_complement_split(m.view(), 4, SchurKind::A)
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn margin_is_negative_for_overstrong_coupling() {
        let eye = Array2::<f64>::eye(2);
        let weak = Array2::from_diag(&array![0.5, 0.0]);
        let strong = Array2::from_diag(&array![1.5, 0.0]);
        let ok = joint_min_eigenvalue(eye.view(), weak.view(), eye.view()).unwrap();
        let bad = joint_min_eigenvalue(eye.view(), strong.view(), eye.view()).unwrap();
        assert_abs_diff_eq!(ok, 0.75, epsilon = 1e-12);
        assert!(bad < 0.0);
    }
}
