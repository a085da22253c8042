#![allow(dead_code)]

use gemcov::error::CovarianceError;
use gemcov::estimator::LatentEstimator;
use gemcov::linalg::faer_ndarray::FaerSvd;
use gemcov::linalg::utils::{inverse_sqrt_spd, normalize_columns, quadratic_form};
use ndarray::{Array1, Array2, Axis, s};

fn centered(data: &Array2<f64>) -> Array2<f64> {
    let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(data.ncols()));
    data - &mean.insert_axis(Axis(0))
}

struct SampleCovariances {
    xx: Array2<f64>,
    yy: Array2<f64>,
    xy: Array2<f64>,
}

fn sample_covariances(x: &Array2<f64>, y: &Array2<f64>) -> SampleCovariances {
    let xc = centered(x);
    let yc = centered(y);
    let denom = (x.nrows().max(2) - 1) as f64;
    SampleCovariances {
        xx: xc.t().dot(&xc) / denom,
        yy: yc.t().dot(&yc) / denom,
        xy: xc.t().dot(&yc) / denom,
    }
}

/// Canonical correlation analysis through the SVD of the whitened cross
/// covariance.
#[derive(Default)]
pub struct SvdCca {
    pub n_components: usize,
    x_rotations: Array2<f64>,
    y_rotations: Array2<f64>,
    corrs: Array1<f64>,
}

impl SvdCca {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            ..Self::default()
        }
    }
}

impl LatentEstimator for SvdCca {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<(), CovarianceError> {
        let cov = sample_covariances(x, y);
        let wx = inverse_sqrt_spd(&cov.xx)?;
        let wy = inverse_sqrt_spd(&cov.yy)?;
        let (p, rho, q) = wx.dot(&cov.xy).dot(&wy).thin_svd()?;
        let k = self.n_components.min(rho.len());
        let mut xr = wx.dot(&p.slice(s![.., ..k]));
        let mut yr = wy.dot(&q.slice(s![.., ..k]));
        normalize_columns(&mut xr);
        normalize_columns(&mut yr);
        self.x_rotations = xr;
        self.y_rotations = yr;
        self.corrs = rho.slice(s![..k]).to_owned();
        Ok(())
    }

    fn x_rotations(&self) -> &Array2<f64> {
        &self.x_rotations
    }

    fn y_rotations(&self) -> &Array2<f64> {
        &self.y_rotations
    }

    fn corrs(&self) -> &Array1<f64> {
        &self.corrs
    }
}

/// Partial least squares (SVD of the cross covariance); `corrs` are the
/// correlations between the paired scores.
#[derive(Default)]
pub struct SvdPls {
    pub n_components: usize,
    x_rotations: Array2<f64>,
    y_rotations: Array2<f64>,
    corrs: Array1<f64>,
}

impl SvdPls {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            ..Self::default()
        }
    }
}

impl LatentEstimator for SvdPls {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<(), CovarianceError> {
        let cov = sample_covariances(x, y);
        let (p, sv, q) = cov.xy.thin_svd()?;
        let k = self.n_components.min(sv.len());
        let xr = p.slice(s![.., ..k]).to_owned();
        let yr = q.slice(s![.., ..k]).to_owned();
        self.corrs = Array1::from_shape_fn(k, |i| {
            let var = quadratic_form(&cov.xx, xr.column(i)) * quadratic_form(&cov.yy, yr.column(i));
            sv[i] / var.sqrt()
        });
        self.x_rotations = xr;
        self.y_rotations = yr;
        Ok(())
    }

    fn x_rotations(&self) -> &Array2<f64> {
        &self.x_rotations
    }

    fn y_rotations(&self) -> &Array2<f64> {
        &self.y_rotations
    }

    fn corrs(&self) -> &Array1<f64> {
        &self.corrs
    }
}

/// Estimator matching a model kind.
pub fn estimator_for(kind: gemcov::ModelKind) -> Box<dyn LatentEstimator> {
    match kind {
        gemcov::ModelKind::Cca => Box::new(SvdCca::new(1)),
        gemcov::ModelKind::Pls => Box::new(SvdPls::new(1)),
    }
}
