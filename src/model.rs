//! End-to-end construction of a joint covariance matrix and the model object
//! wrapping it.

use crate::assembly::assembler_for;
use crate::error::CovarianceError;
use crate::linalg::faer_ndarray::FaerSvd;
use crate::linalg::utils::{inverse_sqrt_spd, min_eigenvalue, normalize_columns, quadratic_form};
use crate::sampling;
use crate::schur::joint_min_eigenvalue;
use crate::search::{
    LatentModeSearch, LatentModeSolution, OptimizationSearch, Pc1Search, RandomSearch,
    SearchProblem, direction_variance_ratios,
};
use crate::spectrum::{
    SpectrumSpec, WithinBlockCovariance, build_within_block_covariance,
    decay_exponent_for_explained_variance,
};
use crate::types::{Advisory, LatentModeAlgorithm, ModelKind, SubspaceDimension};
use ndarray::{Array1, Array2, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Parameters of a generative joint covariance model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerativeModelConfig {
    pub model: ModelKind,
    pub px: usize,
    pub py: usize,
    pub qx: SubspaceDimension,
    pub qy: SubspaceDimension,
    /// Number of latent modes.
    pub m: usize,
    /// Leading within-block eigenvalue; only PLS may change it from 1.
    pub c1x: Option<f64>,
    pub c1y: Option<f64>,
    /// Within-block variance decay exponents, `<= 0`.
    pub ax: f64,
    pub ay: f64,
    /// Decay of mode strength across modes, `<= 0`.
    pub a_between: f64,
    /// Strength of the first mode.
    pub r_between: f64,
    pub max_n_sigma_trials: usize,
    pub expl_var_ratio_thr: f64,
    pub min_eval_thr: f64,
    /// Explicit within-block eigenvalues.
    pub cx: Option<Vec<f64>>,
    pub cy: Option<Vec<f64>>,
    /// Target explained-variance ratio of the first principal component; picks
    /// the decay exponent in place of `ax`/`ay`.
    pub pc1_expl_var_ratio_x: Option<f64>,
    pub pc1_expl_var_ratio_y: Option<f64>,
    pub rotate_within_block: bool,
    pub seed: u64,
    pub search_order: Vec<LatentModeAlgorithm>,
    pub verbose: bool,
}

impl Default for GenerativeModelConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Cca,
            px: 5,
            py: 5,
            qx: SubspaceDimension::default(),
            qy: SubspaceDimension::default(),
            m: 1,
            c1x: None,
            c1y: None,
            ax: 0.0,
            ay: 0.0,
            a_between: -1.0,
            r_between: 0.3,
            max_n_sigma_trials: 10_000,
            expl_var_ratio_thr: 0.5,
            min_eval_thr: 1e-5,
            cx: None,
            cy: None,
            pc1_expl_var_ratio_x: None,
            pc1_expl_var_ratio_y: None,
            rotate_within_block: false,
            seed: 42,
            search_order: vec![
                LatentModeAlgorithm::Pc1,
                LatentModeAlgorithm::Random,
                LatentModeAlgorithm::Optimization,
            ],
            verbose: false,
        }
    }
}

impl GenerativeModelConfig {
    pub fn new(model: ModelKind, px: usize, py: usize) -> Self {
        Self {
            model,
            px,
            py,
            ..Self::default()
        }
    }

    /// Check every parameter before any numerical work.
    pub fn validate(&self) -> Result<(), CovarianceError> {
        self.resolved_subspaces().map(|_| ())
    }

    /// Validate and resolve `(qx, qy)`.
    pub fn resolved_subspaces(&self) -> Result<(usize, usize), CovarianceError> {
        if self.px == 0 || self.py == 0 {
            return Err(CovarianceError::config(format!(
                "block dimensions must be positive, got px = {}, py = {}",
                self.px, self.py
            )));
        }
        if self.max_n_sigma_trials == 0 {
            return Err(CovarianceError::config("max_n_sigma_trials must be positive"));
        }
        if self.m == 0 {
            return Err(CovarianceError::config("at least one latent mode is required"));
        }
        if self.m > self.px.min(self.py) {
            return Err(CovarianceError::config(format!(
                "m = {} exceeds min(px, py) = {}",
                self.m,
                self.px.min(self.py)
            )));
        }

        self.check_block(
            "x",
            self.px,
            self.c1x,
            self.ax,
            self.cx.as_deref(),
            self.pc1_expl_var_ratio_x,
        )?;
        self.check_block(
            "y",
            self.py,
            self.c1y,
            self.ay,
            self.cy.as_deref(),
            self.pc1_expl_var_ratio_y,
        )?;

        if !self.a_between.is_finite() || self.a_between > 0.0 {
            return Err(CovarianceError::config(format!(
                "a_between must be finite and <= 0, got {}",
                self.a_between
            )));
        }
        // A unit association forces a perfectly correlated pair, which can
        // never clear the strictly positive eigenvalue margin.
        if !(0.0..1.0).contains(&self.r_between) {
            let r = self.r_between;
            return Err(CovarianceError::config(format!(
                "r_between = {r} is out of range for a {} model",
                self.model
            )));
        }
        if !(0.0..=1.0).contains(&self.expl_var_ratio_thr) {
            return Err(CovarianceError::config(format!(
                "expl_var_ratio_thr must lie in [0, 1], got {}",
                self.expl_var_ratio_thr
            )));
        }
        if !self.min_eval_thr.is_finite() || self.min_eval_thr <= 0.0 {
            return Err(CovarianceError::config(format!(
                "min_eval_thr must be finite and positive, got {}",
                self.min_eval_thr
            )));
        }
        if self.search_order.is_empty() {
            return Err(CovarianceError::config(
                "search_order must name at least one strategy",
            ));
        }
        if self.search_order.contains(&LatentModeAlgorithm::Derived) {
            return Err(CovarianceError::config("'derived' is not a search strategy"));
        }

        let qx = self.qx.resolve(self.px)?;
        let qy = self.qy.resolve(self.py)?;
        if self.m > qx || self.m > qy {
            return Err(CovarianceError::config(format!(
                "m = {} exceeds the dominant subspace sizes qx = {qx}, qy = {qy}",
                self.m
            )));
        }
        Ok((qx, qy))
    }

    fn check_block(
        &self,
        name: &str,
        p: usize,
        c1: Option<f64>,
        decay: f64,
        explicit: Option<&[f64]>,
        pc1_ratio: Option<f64>,
    ) -> Result<(), CovarianceError> {
        if let Some(c1) = c1 {
            match self.model {
                ModelKind::Cca if c1 != 1.0 => {
                    return Err(CovarianceError::config(format!(
                        "c1{name} must be 1 for a CCA model, got {c1}"
                    )));
                }
                ModelKind::Pls if !c1.is_finite() || c1 <= 0.0 => {
                    return Err(CovarianceError::config(format!(
                        "c1{name} must be finite and positive, got {c1}"
                    )));
                }
                _ => {}
            }
            if explicit.is_some() {
                return Err(CovarianceError::config(format!(
                    "c{name} and c1{name} cannot both be given"
                )));
            }
        }
        if !decay.is_finite() || decay > 0.0 {
            return Err(CovarianceError::config(format!(
                "a{name} must be finite and <= 0, got {decay}"
            )));
        }
        if let Some(values) = explicit {
            if values.len() != p {
                return Err(CovarianceError::config(format!(
                    "c{name} has length {} but p{name} = {p}",
                    values.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(CovarianceError::config(format!(
                    "c{name} entries must be finite and positive"
                )));
            }
        }
        if let Some(ratio) = pc1_ratio {
            if decay != 0.0 || explicit.is_some() {
                return Err(CovarianceError::config(format!(
                    "pc1_expl_var_ratio_{name} conflicts with a{name} / c{name}"
                )));
            }
            decay_exponent_for_explained_variance(p, ratio)?;
        }
        Ok(())
    }

    /// `r_between * i^a_between` for `i = 1..m`.
    pub fn true_corrs(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.m, |i| {
            self.r_between * ((i + 1) as f64).powf(self.a_between)
        })
    }

    fn block_covariance<R: rand::Rng + ?Sized>(
        &self,
        p: usize,
        c1: Option<f64>,
        decay: f64,
        explicit: Option<&[f64]>,
        pc1_ratio: Option<f64>,
        rng: &mut R,
    ) -> Result<(WithinBlockCovariance, f64), CovarianceError> {
        let decay = match pc1_ratio {
            Some(ratio) => decay_exponent_for_explained_variance(p, ratio)?,
            None => decay,
        };
        let cov = build_within_block_covariance(&SpectrumSpec {
            dim: p,
            decay,
            leading: c1,
            explicit,
        })?;
        let cov = if self.rotate_within_block {
            cov.rotated(rng)?
        } else {
            cov
        };
        Ok((cov, decay))
    }
}

/// Everything derived by one construction run.
#[derive(Debug, Clone, Serialize)]
pub struct ModelConstruction {
    pub model: ModelKind,
    pub px: usize,
    pub py: usize,
    pub qx: usize,
    pub qy: usize,
    pub m: usize,
    /// Decay exponents actually used.
    pub ax: f64,
    pub ay: f64,
    pub sigma: Array2<f64>,
    pub sigma_xx: Array2<f64>,
    pub sigma_yy: Array2<f64>,
    pub sigma_xy: Array2<f64>,
    pub singular_values: Array1<f64>,
    pub true_corrs: Array1<f64>,
    pub true_assocs: Array1<f64>,
    /// `px x m` latent directions.
    pub u_latent: Array2<f64>,
    pub v_latent: Array2<f64>,
    pub explained_variance_x: Array1<f64>,
    pub explained_variance_y: Array1<f64>,
    pub min_eval: f64,
    pub algorithm: LatentModeAlgorithm,
    pub trials: usize,
    pub advisories: Vec<Advisory>,
}

/// `[[Sxx, Sxy], [Sxy^T, Syy]]`
pub fn assemble_joint(
    sigma_xx: &Array2<f64>,
    sigma_xy: &Array2<f64>,
    sigma_yy: &Array2<f64>,
) -> Array2<f64> {
    let px = sigma_xx.nrows();
    let py = sigma_yy.nrows();
    let mut sigma = Array2::zeros((px + py, px + py));
    sigma.slice_mut(s![..px, ..px]).assign(sigma_xx);
    sigma.slice_mut(s![..px, px..]).assign(sigma_xy);
    sigma.slice_mut(s![px.., ..px]).assign(&sigma_xy.t());
    sigma.slice_mut(s![px.., px..]).assign(sigma_yy);
    sigma
}

/// Build a model with the generator seeded from `config.seed`.
pub fn setup_model(config: &GenerativeModelConfig) -> Result<ModelConstruction, CovarianceError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    setup_model_with_rng(config, &mut rng)
}

/// Only the joint covariance matrix.
pub fn joint_covariance(config: &GenerativeModelConfig) -> Result<Array2<f64>, CovarianceError> {
    setup_model(config).map(|model| model.sigma)
}

fn strategies_for(
    config: &GenerativeModelConfig,
    qx: usize,
    qy: usize,
) -> Vec<LatentModeAlgorithm> {
    if config.m == 1 && qx == 1 && qy == 1 {
        return vec![LatentModeAlgorithm::Pc1];
    }
    config
        .search_order
        .iter()
        .copied()
        .filter(|alg| {
            config.m == 1
                || !matches!(alg, LatentModeAlgorithm::Pc1 | LatentModeAlgorithm::Optimization)
        })
        .collect()
}

fn run_strategy<R: rand::Rng + ?Sized>(
    algorithm: LatentModeAlgorithm,
    problem: &SearchProblem<'_>,
    rng: &mut R,
) -> Result<LatentModeSolution, CovarianceError> {
    match algorithm {
        LatentModeAlgorithm::Pc1 => Pc1Search::default().search(problem, rng),
        LatentModeAlgorithm::Random => RandomSearch::default().search(problem, rng),
        LatentModeAlgorithm::Optimization => OptimizationSearch::default().search(problem, rng),
        LatentModeAlgorithm::Derived => Err(CovarianceError::config(
            "'derived' is not a search strategy",
        )),
    }
}

/// Build a model drawing all randomness from `rng`.
pub fn setup_model_with_rng<R: rand::Rng + ?Sized>(
    config: &GenerativeModelConfig,
    rng: &mut R,
) -> Result<ModelConstruction, CovarianceError> {
    let (qx, qy) = config.resolved_subspaces()?;
    let mut advisories = Vec::new();
    if config.a_between == 0.0 {
        log::warn!("a_between == 0: all {} between-set associations are equal", config.m);
        advisories.push(Advisory::EqualModeStrengths);
    }

    let (sxx, ax) = config.block_covariance(
        config.px,
        config.c1x,
        config.ax,
        config.cx.as_deref(),
        config.pc1_expl_var_ratio_x,
        rng,
    )?;
    let (syy, ay) = config.block_covariance(
        config.py,
        config.c1y,
        config.ay,
        config.cy.as_deref(),
        config.pc1_expl_var_ratio_y,
        rng,
    )?;
    log::debug!(
        "built {} blocks px = {}, py = {} (ax = {ax:.4}, ay = {ay:.4}, qx = {qx}, qy = {qy})",
        config.model,
        config.px,
        config.py
    );

    let true_corrs = config.true_corrs();
    let assembler = assembler_for(config.model);
    let problem = SearchProblem {
        sigma_xx: &sxx,
        sigma_yy: &syy,
        assembler: assembler.as_ref(),
        true_corrs: &true_corrs,
        qx,
        qy,
        expl_var_ratio_thr: config.expl_var_ratio_thr,
        min_eval_thr: config.min_eval_thr,
        max_n_sigma_trials: config.max_n_sigma_trials,
        verbose: config.verbose,
    };

    let strategies = strategies_for(config, qx, qy);
    if strategies.is_empty() {
        return Err(CovarianceError::NotImplemented(format!(
            "none of the strategies in search_order support m = {}",
            config.m
        )));
    }
    let mut last_infeasible = None;
    let mut solution = None;
    for algorithm in strategies {
        match run_strategy(algorithm, &problem, rng) {
            Ok(found) => {
                solution = Some(found);
                break;
            }
            Err(err) if err.is_infeasible() => {
                log::info!("{algorithm} search failed, trying the next strategy: {err}");
                last_infeasible = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    let Some(solution) = solution else {
        return Err(last_infeasible.unwrap_or(CovarianceError::Infeasible {
            algorithm: "search".to_string(),
            trials: 0,
            best_min_eval: f64::NEG_INFINITY,
        }));
    };

    let cross = solution.cross;
    let sigma = assemble_joint(&sxx.matrix, &cross.sigma_xy, &syy.matrix);
    let full_min = min_eigenvalue(&sigma)?;
    if full_min <= 0.0 {
        return Err(CovarianceError::Infeasible {
            algorithm: solution.algorithm.to_string(),
            trials: solution.trials,
            best_min_eval: full_min,
        });
    }
    log::info!(
        "{} model constructed by {} search after {} trial(s), min_eval = {:.3e}",
        config.model,
        solution.algorithm,
        solution.trials,
        cross.min_eval
    );

    Ok(ModelConstruction {
        model: config.model,
        px: config.px,
        py: config.py,
        qx,
        qy,
        m: config.m,
        ax,
        ay,
        sigma,
        sigma_xx: sxx.matrix,
        sigma_yy: syy.matrix,
        sigma_xy: cross.sigma_xy,
        singular_values: cross.singular_values,
        true_corrs: cross.true_corrs,
        true_assocs: cross.associations,
        u_latent: cross.u,
        v_latent: cross.v,
        explained_variance_x: solution.explained_variance_x,
        explained_variance_y: solution.explained_variance_y,
        min_eval: cross.min_eval,
        algorithm: solution.algorithm,
        trials: solution.trials,
        advisories,
    })
}

/// A constructed joint covariance model together with the parameters that
/// produced it.
#[derive(Debug, Clone)]
pub struct JointCovarianceModel {
    pub config: GenerativeModelConfig,
    pub construction: ModelConstruction,
}

impl JointCovarianceModel {
    pub fn new(config: GenerativeModelConfig) -> Result<Self, CovarianceError> {
        let construction = setup_model(&config)?;
        Ok(Self {
            config,
            construction,
        })
    }

    pub fn with_rng<R: rand::Rng + ?Sized>(
        config: GenerativeModelConfig,
        rng: &mut R,
    ) -> Result<Self, CovarianceError> {
        let construction = setup_model_with_rng(&config, rng)?;
        Ok(Self {
            config,
            construction,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.construction.model
    }

    pub fn sigma(&self) -> &Array2<f64> {
        &self.construction.sigma
    }

    pub fn px(&self) -> usize {
        self.construction.px
    }

    pub fn py(&self) -> usize {
        self.construction.py
    }

    pub fn m(&self) -> usize {
        self.construction.m
    }

    /// Reinterpret the joint covariance of `other` as a `kind` model. The
    /// matrix, dimensions and decay exponents are kept; latent directions and
    /// correlations are re-derived from the cross block.
    pub fn from_jcov_model(
        other: &JointCovarianceModel,
        kind: ModelKind,
    ) -> Result<Self, CovarianceError> {
        let src = &other.construction;
        let m = src.m;
        let sxx = &src.sigma_xx;
        let syy = &src.sigma_yy;
        let sxy = &src.sigma_xy;

        let (mut u, mut v, singular_values, true_corrs, true_assocs) = match kind {
            ModelKind::Pls => {
                let (p, sv, q) = sxy.thin_svd()?;
                let u = p.slice(s![.., ..m]).to_owned();
                let v = q.slice(s![.., ..m]).to_owned();
                let assocs = sv.slice(s![..m]).to_owned();
                let corrs = Array1::from_shape_fn(m, |i| {
                    let var = quadratic_form(sxx, u.column(i)) * quadratic_form(syy, v.column(i));
                    assocs[i] / var.sqrt()
                });
                (u, v, sv, corrs, assocs)
            }
            ModelKind::Cca => {
                let wx = inverse_sqrt_spd(sxx)?;
                let wy = inverse_sqrt_spd(syy)?;
                let (p, rho, q) = wx.dot(sxy).dot(&wy).thin_svd()?;
                let mut u = wx.dot(&p.slice(s![.., ..m]));
                let mut v = wy.dot(&q.slice(s![.., ..m]));
                normalize_columns(&mut u);
                normalize_columns(&mut v);
                let corrs = rho.slice(s![..m]).to_owned();
                (u, v, rho, corrs.clone(), corrs)
            }
        };

        for k in 0..m {
            if u.column(k).dot(&src.u_latent.column(k)) < 0.0 {
                u.column_mut(k).mapv_inplace(|x| -x);
                v.column_mut(k).mapv_inplace(|x| -x);
            }
        }
        let min_eval = joint_min_eigenvalue(sxx.view(), sxy.view(), syy.view())?;

        let construction = ModelConstruction {
            model: kind,
            px: src.px,
            py: src.py,
            qx: src.qx,
            qy: src.qy,
            m,
            ax: src.ax,
            ay: src.ay,
            sigma: src.sigma.clone(),
            sigma_xx: sxx.clone(),
            sigma_yy: syy.clone(),
            sigma_xy: sxy.clone(),
            singular_values,
            true_corrs,
            true_assocs,
            explained_variance_x: direction_variance_ratios(sxx, &u),
            explained_variance_y: direction_variance_ratios(syy, &v),
            u_latent: u,
            v_latent: v,
            min_eval,
            algorithm: LatentModeAlgorithm::Derived,
            trials: 0,
            advisories: src.advisories.clone(),
        };
        let config = GenerativeModelConfig {
            model: kind,
            ..other.config.clone()
        };
        log::debug!("re-derived {} model from a {} model", kind, src.model);
        Ok(Self {
            config,
            construction,
        })
    }

    /// Draw `n` paired samples from the zero-mean normal with this covariance.
    pub fn generate_data<R: rand::Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Array2<f64>), CovarianceError> {
        sampling::generate_data(&self.construction.sigma, self.construction.px, n, rng)
    }
}
