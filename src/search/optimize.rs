use super::{
    LatentModeSearch, LatentModeSolution, RotationTrial, SearchProblem,
    dominant_rotations_from_trials, is_trial_rejection, negative_min_eval,
};
use crate::completion::{GaussianLowVarianceCompletion, LowVarianceCompletion};
use crate::error::CovarianceError;
use crate::linalg::utils::{quadratic_form, standard_normal_matrix};
use crate::types::LatentModeAlgorithm;
use ndarray::{Array1, Axis, s};
use wolfe_bfgs::{Bfgs, BfgsError};

const MAX_STARTS: usize = 4;
const FD_STEP: f64 = 1e-6;
const SHORTFALL_PENALTY: f64 = 1e2;

/// Failed objective evaluations become a steep bowl around the origin so the
/// line search backs off instead of aborting the start.
fn invalid_sample(z: &Array1<f64>) -> (f64, Array1<f64>) {
    const COST_BARRIER: f64 = 1e50;
    const GRAD_SCALE: f64 = 1e6;
    (COST_BARRIER, z.mapv(|v| GRAD_SCALE * v))
}

/// BFGS on the negative Schur margin over free coefficient vectors for the
/// single-mode case. Coefficients are normalized inside the objective, and a
/// quadratic penalty pushes directions above the explained-variance floor.
#[derive(Debug, Clone)]
pub struct OptimizationSearch<C = GaussianLowVarianceCompletion> {
    pub completion: C,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for OptimizationSearch<GaussianLowVarianceCompletion> {
    fn default() -> Self {
        Self::with_completion(GaussianLowVarianceCompletion)
    }
}

impl<C: LowVarianceCompletion> OptimizationSearch<C> {
    pub fn with_completion(completion: C) -> Self {
        Self {
            completion,
            max_iterations: 60,
            tolerance: 1e-7,
        }
    }
}

struct Objective<'p, 'a> {
    problem: &'p SearchProblem<'a>,
    floor_x: f64,
    floor_y: f64,
}

impl Objective<'_, '_> {
    fn value(
        &self,
        z: &Array1<f64>,
        trials: &mut Vec<RotationTrial>,
    ) -> Result<f64, CovarianceError> {
        let qx = self.problem.qx;
        let u_rot = z.slice(s![..qx]);
        let v_rot = z.slice(s![qx..]);
        let neg = negative_min_eval(
            self.problem,
            u_rot,
            v_rot,
            self.problem.min_eval_thr,
            trials,
        )?;
        Ok(neg + SHORTFALL_PENALTY * self.shortfall(z))
    }

    /// Squared relative shortfall of each direction's variance below its floor.
    fn shortfall(&self, z: &Array1<f64>) -> f64 {
        let qx = self.problem.qx;
        let mut total = 0.0;
        for (coefs, cov, floor) in [
            (z.slice(s![..qx]), self.problem.sigma_xx, self.floor_x),
            (z.slice(s![qx..]), self.problem.sigma_yy, self.floor_y),
        ] {
            let norm = coefs.dot(&coefs).sqrt();
            if norm == 0.0 || floor <= 0.0 {
                continue;
            }
            let q = coefs.len();
            let dir = cov.basis.slice(s![.., ..q]).dot(&coefs) / norm;
            let var = quadratic_form(&cov.matrix, dir.view());
            let gap = ((floor - var) / floor).max(0.0);
            total += gap * gap;
        }
        total
    }

    fn value_and_gradient(
        &self,
        z: &Array1<f64>,
        trials: &mut Vec<RotationTrial>,
    ) -> Result<(f64, Array1<f64>), CovarianceError> {
        let f0 = self.value(z, trials)?;
        let mut grad = Array1::zeros(z.len());
        let mut probe = z.clone();
        let mut scratch = Vec::new();
        for i in 0..z.len() {
            let h = FD_STEP * z[i].abs().max(1.0);
            probe[i] = z[i] + h;
            let fp = self.value(&probe, &mut scratch)?;
            probe[i] = z[i] - h;
            let fm = self.value(&probe, &mut scratch)?;
            probe[i] = z[i];
            grad[i] = (fp - fm) / (2.0 * h);
        }
        Ok((f0, grad))
    }
}

impl<C: LowVarianceCompletion> LatentModeSearch for OptimizationSearch<C> {
    fn algorithm(&self) -> LatentModeAlgorithm {
        LatentModeAlgorithm::Optimization
    }

    fn search<R: rand::Rng + ?Sized>(
        &self,
        problem: &SearchProblem<'_>,
        rng: &mut R,
    ) -> Result<LatentModeSolution, CovarianceError> {
        let m = problem.m();
        if m != 1 {
            return Err(CovarianceError::NotImplemented(format!(
                "optimization search is only available for a single mode, got m = {m}"
            )));
        }
        let level = problem.trial_level();
        let objective = Objective {
            problem,
            floor_x: problem.expl_var_ratio_thr
                * problem.sigma_xx.dominant_mean_variance(problem.qx),
            floor_y: problem.expl_var_ratio_thr
                * problem.sigma_yy.dominant_mean_variance(problem.qy),
        };
        let n_starts = MAX_STARTS.min(problem.max_n_sigma_trials).max(1);
        let mut trials: Vec<RotationTrial> = Vec::new();
        let mut fatal: Option<CovarianceError> = None;

        for start in 0..n_starts {
            let z0 = standard_normal_matrix(problem.qx + problem.qy, 1, rng)
                .index_axis_move(Axis(1), 0);
            let outcome = {
                let mut optimizer = Bfgs::new(z0, |z| {
                    if fatal.is_some() {
                        return invalid_sample(z);
                    }
                    match objective.value_and_gradient(z, &mut trials) {
                        Ok((cost, grad))
                            if cost.is_finite() && grad.iter().all(|g| g.is_finite()) =>
                        {
                            (cost, grad)
                        }
                        Ok(_) => invalid_sample(z),
                        Err(err) if is_trial_rejection(&err) => invalid_sample(z),
                        Err(err) => {
                            fatal = Some(err);
                            invalid_sample(z)
                        }
                    }
                })
                .with_tolerance(self.tolerance)
                .with_max_iterations(self.max_iterations)
                .with_rng_seed(0x5EED_u64.wrapping_add(start as u64));
                optimizer.run()
            };
            if let Some(err) = fatal.take() {
                return Err(err);
            }

            let solution = match outcome {
                Ok(sol) => sol,
                Err(BfgsError::MaxIterationsReached { last_solution })
                | Err(BfgsError::LineSearchFailed { last_solution, .. }) => *last_solution,
                Err(_) => {
                    log::log!(level, "[optimization] start {start} did not produce a point");
                    continue;
                }
            };
            log::log!(
                level,
                "[optimization] start {start} finished at objective {:.3e}",
                solution.final_value
            );
        }

        let eligible: Vec<RotationTrial> = trials
            .iter()
            .filter(|t| {
                let (u, v) = problem.dominant_directions(&t.u_rot, &t.v_rot);
                problem.meets_explained_variance(&u, &v)
            })
            .cloned()
            .collect();
        let chosen = dominant_rotations_from_trials(&eligible)
            .or_else(|| dominant_rotations_from_trials(&trials));
        let Some(chosen) = chosen else {
            return Err(CovarianceError::Infeasible {
                algorithm: LatentModeAlgorithm::Optimization.to_string(),
                trials: n_starts,
                best_min_eval: f64::NEG_INFINITY,
            });
        };
        log::log!(
            level,
            "[optimization] best of {} feasible evaluations has min_eval {:.3e}",
            trials.len(),
            chosen.score
        );

        let (dom_u, dom_v) = problem.dominant_directions(&chosen.u_rot, &chosen.v_rot);
        let full = problem.qx == problem.px() && problem.qy == problem.py();
        let retries = if full {
            1
        } else {
            problem.max_n_sigma_trials.saturating_sub(n_starts).max(1)
        };
        for attempt in 0..retries {
            let u = self.completion.complete(
                &problem.sigma_xx.basis,
                &dom_u,
                problem.expl_var_ratio_thr,
                problem.qx,
                rng,
            );
            let v = self.completion.complete(
                &problem.sigma_yy.basis,
                &dom_v,
                problem.expl_var_ratio_thr,
                problem.qy,
                rng,
            );
            match problem.assemble(&u, &v) {
                Ok(cross)
                    if cross.min_eval >= problem.min_eval_thr
                        && problem.meets_explained_variance(&cross.u, &cross.v) =>
                {
                    return Ok(problem.solution(
                        cross,
                        LatentModeAlgorithm::Optimization,
                        n_starts + attempt + 1,
                    ));
                }
                Ok(_) => {}
                Err(err) if is_trial_rejection(&err) => {
                    log::log!(level, "[optimization] completion {attempt} rejected: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        log::debug!("[optimization] completions rejected; keeping dominant-subspace directions");
        let cross = problem.assemble(&dom_u, &dom_v)?;
        Ok(problem.solution(
            cross,
            LatentModeAlgorithm::Optimization,
            n_starts + retries + 1,
        ))
    }
}
