use super::{
    LatentModeSearch, LatentModeSolution, SearchProblem, generate_random_dominant_subspace_rotations,
    is_trial_rejection,
};
use crate::assembly::AssembledCrossBlock;
use crate::completion::{GaussianLowVarianceCompletion, LowVarianceCompletion};
use crate::error::CovarianceError;
use crate::types::LatentModeAlgorithm;

/// Random orthonormal directions in the dominant subspaces, completed toward
/// the low-variance subspace. Stops at the first candidate that clears the
/// margin threshold and the explained-variance floor; otherwise keeps the
/// best non-negative margin seen within the trial budget.
#[derive(Debug, Clone)]
pub struct RandomSearch<C = GaussianLowVarianceCompletion> {
    pub completion: C,
}

impl Default for RandomSearch<GaussianLowVarianceCompletion> {
    fn default() -> Self {
        Self::with_completion(GaussianLowVarianceCompletion)
    }
}

impl<C: LowVarianceCompletion> RandomSearch<C> {
    pub fn with_completion(completion: C) -> Self {
        Self { completion }
    }
}

impl<C: LowVarianceCompletion> LatentModeSearch for RandomSearch<C> {
    fn algorithm(&self) -> LatentModeAlgorithm {
        LatentModeAlgorithm::Random
    }

    fn search<R: rand::Rng + ?Sized>(
        &self,
        problem: &SearchProblem<'_>,
        rng: &mut R,
    ) -> Result<LatentModeSolution, CovarianceError> {
        let m = problem.m();
        let level = problem.trial_level();
        let n_trials = problem.max_n_sigma_trials;
        let mut best: Option<AssembledCrossBlock> = None;
        let mut rejected = 0usize;

        for trial in 0..n_trials {
            let u_rot = generate_random_dominant_subspace_rotations(problem.qx, m, rng)?;
            let v_rot = generate_random_dominant_subspace_rotations(problem.qy, m, rng)?;
            let (dom_u, dom_v) = problem.dominant_directions(&u_rot, &v_rot);
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

            let cross = match problem.assemble(&u, &v) {
                Ok(cross) => cross,
                Err(err) if is_trial_rejection(&err) => {
                    rejected += 1;
                    log::log!(level, "[random] trial {trial} rejected: {err}");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let meets = problem.meets_explained_variance(&cross.u, &cross.v);
            if cross.min_eval >= problem.min_eval_thr && meets {
                log::log!(
                    level,
                    "[random] accepted trial {trial} (min_eval {:.3e})",
                    cross.min_eval
                );
                return Ok(problem.solution(cross, LatentModeAlgorithm::Random, trial + 1));
            }
            if best.as_ref().is_none_or(|b| cross.min_eval > b.min_eval) {
                best = Some(cross);
            }
        }

        log::debug!(
            "[random] budget of {n_trials} trials exhausted ({rejected} rejected by factorization)"
        );
        match best {
            Some(cross) if cross.min_eval >= 0.0 => {
                log::warn!(
                    "[random] no trial met both criteria; using best margin {:.3e}",
                    cross.min_eval
                );
                Ok(problem.solution(cross, LatentModeAlgorithm::Random, n_trials))
            }
            other => Err(CovarianceError::Infeasible {
                algorithm: LatentModeAlgorithm::Random.to_string(),
                trials: n_trials,
                best_min_eval: other.map_or(f64::NEG_INFINITY, |c| c.min_eval),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{CcaAssembler, PlsAssembler};
    use crate::spectrum::{SpectrumSpec, WithinBlockCovariance, build_within_block_covariance};
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn block(p: usize, decay: f64) -> WithinBlockCovariance {
        build_within_block_covariance(&SpectrumSpec {
            dim: p,
            decay,
            leading: None,
            explicit: None,
        })
        .unwrap()
    }

    #[test]
    fn finds_two_orthogonal_modes_for_isotropic_cca() {
        let sxx = block(4, 0.0);
        let syy = block(3, 0.0);
        let corrs = array![0.6, 0.3];
        let problem = SearchProblem {
            sigma_xx: &sxx,
            sigma_yy: &syy,
            assembler: &CcaAssembler,
            true_corrs: &corrs,
            qx: 4,
            qy: 3,
            expl_var_ratio_thr: 0.5,
            min_eval_thr: 1e-5,
            max_n_sigma_trials: 20,
            verbose: true,
        };
        let sol = RandomSearch::<GaussianLowVarianceCompletion>::default()
            .search(&problem, &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(sol.algorithm, LatentModeAlgorithm::Random);
        assert_eq!(sol.trials, 1);
        let gram: Array2<f64> = sol.cross.u.t().dot(&sol.cross.u);
        assert!(gram[[0, 1]].abs() < 1e-10);
        assert!((sol.cross.singular_values[0] - 0.6).abs() < 1e-10);
        assert!((sol.cross.singular_values[1] - 0.3).abs() < 1e-10);
    }

    #[test]
    fn impossible_margin_is_infeasible() {
        let sxx = block(3, -1.0);
        let corrs = array![0.5];
        let problem = SearchProblem {
            sigma_xx: &sxx,
            sigma_yy: &sxx,
            assembler: &PlsAssembler,
            true_corrs: &corrs,
            qx: 3,
            qy: 3,
            expl_var_ratio_thr: 0.5,
            min_eval_thr: 1e3,
            max_n_sigma_trials: 5,
            verbose: false,
        };
        // Best non-negative margin is still returned when the threshold is
        // unreachable.
        let sol = RandomSearch::<GaussianLowVarianceCompletion>::default()
            .search(&problem, &mut StdRng::seed_from_u64(6))
            .unwrap();
        assert!(sol.cross.min_eval >= 0.0);
        assert_eq!(sol.trials, 5);

        let empty = SearchProblem {
            max_n_sigma_trials: 0,
            ..problem
        };
        let err = RandomSearch::<GaussianLowVarianceCompletion>::default()
            .search(&empty, &mut StdRng::seed_from_u64(6))
            .unwrap_err();
        assert!(err.is_infeasible());
    }
}
