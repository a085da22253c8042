use super::{LatentModeSearch, LatentModeSolution, SearchProblem, is_trial_rejection};
use crate::assembly::AssembledCrossBlock;
use crate::completion::{GaussianLowVarianceCompletion, LowVarianceCompletion};
use crate::error::CovarianceError;
use crate::types::LatentModeAlgorithm;
use ndarray::s;

/// Single latent mode aligned with the first principal component of each
/// block.
///
/// The direction is completed toward the low-variance subspace with a weight
/// floor that starts at `expl_var_ratio_thr` and rises linearly to 1 over at
/// most [`MAX_ANNEALING_STEPS`] trials, so the last trial is the pure first
/// principal component and is always feasible for correlations below 1.
#[derive(Debug, Clone)]
pub struct Pc1Search<C = GaussianLowVarianceCompletion> {
    pub completion: C,
}

impl Default for Pc1Search<GaussianLowVarianceCompletion> {
    fn default() -> Self {
        Self::with_completion(GaussianLowVarianceCompletion)
    }
}

impl<C: LowVarianceCompletion> Pc1Search<C> {
    pub fn with_completion(completion: C) -> Self {
        Self { completion }
    }
}

/// Upper bound on pc1 trials, whatever `max_n_sigma_trials` allows.
pub const MAX_ANNEALING_STEPS: usize = 100;

fn annealing_steps(budget: usize) -> usize {
    budget.clamp(1, MAX_ANNEALING_STEPS)
}

fn annealed_weight(floor: f64, trial: usize, n_trials: usize) -> f64 {
    if n_trials <= 1 {
        return floor;
    }
    let t = trial as f64 / (n_trials - 1) as f64;
    (floor + (1.0 - floor) * t).clamp(0.0, 1.0)
}

impl<C: LowVarianceCompletion> LatentModeSearch for Pc1Search<C> {
    fn algorithm(&self) -> LatentModeAlgorithm {
        LatentModeAlgorithm::Pc1
    }

    fn search<R: rand::Rng + ?Sized>(
        &self,
        problem: &SearchProblem<'_>,
        rng: &mut R,
    ) -> Result<LatentModeSolution, CovarianceError> {
        let m = problem.m();
        if m != 1 {
            return Err(CovarianceError::config(format!(
                "first-principal-component search supports exactly one mode, got m = {m}"
            )));
        }
        let level = problem.trial_level();
        let dom_u = problem.sigma_xx.basis.slice(s![.., ..1]).to_owned();
        let dom_v = problem.sigma_yy.basis.slice(s![.., ..1]).to_owned();

        let full = problem.qx == problem.px() && problem.qy == problem.py();
        let n_trials = if full { 1 } else { annealing_steps(problem.max_n_sigma_trials) };

        let mut best: Option<AssembledCrossBlock> = None;
        for trial in 0..n_trials {
            let weight = annealed_weight(problem.expl_var_ratio_thr, trial, n_trials);
            let u = self
                .completion
                .complete(&problem.sigma_xx.basis, &dom_u, weight, problem.qx, rng);
            let v = self
                .completion
                .complete(&problem.sigma_yy.basis, &dom_v, weight, problem.qy, rng);

            let cross = match problem.assemble(&u, &v) {
                Ok(cross) => cross,
                Err(err) if is_trial_rejection(&err) => {
                    log::log!(level, "[pc1] trial {trial} rejected: {err}");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if cross.min_eval >= problem.min_eval_thr
                && problem.meets_explained_variance(&cross.u, &cross.v)
            {
                log::log!(
                    level,
                    "[pc1] accepted trial {trial} (weight {weight:.3}, min_eval {:.3e})",
                    cross.min_eval
                );
                return Ok(problem.solution(cross, LatentModeAlgorithm::Pc1, trial + 1));
            }
            if best.as_ref().is_none_or(|b| cross.min_eval > b.min_eval) {
                best = Some(cross);
            }
        }

        match best {
            Some(cross) if cross.min_eval >= 0.0 => {
                log::warn!(
                    "[pc1] no trial met both criteria; using best margin {:.3e}",
                    cross.min_eval
                );
                Ok(problem.solution(cross, LatentModeAlgorithm::Pc1, n_trials))
            }
            other => Err(CovarianceError::Infeasible {
                algorithm: LatentModeAlgorithm::Pc1.to_string(),
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
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::Cell;

    fn block(p: usize, decay: f64) -> WithinBlockCovariance {
        build_within_block_covariance(&SpectrumSpec {
            dim: p,
            decay,
            leading: None,
            explicit: None,
        })
        .unwrap()
    }

    struct CountingCompletion {
        calls: Cell<usize>,
    }

    impl LowVarianceCompletion for CountingCompletion {
        fn complete<R: rand::Rng + ?Sized>(
            &self,
            _basis: &Array2<f64>,
            dominant: &Array2<f64>,
            _min_weight: f64,
            _q: usize,
            _rng: &mut R,
        ) -> Array2<f64> {
            self.calls.set(self.calls.get() + 1);
            dominant.clone()
        }
    }

    fn problem<'a>(
        sxx: &'a WithinBlockCovariance,
        syy: &'a WithinBlockCovariance,
        corrs: &'a Array1<f64>,
        qx: usize,
        qy: usize,
        assembler: &'a dyn crate::assembly::CrossBlockAssembler,
    ) -> SearchProblem<'a> {
        SearchProblem {
            sigma_xx: sxx,
            sigma_yy: syy,
            assembler,
            true_corrs: corrs,
            qx,
            qy,
            expl_var_ratio_thr: 0.5,
            min_eval_thr: 1e-5,
            max_n_sigma_trials: 50,
            verbose: false,
        }
    }

    #[test]
    fn rejects_more_than_one_mode() {
        let sxx = block(3, 0.0);
        let corrs = array![0.5, 0.3];
        let p = problem(&sxx, &sxx, &corrs, 3, 3, &CcaAssembler);
        let err = Pc1Search::<GaussianLowVarianceCompletion>::default()
            .search(&p, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn full_subspace_needs_one_assembly() {
        let sxx = block(3, -1.0);
        let syy = block(2, -0.5);
        let corrs = array![0.6];
        let p = problem(&sxx, &syy, &corrs, 3, 2, &PlsAssembler);
        let search = Pc1Search::with_completion(CountingCompletion { calls: Cell::new(0) });
        let sol = search.search(&p, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(search.completion.calls.get(), 2);
        assert_eq!(sol.trials, 1);
        assert_eq!(sol.algorithm, LatentModeAlgorithm::Pc1);
        assert_abs_diff_eq!(sol.cross.u[[0, 0]], 1.0, epsilon = 0.0);
        assert_abs_diff_eq!(sol.cross.singular_values[0], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn partial_subspace_completes_and_stays_feasible() {
        let sxx = block(6, -1.0);
        let syy = block(4, -1.0);
        let corrs = array![0.8];
        let p = problem(&sxx, &syy, &corrs, 3, 2, &PlsAssembler);
        let sol = Pc1Search::<GaussianLowVarianceCompletion>::default()
            .search(&p, &mut StdRng::seed_from_u64(2))
            .unwrap();
        assert!(sol.cross.min_eval >= 1e-5);
        assert!(p.meets_explained_variance(&sol.cross.u, &sol.cross.v));
        let u = sol.cross.u.column(0);
        assert_abs_diff_eq!(u.dot(&u), 1.0, epsilon = 1e-10);
    }

    /// Mixes in the weakest axis until the floor reaches 1.
    struct WeakestAxisCompletion {
        calls: Cell<usize>,
    }

    impl LowVarianceCompletion for WeakestAxisCompletion {
        fn complete<R: rand::Rng + ?Sized>(
            &self,
            basis: &Array2<f64>,
            dominant: &Array2<f64>,
            min_weight: f64,
            _q: usize,
            _rng: &mut R,
        ) -> Array2<f64> {
            self.calls.set(self.calls.get() + 1);
            if min_weight < 1.0 {
                basis.slice(s![.., basis.ncols() - 1..]).to_owned()
            } else {
                dominant.clone()
            }
        }
    }

    #[test]
    fn large_budget_anneals_in_bounded_steps() {
        let sxx = block(32, -1.0);
        let syy = block(32, -1.0);
        let corrs = array![0.9];
        let mut p = problem(&sxx, &syy, &corrs, 4, 4, &PlsAssembler);
        p.max_n_sigma_trials = 10_000;
        let search = Pc1Search::with_completion(WeakestAxisCompletion { calls: Cell::new(0) });
        let sol = search.search(&p, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(sol.trials, MAX_ANNEALING_STEPS);
        assert_eq!(search.completion.calls.get(), 2 * MAX_ANNEALING_STEPS);
        assert_abs_diff_eq!(sol.cross.u[[0, 0]].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn weight_schedule_ends_at_one() {
        assert_eq!(annealing_steps(0), 1);
        assert_eq!(annealing_steps(50), 50);
        assert_eq!(annealing_steps(10_000), MAX_ANNEALING_STEPS);
        assert_abs_diff_eq!(annealed_weight(0.5, 0, 11), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(annealed_weight(0.5, 10, 11), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(annealed_weight(0.3, 0, 1), 0.3, epsilon = 1e-12);
    }
}
