use crate::error::{FitError, FitWarning, ParameterError};
use crate::fit::backend::FitBackend;
use crate::fit::bounds::scale;
use crate::fit::hessian::hessian_covariance;
use crate::fit::{
    BackendKind, BackendOutput, CancelToken, Diagnostics, EvaluationCounter, FitStatus,
    LogPosterior,
};
use crate::params::Bounds;

use cobyla::{Func, RhoBeg, StopTols, minimize};
use itertools::izip;
use rand::prelude::*;
use rand_distr::StandardNormal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Objective value substituted for points where the model cannot be evaluated
const PENALTY: f64 = 1e150;

/// Stand-in for an infinite bound in the scaled space
const FAR: f64 = 1e20;

/// Bounded maximum-likelihood fit with COBYLA
///
/// COBYLA (Constrained Optimization BY Linear Approximations) is a derivative-free algorithm
/// by M.J.D. Powell. It minimizes the negative log-likelihood, priors are ignored. Every
/// parameter is divided by its typical magnitude so the optimizer sees values of order unity.
///
/// The optimization runs in rounds: each round restarts COBYLA from the best point found so
/// far, with the initial trust-region radius set to the length of the previous round's step.
/// The fit converges when a round ends on the function tolerance and
/// improves the objective by no more than `10 * ftol_rel` relative to its value. A fit that
/// uses `max_rounds` rounds without converging is reported as [FitStatus::NotConverged].
///
/// If the start point cannot be evaluated, up to `max_restarts` new start points are drawn:
/// uniformly within finite bounds, as a Gaussian ball around the start otherwise.
///
/// Covariance is the inverse of the finite-difference Hessian of the negative log-likelihood
/// with relative step `hessian_step`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "LocalOptimizer", default)]
pub struct LocalOptimizer {
    pub max_rounds: usize,
    pub evaluations_per_round: usize,
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub max_restarts: usize,
    pub hessian_step: f64,
    pub seed: u64,
}

impl LocalOptimizer {
    /// Create a new [LocalOptimizer]
    ///
    /// # Arguments
    /// - `max_rounds`: maximum number of COBYLA restarts from the current best point
    /// - `evaluations_per_round`: maximum number of objective evaluations of a round
    /// - `rhobeg`: initial change of the scaled parameters
    /// - `ftol_rel`: relative tolerance on the objective value
    pub fn new(max_rounds: usize, evaluations_per_round: usize, rhobeg: f64, ftol_rel: f64) -> Self {
        assert!(max_rounds > 0, "max_rounds must be positive");
        assert!(evaluations_per_round > 0, "evaluations_per_round must be positive");
        assert!(rhobeg > 0.0 && rhobeg.is_finite(), "rhobeg must be positive and finite");
        assert!(ftol_rel >= 0.0 && ftol_rel.is_finite(), "ftol_rel must be non-negative and finite");
        Self {
            max_rounds,
            evaluations_per_round,
            rhobeg,
            ftol_rel,
            max_restarts: Self::default_max_restarts(),
            hessian_step: Self::default_hessian_step(),
            seed: Self::default_seed(),
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_hessian_step(mut self, hessian_step: f64) -> Self {
        assert!(hessian_step > 0.0 && hessian_step < 1.0, "hessian_step must be in (0, 1)");
        self.hessian_step = hessian_step;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[inline]
    pub fn default_max_rounds() -> usize {
        10
    }

    #[inline]
    pub fn default_evaluations_per_round() -> usize {
        1000
    }

    #[inline]
    pub fn default_rhobeg() -> f64 {
        0.5
    }

    #[inline]
    pub fn default_ftol_rel() -> f64 {
        1e-8
    }

    #[inline]
    pub fn default_max_restarts() -> usize {
        20
    }

    #[inline]
    pub fn default_hessian_step() -> f64 {
        1e-4
    }

    #[inline]
    pub fn default_seed() -> u64 {
        0
    }

    fn start_point<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        counter: &EvaluationCounter,
        start: &[f64],
        bounds: &[Bounds],
        scales: &[f64],
    ) -> Result<(Vec<f64>, f64, usize), FitError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut x: Vec<f64> = start.iter().zip(bounds).map(|(&x, b)| b.clamp(x)).collect();
        let mut restarts = 0;
        loop {
            let last = match counter.try_ln_likelihood(posterior, &x) {
                Ok(ln_likelihood) => return Ok((x, -ln_likelihood, restarts)),
                Err(err) => err,
            };
            if restarts == self.max_restarts {
                return Err(FitError::AllEvaluationsFailed {
                    attempts: restarts + 1,
                    last,
                });
            }
            restarts += 1;
            tracing::warn!(restarts, error = %last, "invalid start point, drawing a new one");
            for (x, &x0, b, &s) in izip!(x.iter_mut(), start, bounds, scales) {
                *x = if b.is_finite() {
                    rng.random_range(b.lower..=b.upper)
                } else {
                    let shift: f64 = rng.sample(StandardNormal);
                    b.clamp(b.clamp(x0) + s * shift)
                };
            }
        }
    }
}

impl Default for LocalOptimizer {
    fn default() -> Self {
        Self::new(
            Self::default_max_rounds(),
            Self::default_evaluations_per_round(),
            Self::default_rhobeg(),
            Self::default_ftol_rel(),
        )
    }
}

impl FitBackend for LocalOptimizer {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalOptimizer
    }

    fn run<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        start: &[f64],
        cancel: &CancelToken,
    ) -> Result<BackendOutput, FitError> {
        let ndim = posterior.ndim();
        if ndim == 0 {
            return Err(FitError::NoFreeParameters);
        }
        if start.len() != ndim {
            return Err(ParameterError::VectorLengthMismatch {
                expected: ndim,
                actual: start.len(),
            }
            .into());
        }
        tracing::info!(ndim, "local optimization started");

        let bounds = posterior.bounds();
        let scales: Vec<f64> = start
            .iter()
            .zip(&bounds)
            .map(|(&x, &b)| scale(x, b))
            .collect();
        let counter = EvaluationCounter::default();
        let mut warnings = vec![];

        let (x0, mut nll, restarts) = self.start_point(posterior, &counter, start, &bounds, &scales)?;
        if restarts > 0 {
            warnings.push(FitWarning::Restarted { restarts });
        }

        let to_original = |u: &[f64], x: &mut [f64]| {
            for (x, &u, &s, b) in izip!(x.iter_mut(), u, &scales, &bounds) {
                *x = b.clamp(u * s);
            }
        };
        let objective = |u: &[f64], _: &mut ()| -> f64 {
            let mut x = vec![0.0; u.len()];
            to_original(u, &mut x);
            match counter.try_ln_likelihood(posterior, &x) {
                Ok(ln_likelihood) => -ln_likelihood,
                Err(_) => PENALTY,
            }
        };
        let scaled_bounds: Vec<(f64, f64)> = bounds
            .iter()
            .zip(&scales)
            .map(|(b, &s)| ((b.lower / s).max(-FAR), (b.upper / s).min(FAR)))
            .collect();
        let constraints: Vec<&dyn Func<()>> = vec![];

        let mut u: Vec<f64> = x0.iter().zip(&scales).map(|(&x, &s)| x / s).collect();
        let mut rho = self.rhobeg;
        let mut status = FitStatus::NotConverged;
        let mut iterations = 0;
        for round in 0..self.max_rounds {
            if cancel.is_cancelled() {
                status = FitStatus::Cancelled;
                break;
            }
            let stop_tol = StopTols {
                ftol_rel: self.ftol_rel,
                ..StopTols::default()
            };
            let result = minimize(
                &objective,
                &u,
                &scaled_bounds,
                &constraints,
                (),
                self.evaluations_per_round,
                RhoBeg::All(rho),
                Some(stop_tol),
            );
            if cancel.is_cancelled() {
                status = FitStatus::Cancelled;
                break;
            }
            iterations += 1;
            let (tolerance_reached, u_round, nll_round) = match result {
                Ok((round_status, u_round, nll_round)) => (
                    matches!(
                        round_status,
                        cobyla::SuccessStatus::Success
                            | cobyla::SuccessStatus::FtolReached
                            | cobyla::SuccessStatus::XtolReached
                    ),
                    u_round,
                    nll_round,
                ),
                Err((_, u_round, nll_round)) => (false, u_round, nll_round),
            };
            let (improvement, step) = if nll_round.is_finite() && nll_round <= nll {
                let improvement = (nll - nll_round) / nll.abs().max(1.0);
                let step = u
                    .iter()
                    .zip(&u_round)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max);
                u = u_round;
                nll = nll_round;
                (improvement, step)
            } else {
                (0.0, 0.0)
            };
            tracing::debug!(round, nll, improvement, step, "optimization round finished");
            if tolerance_reached && improvement <= 10.0 * self.ftol_rel {
                status = FitStatus::Converged;
                break;
            }
            rho = step.clamp(1e-3 * self.rhobeg, self.rhobeg);
        }

        let mut best = vec![0.0; ndim];
        to_original(&u, &mut best);

        let covariance = if status == FitStatus::Cancelled {
            None
        } else {
            let steps: Vec<f64> = best
                .iter()
                .zip(&scales)
                .map(|(&x, &s)| self.hessian_step * if x != 0.0 { x.abs() } else { s })
                .collect();
            match hessian_covariance(posterior, &best, &steps, &bounds) {
                Ok(covariance) => Some(covariance),
                Err(reason) => {
                    tracing::warn!(%reason, "covariance is unavailable");
                    warnings.push(FitWarning::CovarianceUnavailable { reason });
                    None
                }
            }
        };

        tracing::info!(?status, nll, rounds = iterations, "local optimization finished");
        Ok(BackendOutput {
            kind: BackendKind::LocalOptimizer,
            status,
            best,
            covariance,
            samples: None,
            evidence: None,
            diagnostics: Diagnostics {
                iterations,
                evaluations: counter.evaluations(),
                failed_evaluations: counter.failures(),
                acceptance_fraction: None,
                warnings,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::EvaluationError;
    use crate::tests::*;

    /// Gaussian likelihood failing to evaluate above `threshold` in the first parameter
    struct Fragile {
        inner: GaussianPosterior,
        threshold: f64,
    }

    impl LogPosterior for Fragile {
        fn ndim(&self) -> usize {
            self.inner.ndim()
        }

        fn parameter_names(&self) -> Vec<String> {
            self.inner.parameter_names()
        }

        fn bounds(&self) -> Vec<Bounds> {
            self.inner.bounds()
        }

        fn ln_likelihood(&self, params: &[f64]) -> Result<f64, EvaluationError> {
            if params[0] > self.threshold {
                Err(EvaluationError::InvalidModel {
                    dataset: 0,
                    channel: 0,
                    value: -1.0,
                })
            } else {
                self.inner.ln_likelihood(params)
            }
        }

        fn ln_prior(&self, params: &[f64]) -> f64 {
            self.inner.ln_prior(params)
        }

        fn prior_transform(&self, unit: &[f64], out: &mut [f64]) -> Result<(), FitError> {
            self.inner.prior_transform(unit, out)
        }

        fn check_proper_prior(&self) -> Result<(), FitError> {
            self.inner.check_proper_prior()
        }
    }

    #[test]
    fn gaussian_optimum_and_covariance() {
        let posterior = GaussianPosterior::new(vec![3.0, -1.0], vec![0.5, 2.0], 0.3);
        let output = LocalOptimizer::default()
            .run(&posterior, &[1.0, 1.0], &CancelToken::new())
            .unwrap();
        assert_eq!(output.status, FitStatus::Converged);
        assert_abs_diff_eq!(output.best[0], 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(output.best[1], -1.0, epsilon = 1e-2);
        let cov = output.covariance.unwrap();
        assert_relative_eq!(cov[(0, 0)], 0.25, max_relative = 1e-2);
        assert_relative_eq!(cov[(1, 1)], 4.0, max_relative = 1e-2);
        assert_relative_eq!(cov[(0, 1)], 0.3, max_relative = 1e-2);
        assert!(output.diagnostics.warnings.is_empty());
    }

    #[test]
    fn optimum_on_bound() {
        let posterior = GaussianPosterior::new(vec![-1.0], vec![1.0], 0.0)
            .with_bounds(vec![Bounds::non_negative()]);
        let output = LocalOptimizer::default()
            .run(&posterior, &[2.0], &CancelToken::new())
            .unwrap();
        assert_abs_diff_eq!(output.best[0], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn restarts_from_invalid_start() {
        let posterior = Fragile {
            inner: GaussianPosterior::new(vec![2.0], vec![1.0], 0.0)
                .with_bounds(vec![Bounds::new(0.0, 10.0)]),
            threshold: 5.0,
        };
        let output = LocalOptimizer::default()
            .run(&posterior, &[8.0], &CancelToken::new())
            .unwrap();
        assert_abs_diff_eq!(output.best[0], 2.0, epsilon = 1e-3);
        assert!(
            output
                .diagnostics
                .warnings
                .iter()
                .any(|w| matches!(w, FitWarning::Restarted { .. }))
        );
        assert!(output.diagnostics.failed_evaluations > 0);
    }

    #[test]
    fn all_start_points_fail() {
        let posterior = Fragile {
            inner: GaussianPosterior::new(vec![2.0], vec![1.0], 0.0)
                .with_bounds(vec![Bounds::new(0.0, 10.0)]),
            threshold: -1.0,
        };
        let err = LocalOptimizer::default()
            .with_max_restarts(3)
            .run(&posterior, &[8.0], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, FitError::AllEvaluationsFailed { attempts: 4, .. }));
    }

    #[test]
    fn cancelled_before_first_round() {
        let posterior = GaussianPosterior::new(vec![3.0], vec![0.5], 0.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let output = LocalOptimizer::default().run(&posterior, &[1.0], &cancel).unwrap();
        assert_eq!(output.status, FitStatus::Cancelled);
        assert_eq!(output.diagnostics.iterations, 0);
        assert_eq!(output.best, vec![1.0]);
        assert!(output.covariance.is_none());
    }

    #[test]
    fn round_cap_gives_not_converged() {
        let posterior = GaussianPosterior::new(vec![30.0, -20.0], vec![0.5, 2.0], 0.0);
        let output = LocalOptimizer::new(1, 5, 0.5, 1e-8)
            .run(&posterior, &[1.0, 1.0], &CancelToken::new())
            .unwrap();
        assert_eq!(output.status, FitStatus::NotConverged);
        assert_eq!(output.diagnostics.iterations, 1);
    }

    #[test]
    fn serde_defaults() {
        let optimizer: LocalOptimizer = serde_json::from_str(r#"{"max_rounds": 3}"#).unwrap();
        assert_eq!(optimizer.max_rounds, 3);
        assert_eq!(optimizer.rhobeg, LocalOptimizer::default_rhobeg());
    }
}
