use crate::error::{FitError, ParameterError};
use crate::fit::backend::{FitBackend, Sampler};
use crate::fit::bounds::scale;
use crate::fit::{
    BackendKind, BackendOutput, CancelToken, Diagnostics, EvaluationCounter, FitStatus,
    LogPosterior, SampleEnsemble,
};

use emcee::{EnsembleSampler, Guess, Prob};
use itertools::izip;
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_distr::StandardNormal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Affine-invariant ensemble sampler
///
/// Thin wrapper over [emcee::EnsembleSampler], the stretch move of Goodman & Weare (2010) as
/// implemented by Foreman-Mackey et al. (2013). `emcee` works in single precision, walker
/// positions are converted to `f64` before the posterior is evaluated.
///
/// Walkers start from a Gaussian ball around the start point, its width is `initial_spread`
/// times the typical magnitude of each parameter. The first `burn_in` iterations are dropped,
/// every `thin`-th of the remaining is recorded.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "EnsembleMcmc", default)]
pub struct EnsembleMcmc {
    pub nwalkers: usize,
    pub niterations: usize,
    pub burn_in: usize,
    pub thin: usize,
    pub initial_spread: f64,
    pub seed: u64,
}

impl EnsembleMcmc {
    /// Create a new [EnsembleMcmc]
    ///
    /// `nwalkers` must be even and larger than twice the number of free parameters, it is
    /// checked when the sampler runs.
    pub fn new(nwalkers: usize, niterations: usize, burn_in: usize, thin: usize) -> Self {
        assert!(thin > 0, "thin must be positive");
        Self {
            nwalkers,
            niterations,
            burn_in,
            thin,
            initial_spread: Self::default_initial_spread(),
            seed: Self::default_seed(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_initial_spread(mut self, initial_spread: f64) -> Self {
        assert!(initial_spread > 0.0, "initial_spread must be positive");
        self.initial_spread = initial_spread;
        self
    }

    #[inline]
    pub fn default_nwalkers() -> usize {
        32
    }

    #[inline]
    pub fn default_niterations() -> usize {
        2000
    }

    #[inline]
    pub fn default_burn_in() -> usize {
        500
    }

    #[inline]
    pub fn default_thin() -> usize {
        1
    }

    #[inline]
    pub fn default_initial_spread() -> f64 {
        1e-2
    }

    #[inline]
    pub fn default_seed() -> u64 {
        0
    }

    fn validate(&self, ndim: usize) -> Result<(), FitError> {
        if self.nwalkers <= 2 * ndim || self.nwalkers % 2 != 0 {
            return Err(FitError::InvalidConfig(format!(
                "number of walkers must be even and larger than {}, {} given",
                2 * ndim,
                self.nwalkers
            )));
        }
        if self.thin == 0 {
            return Err(FitError::InvalidConfig("thin must be positive".to_owned()));
        }
        Ok(())
    }
}

impl Default for EnsembleMcmc {
    fn default() -> Self {
        Self::new(
            Self::default_nwalkers(),
            Self::default_niterations(),
            Self::default_burn_in(),
            Self::default_thin(),
        )
    }
}

fn to_f64(values: &[f32]) -> Vec<f64> {
    values.iter().map(|&x| x as f64).collect()
}

fn to_f32(ln_p: f64) -> f32 {
    if ln_p.is_nan() {
        f32::NEG_INFINITY
    } else {
        ln_p as f32
    }
}

/// [LogPosterior] as seen by `emcee`
///
/// Once cancellation is requested every point is rejected without evaluating the likelihood,
/// the current iteration is then dropped by the caller.
struct EmceePosterior<'a, P: ?Sized> {
    posterior: &'a P,
    counter: &'a EvaluationCounter,
    cancel: &'a CancelToken,
}

impl<P: LogPosterior + ?Sized> Prob for EmceePosterior<'_, P> {
    fn lnlike(&self, params: &Guess) -> f32 {
        if self.cancel.is_cancelled() {
            return f32::NEG_INFINITY;
        }
        to_f32(
            self.counter
                .ln_likelihood(self.posterior, &to_f64(&params.values)),
        )
    }

    fn lnprior(&self, params: &Guess) -> f32 {
        to_f32(self.posterior.ln_prior(&to_f64(&params.values)))
    }

    fn lnprob(&self, params: &Guess) -> f32 {
        let ln_prior = self.lnprior(params);
        if !ln_prior.is_finite() {
            return f32::NEG_INFINITY;
        }
        ln_prior + self.lnlike(params)
    }
}

impl FitBackend for EnsembleMcmc {
    fn kind(&self) -> BackendKind {
        BackendKind::EnsembleMcmc
    }

    fn run<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        start: &[f64],
        cancel: &CancelToken,
    ) -> Result<BackendOutput, FitError> {
        let ndim = posterior.ndim();
        if start.len() != ndim {
            return Err(ParameterError::VectorLengthMismatch {
                expected: ndim,
                actual: start.len(),
            }
            .into());
        }
        self.validate(ndim)?;
        tracing::info!(
            ndim,
            nwalkers = self.nwalkers,
            niterations = self.niterations,
            "ensemble MCMC started"
        );

        let bounds = posterior.bounds();
        let counter = EvaluationCounter::default();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let initial_guess: Vec<Guess> = (0..self.nwalkers)
            .map(|_| {
                let values: Vec<f32> = start
                    .iter()
                    .zip(&bounds)
                    .map(|(&x, &b)| {
                        let shift: f64 = rng.sample(StandardNormal);
                        b.clamp(b.clamp(x) + self.initial_spread * scale(x, b) * shift) as f32
                    })
                    .collect();
                Guess::new(&values)
            })
            .collect();
        let model = EmceePosterior {
            posterior,
            counter: &counter,
            cancel,
        };
        if initial_guess
            .iter()
            .all(|guess| !model.lnprob(guess).is_finite())
        {
            return Err(FitError::NonFiniteLogPosterior {
                walkers: self.nwalkers,
            });
        }

        let mut sampler = EnsembleSampler::new(self.nwalkers, ndim, &model)
            .map_err(|err| FitError::InvalidConfig(format!("{err:?}")))?;
        sampler.seed(&[self.seed as _]);

        let mut best: Option<(Vec<f64>, f64)> = None;
        let mut samples: Vec<f64> = vec![];
        let mut sample_ln_posterior: Vec<f64> = vec![];
        let mut sample_ln_likelihood: Vec<f64> = vec![];
        let mut previous: Vec<Vec<f32>> =
            initial_guess.iter().map(|guess| guess.values.clone()).collect();
        let mut accepted = 0usize;
        let mut iterations = 0;
        let mut status = FitStatus::Converged;
        sampler
            .sample(&initial_guess, self.niterations, |step| {
                if status == FitStatus::Cancelled {
                    return;
                }
                if cancel.is_cancelled() {
                    status = FitStatus::Cancelled;
                    return;
                }
                let iteration = iterations;
                let record =
                    iteration >= self.burn_in && (iteration - self.burn_in) % self.thin == 0;
                for (guess, prev, &ln_p) in
                    izip!(step.pos.iter(), previous.iter_mut(), step.lnprob.iter())
                {
                    if guess.values != *prev {
                        accepted += 1;
                        prev.clone_from(&guess.values);
                    }
                    let ln_p = ln_p as f64;
                    if best.as_ref().is_none_or(|(_, best_ln_p)| ln_p > *best_ln_p) {
                        best = Some((to_f64(&guess.values), ln_p));
                    }
                    if record {
                        let x = to_f64(&guess.values);
                        sample_ln_likelihood.push(ln_p - posterior.ln_prior(&x));
                        sample_ln_posterior.push(ln_p);
                        samples.extend(x);
                    }
                }
                iterations += 1;
                if (iteration + 1) % 100 == 0 {
                    tracing::debug!(
                        iteration,
                        acceptance = accepted as f64 / (iterations * self.nwalkers) as f64,
                        "ensemble MCMC progress"
                    );
                }
            })
            .map_err(|err| FitError::InvalidConfig(format!("{err:?}")))?;

        let best_x = match best {
            Some((x, ln_p)) if ln_p.is_finite() => x,
            _ => initial_guess
                .iter()
                .map(|guess| (to_f64(&guess.values), model.lnprob(guess)))
                .fold((start.to_vec(), f32::NEG_INFINITY), |acc, (x, ln_p)| {
                    if ln_p > acc.1 { (x, ln_p) } else { acc }
                })
                .0,
        };
        let nsamples = sample_ln_posterior.len();
        let samples = SampleEnsemble::new(
            Array2::from_shape_vec((nsamples, ndim), samples)
                .map_err(|err| FitError::InvalidConfig(err.to_string()))?,
            Array1::from_vec(sample_ln_posterior),
            Array1::from_vec(sample_ln_likelihood),
        );
        let acceptance_fraction =
            (iterations > 0).then(|| accepted as f64 / (iterations * self.nwalkers) as f64);
        tracing::info!(?status, iterations, ?acceptance_fraction, "ensemble MCMC finished");

        Ok(BackendOutput {
            kind: BackendKind::EnsembleMcmc,
            status,
            best: best_x,
            covariance: None,
            samples: Some(samples),
            evidence: None,
            diagnostics: Diagnostics {
                iterations,
                evaluations: counter.evaluations(),
                failed_evaluations: counter.failures(),
                acceptance_fraction,
                warnings: vec![],
            },
        })
    }
}

impl Sampler for EnsembleMcmc {}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::EvaluationError;
    use crate::params::Bounds;
    use crate::tests::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn samples_gaussian() {
        let posterior = GaussianPosterior::new(vec![1.0, -3.0], vec![0.5, 2.0], 0.5);
        let mcmc = EnsembleMcmc::new(16, 3000, 500, 5).with_initial_spread(0.1);
        let output = mcmc.run(&posterior, &[0.0, 0.0], &CancelToken::new()).unwrap();
        assert_eq!(output.status, FitStatus::Converged);
        assert_eq!(output.diagnostics.iterations, 3000);
        let samples = output.samples.unwrap();
        assert_eq!(samples.len(), 16 * 500);
        let acceptance = output.diagnostics.acceptance_fraction.unwrap();
        assert!(acceptance > 0.2 && acceptance < 0.9, "{acceptance}");

        let mean = samples.samples().mean_axis(ndarray::Axis(0)).unwrap();
        assert_abs_diff_eq!(mean[0], 1.0, epsilon = 0.1);
        assert_abs_diff_eq!(mean[1], -3.0, epsilon = 0.4);
        let cov = samples.covariance().unwrap();
        assert_relative_eq!(cov[(0, 0)].sqrt(), 0.5, max_relative = 0.15);
        assert_relative_eq!(cov[(1, 1)].sqrt(), 2.0, max_relative = 0.15);
        assert_abs_diff_eq!(cov[(0, 1)] / (0.5 * 2.0), 0.5, epsilon = 0.15);
    }

    #[test]
    fn respects_bounds() {
        let posterior = GaussianPosterior::new(vec![0.0], vec![1.0], 0.0)
            .with_bounds(vec![Bounds::non_negative()]);
        let output = EnsembleMcmc::new(8, 500, 100, 1)
            .run(&posterior, &[1.0], &CancelToken::new())
            .unwrap();
        let samples = output.samples.unwrap();
        assert!(samples.samples().iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn same_seed_gives_identical_chains() {
        let posterior = GaussianPosterior::new(vec![1.0, 2.0], vec![1.0, 1.0], 0.0);
        let mcmc = EnsembleMcmc::new(8, 200, 50, 2).with_seed(42);
        let first = mcmc
            .run(&posterior, &[0.0, 0.0], &CancelToken::new())
            .unwrap();
        let second = mcmc
            .run(&posterior, &[0.0, 0.0], &CancelToken::new())
            .unwrap();
        assert_eq!(first.samples, second.samples);
        assert_eq!(first.best, second.best);

        let other_seed = mcmc
            .with_seed(43)
            .run(&posterior, &[0.0, 0.0], &CancelToken::new())
            .unwrap();
        assert_ne!(first.samples, other_seed.samples);
    }

    #[test]
    fn walker_count_is_validated() {
        let posterior = GaussianPosterior::new(vec![0.0; 3], vec![1.0; 3], 0.0);
        for nwalkers in [4, 6, 7] {
            let err = EnsembleMcmc::new(nwalkers, 10, 0, 1)
                .run(&posterior, &[0.0; 3], &CancelToken::new())
                .unwrap_err();
            assert!(matches!(err, FitError::InvalidConfig(_)));
        }
    }

    #[test]
    fn non_finite_start() {
        let posterior = GaussianPosterior::new(vec![0.0], vec![1.0], 0.0)
            .with_bounds(vec![Bounds::new(0.0, 1.0)]);

        struct Nowhere(GaussianPosterior);

        impl LogPosterior for Nowhere {
            fn ndim(&self) -> usize {
                1
            }
            fn parameter_names(&self) -> Vec<String> {
                self.0.parameter_names()
            }
            fn bounds(&self) -> Vec<Bounds> {
                self.0.bounds()
            }
            fn ln_likelihood(&self, _params: &[f64]) -> Result<f64, EvaluationError> {
                Ok(f64::NAN)
            }
            fn ln_prior(&self, params: &[f64]) -> f64 {
                self.0.ln_prior(params)
            }
            fn prior_transform(&self, unit: &[f64], out: &mut [f64]) -> Result<(), FitError> {
                self.0.prior_transform(unit, out)
            }
            fn check_proper_prior(&self) -> Result<(), FitError> {
                Ok(())
            }
        }

        let err = EnsembleMcmc::new(4, 10, 0, 1)
            .run(&Nowhere(posterior), &[0.5], &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, FitError::NonFiniteLogPosterior { walkers: 4 });
    }

    /// Cancels the token once `limit` likelihood evaluations were made
    struct Cancelling {
        inner: GaussianPosterior,
        cancel: CancelToken,
        count: AtomicUsize,
        limit: usize,
    }

    impl LogPosterior for Cancelling {
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
            if self.count.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
                self.cancel.cancel();
            }
            self.inner.ln_likelihood(params)
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
    fn cancellation_keeps_completed_iterations() {
        let nwalkers = 8;
        let completed = 5;
        let cancel = CancelToken::new();
        let posterior = Cancelling {
            inner: GaussianPosterior::new(vec![0.0, 0.0], vec![1.0, 1.0], 0.0),
            cancel: cancel.clone(),
            count: AtomicUsize::new(0),
            // initial ensemble checked twice, completed iterations, then a part of the next one
            limit: nwalkers * (2 + completed) + 3,
        };
        let output = EnsembleMcmc::new(nwalkers, 100, 0, 1)
            .run(&posterior, &[0.0, 0.0], &cancel)
            .unwrap();
        assert_eq!(output.status, FitStatus::Cancelled);
        assert_eq!(output.diagnostics.iterations, completed);
        assert_eq!(output.samples.unwrap().len(), completed * nwalkers);
    }

    #[test]
    fn sampler_capability() {
        let posterior = GaussianPosterior::new(vec![0.0], vec![1.0], 0.0);
        let ensemble = EnsembleMcmc::new(4, 20, 10, 1)
            .sample(&posterior, &[0.0], &CancelToken::new())
            .unwrap();
        assert_eq!(ensemble.len(), 40);
        assert_eq!(ensemble.ndim(), 1);
    }
}
