//! Fit backends: local optimisation, ensemble MCMC and nested sampling
//!
//! Every backend works with a [LogPosterior] over the flat vector of free parameters and never
//! sees parameter names, ties or frozen values. Evaluation errors of single points are absorbed:
//! the optimiser replaces them by a large penalty, the samplers by zero likelihood. Only
//! configuration errors and total failures end a run with [crate::FitError].
//!
//! Runs are cooperative with respect to cancellation: a shared [CancelToken] is checked between
//! iterations, and the iteration during which cancellation was requested is discarded.

use crate::error::{EvaluationError, FitError};
use crate::params::Bounds;

use std::sync::atomic::{AtomicUsize, Ordering};

pub mod backend;
pub use backend::{BackendConfig, FitBackend, Sampler};

mod bounds;

mod cancel;
pub use cancel::CancelToken;

mod hessian;

pub mod mcmc;
pub use mcmc::EnsembleMcmc;

pub mod nested;
pub use nested::NestedSampling;

pub mod optimizer;
pub use optimizer::LocalOptimizer;

pub mod prior;

pub mod result;
pub use result::{
    BackendKind, BackendOutput, Diagnostics, FitResult, FitStatus, LogEvidence, ParameterSummary,
    SampleEnsemble,
};

/// Log-posterior density over the free-parameter vector
pub trait LogPosterior: Sync {
    fn ndim(&self) -> usize;

    fn parameter_names(&self) -> Vec<String>;

    fn bounds(&self) -> Vec<Bounds>;

    fn ln_likelihood(&self, params: &[f64]) -> Result<f64, EvaluationError>;

    /// Unnormalized ln-prior, `-inf` outside of the bounds
    fn ln_prior(&self, params: &[f64]) -> f64;

    /// Map a point of the unit hypercube onto the parameter space following the prior
    fn prior_transform(&self, unit: &[f64], out: &mut [f64]) -> Result<(), FitError>;

    /// Fails if [LogPosterior::prior_transform] is undefined
    fn check_proper_prior(&self) -> Result<(), FitError>;

    /// `ln_likelihood + ln_prior`, `-inf` if either is undefined
    fn ln_posterior(&self, params: &[f64]) -> f64 {
        let ln_prior = self.ln_prior(params);
        if ln_prior == f64::NEG_INFINITY {
            return ln_prior;
        }
        match self.ln_likelihood(params) {
            Ok(ln_likelihood) if !ln_likelihood.is_nan() => ln_likelihood + ln_prior,
            _ => f64::NEG_INFINITY,
        }
    }
}

/// Thread-safe counter of objective evaluations within a backend run
#[derive(Debug, Default)]
pub(crate) struct EvaluationCounter {
    evaluations: AtomicUsize,
    failures: AtomicUsize,
}

impl EvaluationCounter {
    fn ln_likelihood<P: LogPosterior + ?Sized>(&self, posterior: &P, params: &[f64]) -> f64 {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        match posterior.ln_likelihood(params) {
            Ok(value) if !value.is_nan() => value,
            result => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = result {
                    tracing::trace!(%err, "evaluation failed");
                }
                f64::NEG_INFINITY
            }
        }
    }

    /// Counted ln-likelihood keeping the cause of a failure
    fn try_ln_likelihood<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        params: &[f64],
    ) -> Result<f64, String> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let result = match posterior.ln_likelihood(params) {
            Ok(value) if value.is_finite() => Ok(value),
            Ok(value) => Err(format!("log-likelihood is {value}")),
            Err(err) => Err(err.to_string()),
        };
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

