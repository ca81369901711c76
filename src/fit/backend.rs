use crate::error::FitError;
use crate::fit::{
    BackendKind, BackendOutput, CancelToken, EnsembleMcmc, LocalOptimizer, LogPosterior,
    NestedSampling, SampleEnsemble,
};

use enum_dispatch::enum_dispatch;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fit algorithm working on a [LogPosterior]
#[enum_dispatch]
pub trait FitBackend {
    fn kind(&self) -> BackendKind;

    /// Run the algorithm starting from the free-parameter vector `start`
    ///
    /// Samplers use `start` as the centre of their initial population or ignore it.
    fn run<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        start: &[f64],
        cancel: &CancelToken,
    ) -> Result<BackendOutput, FitError>;
}

/// Backend producing posterior samples
pub trait Sampler: FitBackend {
    fn sample<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        start: &[f64],
        cancel: &CancelToken,
    ) -> Result<SampleEnsemble, FitError> {
        let output = self.run(posterior, start, cancel)?;
        Ok(output
            .samples
            .unwrap_or_else(|| SampleEnsemble::empty(posterior.ndim())))
    }
}

/// Backend selection with its configuration
#[enum_dispatch(FitBackend)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum BackendConfig {
    LocalOptimizer(LocalOptimizer),
    EnsembleMcmc(EnsembleMcmc),
    NestedSampling(NestedSampling),
}

impl Default for BackendConfig {
    fn default() -> Self {
        LocalOptimizer::default().into()
    }
}
