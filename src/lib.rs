#![doc = include_str!("../README.md")]

#[cfg(test)]
mod tests;

mod array_stats;

pub mod data;
pub use data::{Background, ChannelGrouping, EnergyBins, InstrumentResponse, ObservedSpectrum};

mod error;
pub use error::{
    DataError, DomainError, EvaluationError, FitError, FitWarning, FoldError, ModelError,
    ParameterError, RegistryError, SessionError,
};

pub mod fit;
pub use fit::prior::{self, LnPrior1D};
pub use fit::{
    BackendConfig, BackendKind, CancelToken, EnsembleMcmc, FitBackend, FitResult, FitStatus,
    LocalOptimizer, LogEvidence, LogPosterior, NestedSampling, ParameterSummary, SampleEnsemble,
    Sampler,
};

mod fold;
pub use fold::{Folder, fold};

pub mod model;
pub use model::{
    CombinationRule, ComponentKind, CompositeModel, ModelNode, ModelRegistry, ParameterSpec,
    SpectralComponent,
};

mod objective;
pub use objective::{Dataset, Objective};

pub mod params;
pub use params::{Bounds, Parameter, ParameterSpace, ParameterStatus, TieExpr};

pub mod prelude;

mod session;
pub use session::{CancelHandle, FitConfig, FitSession, FitSessionBuilder, SessionState};

mod sorted_array;

mod special;

mod statistic;
pub use statistic::Statistic;

mod types;
pub use types::{ConvolutionFn, FluxFn};

pub use ndarray;
