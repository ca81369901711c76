use crate::session::SessionState;

use serde::{Deserialize, Serialize};

/// Parameter value outside the physical domain of a model
///
/// Returned by model plugin functions, the registry attaches the model name to it.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
#[error("{parameter} = {value} is outside the valid domain: {reason}")]
pub struct DomainError {
    pub parameter: String,
    pub value: f64,
    pub reason: String,
}

impl DomainError {
    pub fn new(parameter: impl Into<String>, value: f64, reason: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            value,
            reason: reason.into(),
        }
    }
}

/// Error returned from a single model evaluation
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("model {model}: {source}")]
    Domain {
        model: String,
        #[source]
        source: DomainError,
    },

    #[error("model {model} expects {expected} parameter values, got {actual}")]
    ParameterCount {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("model {model} returned {actual} flux values for {expected} energy bins")]
    WrongLength {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("model {model} returned a non-finite value {value} in energy bin {bin}")]
    NonFinite { model: String, bin: usize, value: f64 },
}

/// Error of model registration and composition
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("model {0} is already registered")]
    DuplicateModel(String),

    #[error("model {0} is not registered")]
    UnknownModel(String),

    #[error("invalid composition: {0}")]
    InvalidComposition(String),

    #[error("model {model} declares parameter {parameter} twice")]
    DuplicateParameter { model: String, parameter: String },
}

/// Error of spectrum and response construction
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum DataError {
    #[error("at least {minimum} edges are required, {actual} given")]
    TooFewEdges { actual: usize, minimum: usize },

    #[error("bin edges must be finite and strictly increasing, edge {index} violates it")]
    NonIncreasingEdges { index: usize },

    #[error("{what} has length {actual}, {expected} expected")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} has an invalid element {index}: {value}")]
    InvalidValue {
        what: &'static str,
        index: usize,
        value: f64,
    },

    #[error("exposure must be positive and finite, {0} given")]
    InvalidExposure(f64),

    #[error("minimum counts per group must be positive, {0} given")]
    InvalidGroupMinimum(f64),

    #[error("no group reaches {minimum} counts, the spectrum has {total} counts in total")]
    GroupMinimumUnreachable { total: f64, minimum: f64 },

    #[error("channel grouping covers {actual} channels, {expected} expected")]
    GroupingMismatch { expected: usize, actual: usize },
}

/// Error of folding a model flux through an instrument response
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum FoldError {
    #[error(
        "model energy grid [{model_min}, {model_max}] does not overlap response grid [{response_min}, {response_max}]"
    )]
    GridMismatch {
        model_min: f64,
        model_max: f64,
        response_min: f64,
        response_max: f64,
    },

    #[error("{what} has length {actual}, {expected} expected")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Error of parameter space manipulation
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum ParameterError {
    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    #[error("parameter {0} is already defined")]
    DuplicateParameter(String),

    #[error("tie would introduce a cycle: {}", .cycle.join(" -> "))]
    CyclicTie { cycle: Vec<String> },

    #[error("parameter {0} is tied, its value is derived from its tie expression")]
    ParameterTied(String),

    #[error("value {value} of parameter {name} is outside of its bounds [{lower}, {upper}]")]
    OutOfBounds {
        name: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("invalid bounds [{lower}, {upper}] for parameter {name}")]
    InvalidBounds { name: String, lower: f64, upper: f64 },

    #[error("value of parameter {0} must be finite")]
    NonFiniteValue(String),

    #[error("parameter vector has length {actual}, {expected} free parameters expected")]
    VectorLengthMismatch { expected: usize, actual: usize },

    #[error("parameter layout version {actual} is stale, current version is {expected}")]
    StaleLayout { expected: u64, actual: u64 },

    #[error("tie expression divides by zero")]
    TieDivisionByZero,
}

/// Error of a single objective evaluation
///
/// Backends absorb these errors and treat the point as having zero likelihood.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum EvaluationError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("folded model is invalid in dataset {dataset}, channel {channel}: {value} counts")]
    InvalidModel {
        dataset: usize,
        channel: usize,
        value: f64,
    },

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Fold(#[from] FoldError),
}

/// Error terminating a backend run or its set-up
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum FitError {
    #[error("log-posterior is non-finite at every one of {walkers} starting positions")]
    NonFiniteLogPosterior { walkers: usize },

    #[error("objective evaluation failed at every one of {attempts} starting points, last error: {last}")]
    AllEvaluationsFailed { attempts: usize, last: String },

    #[error("parameter {parameter} has neither a prior nor finite bounds")]
    ImproperPrior { parameter: String },

    #[error("prior of parameter {parameter} has no probability mass within its bounds")]
    EmptyPrior { parameter: String },

    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("model has {model} parameters while the parameter space has {space}")]
    ModelSpaceMismatch { model: usize, space: usize },

    #[error("parameter {position} is {model:?} in the model but {space:?} in the parameter space")]
    ParameterNameMismatch {
        position: usize,
        model: String,
        space: String,
    },

    #[error("no free parameters to fit")]
    NoFreeParameters,

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Fold(#[from] FoldError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Error of the fit session life cycle
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("fit session needs at least one dataset")]
    NoDatasets,

    #[error("fit session needs a model")]
    NoModel,

    #[error("fit session needs a non-empty parameter space")]
    EmptyParameterSpace,

    #[error("fit session needs a backend")]
    NoBackend,

    #[error("operation is valid only for a running session, current state is {0:?}")]
    NotRunning(SessionState),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Non-fatal annotation attached to a [crate::FitResult]
#[derive(Clone, Debug, thiserror::Error, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    #[error("covariance is unavailable: {reason}")]
    CovarianceUnavailable { reason: String },

    #[error("initial point was invalid, optimisation restarted {restarts} times")]
    Restarted { restarts: usize },

    #[error("{count} nested-sampling replacements found no better point and duplicated a live point")]
    StalledReplacements { count: usize },
}
