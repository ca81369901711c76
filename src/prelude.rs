//! Traits and types needed by most fits
//!
//! ```
//! use xspex::prelude::*;
//! ```

pub use crate::data::{EnergyBins, InstrumentResponse, ObservedSpectrum};
pub use crate::fit::prior::LnPrior1DTrait;
pub use crate::fit::{
    BackendConfig, EnsembleMcmc, FitBackend, LocalOptimizer, LogPosterior, NestedSampling,
    Sampler,
};
pub use crate::model::{CombinationRule, ModelRegistry};
pub use crate::objective::Dataset;
pub use crate::params::{Bounds, TieExpr};
pub use crate::session::{FitConfig, FitSession};
pub use crate::statistic::Statistic;
pub use crate::LnPrior1D;
