//! Spectral models: registration, composition and evaluation

use crate::params::Bounds;
use crate::types::{ConvolutionFn, FluxFn};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

mod composite;
pub use composite::{CombinationRule, CompositeModel, ModelNode};

pub mod library;

mod registry;
pub use registry::ModelRegistry;

/// Declaration of a model parameter: name, default value and bounds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub default: f64,
    pub bounds: Bounds,
    pub frozen: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
            bounds: Bounds::unbounded(),
            frozen: false,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.bounds = Bounds::new(lower, upper);
        self
    }

    /// The parameter starts frozen
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }
}

/// Role of a registered component in a composite model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Produces photon flux integrated over every energy bin
    Additive,
    /// Produces a dimensionless factor per energy bin, e.g. absorption
    Multiplicative,
    /// Transforms an incoming flux, e.g. energy-resolution broadening
    Convolution,
}

#[derive(Clone)]
pub(crate) enum ComponentFunction {
    Flux(Arc<FluxFn>),
    Convolution(Arc<ConvolutionFn>),
}

/// Registered model component
#[derive(Clone)]
pub struct SpectralComponent {
    name: String,
    kind: ComponentKind,
    parameters: Vec<ParameterSpec>,
    function: ComponentFunction,
}

impl SpectralComponent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub(crate) fn function(&self) -> &ComponentFunction {
        &self.function
    }
}

impl fmt::Debug for SpectralComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralComponent")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
