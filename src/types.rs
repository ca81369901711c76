use crate::data::EnergyBins;
use crate::error::DomainError;

use ndarray::{Array1, ArrayView1};

/// Additive or multiplicative model: bin-integrated flux, or a dimensionless factor, per bin
pub type FluxFn =
    dyn Fn(&EnergyBins, &[f64]) -> Result<Array1<f64>, DomainError> + Send + Sync + 'static;

/// Convolution model: transforms an incoming bin-integrated flux
pub type ConvolutionFn = dyn Fn(&EnergyBins, &[f64], ArrayView1<f64>) -> Result<Array1<f64>, DomainError>
    + Send
    + Sync
    + 'static;
