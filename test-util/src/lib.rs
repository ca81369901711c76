//! Synthetic data for tests and benchmarks

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::sync::Arc;
use xspex::{CompositeModel, EnergyBins, InstrumentResponse, ObservedSpectrum, fold};

/// Response with perfect energy resolution and constant effective area, cm^2
pub fn diagonal_response(low: f64, high: f64, nchannels: usize, area: f64) -> Arc<InstrumentResponse> {
    let bins = EnergyBins::linspace(low, high, nchannels).unwrap();
    Arc::new(InstrumentResponse::diagonal(bins, Array1::from_elem(nchannels, area)).unwrap())
}

/// Response with Gaussian energy resolution of constant `fwhm`, keV
///
/// Photon bins are `oversampling` times finer than the channels. Photons redistributed outside
/// of the channel range are lost.
pub fn gaussian_response(
    low: f64,
    high: f64,
    nchannels: usize,
    oversampling: usize,
    fwhm: f64,
    area: f64,
) -> Arc<InstrumentResponse> {
    let channels = EnergyBins::linspace(low, high, nchannels).unwrap();
    let photon_bins = EnergyBins::linspace(low, high, nchannels * oversampling).unwrap();
    let sigma = fwhm / (8.0 * f64::ln(2.0)).sqrt();
    let cdf = |x: f64| 0.5 * libm::erfc(-x / (sigma * std::f64::consts::SQRT_2));
    let redistribution = Array2::from_shape_fn((photon_bins.len(), channels.len()), |(i, j)| {
        let e = 0.5 * (photon_bins.lower(i) + photon_bins.upper(i));
        cdf(channels.upper(j) - e) - cdf(channels.lower(j) - e)
    });
    Arc::new(
        InstrumentResponse::with_effective_area(
            photon_bins.clone(),
            channels,
            redistribution,
            Array1::from_elem(photon_bins.len(), area),
        )
        .unwrap(),
    )
}

/// Expected counts of `model` folded through `response`, the model is evaluated on the response
/// photon grid
pub fn expected_counts(
    model: &CompositeModel,
    response: &Arc<InstrumentResponse>,
    params: &[f64],
    exposure: f64,
) -> Array1<f64> {
    let bins = response.photon_bins();
    let flux = model.evaluate(bins, params).unwrap();
    let exposure = Array1::from_elem(response.channels().len(), exposure);
    fold(flux.view(), bins, response.clone(), exposure.view(), None).unwrap()
}

/// Poisson realisation of `expected` counts
pub fn poisson_counts<R: Rng>(rng: &mut R, expected: &Array1<f64>) -> Array1<f64> {
    expected.mapv(|lambda| {
        if lambda > 0.0 {
            Poisson::new(lambda).unwrap().sample(rng)
        } else {
            0.0
        }
    })
}

/// Spectrum of Poisson counts drawn from `model` with parameters `params`
pub fn synthetic_spectrum<R: Rng>(
    rng: &mut R,
    model: &CompositeModel,
    response: &Arc<InstrumentResponse>,
    params: &[f64],
    exposure: f64,
) -> ObservedSpectrum {
    let expected = expected_counts(model, response, params, exposure);
    ObservedSpectrum::new(
        response.channels().clone(),
        poisson_counts(rng, &expected),
        exposure,
    )
    .unwrap()
}
