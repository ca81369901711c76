//! Built-in spectral models
//!
//! Energies are in keV, additive models return photon flux integrated over every energy bin.
//!
//! | name | kind | parameters |
//! |---|---|---|
//! | `constant` | additive | `norm` |
//! | `power_law` | additive | `norm`, `index` |
//! | `broken_power_law` | additive | `norm`, `index1`, `break_energy`, `index2` |
//! | `gaussian_line` | additive | `norm`, `centre`, `sigma` |
//! | `thermal_bremsstrahlung` | additive | `norm`, `kt` |
//! | `photoelectric_absorption` | multiplicative | `column` |
//! | `gaussian_broadening` | convolution | `fwhm` |

use crate::data::EnergyBins;
use crate::error::DomainError;
use crate::model::{ComponentFunction, ComponentKind, ParameterSpec, SpectralComponent};
use crate::special::normal_cdf;

use ndarray::{Array1, ArrayView1};
use std::sync::Arc;

pub(super) fn components() -> Vec<SpectralComponent> {
    fn flux(
        name: &str,
        kind: ComponentKind,
        parameters: Vec<ParameterSpec>,
        function: fn(&EnergyBins, &[f64]) -> Result<Array1<f64>, DomainError>,
    ) -> SpectralComponent {
        SpectralComponent {
            name: name.to_owned(),
            kind,
            parameters,
            function: ComponentFunction::Flux(Arc::new(function)),
        }
    }

    vec![
        flux(
            "constant",
            ComponentKind::Additive,
            vec![ParameterSpec::new("norm", 1.0).with_bounds(0.0, f64::INFINITY)],
            constant,
        ),
        flux(
            "power_law",
            ComponentKind::Additive,
            vec![
                ParameterSpec::new("norm", 1.0).with_bounds(0.0, f64::INFINITY),
                ParameterSpec::new("index", 2.0).with_bounds(-10.0, 10.0),
            ],
            power_law,
        ),
        flux(
            "broken_power_law",
            ComponentKind::Additive,
            vec![
                ParameterSpec::new("norm", 1.0).with_bounds(0.0, f64::INFINITY),
                ParameterSpec::new("index1", 2.0).with_bounds(-10.0, 10.0),
                ParameterSpec::new("break_energy", 10.0).with_bounds(0.0, f64::INFINITY),
                ParameterSpec::new("index2", 4.0).with_bounds(-10.0, 10.0),
            ],
            broken_power_law,
        ),
        flux(
            "gaussian_line",
            ComponentKind::Additive,
            vec![
                ParameterSpec::new("norm", 1.0).with_bounds(0.0, f64::INFINITY),
                ParameterSpec::new("centre", 6.7),
                ParameterSpec::new("sigma", 0.1).with_bounds(0.0, f64::INFINITY),
            ],
            gaussian_line,
        ),
        flux(
            "thermal_bremsstrahlung",
            ComponentKind::Additive,
            vec![
                ParameterSpec::new("norm", 1.0).with_bounds(0.0, f64::INFINITY),
                ParameterSpec::new("kt", 1.0).with_bounds(0.0, f64::INFINITY),
            ],
            thermal_bremsstrahlung,
        ),
        flux(
            "photoelectric_absorption",
            ComponentKind::Multiplicative,
            vec![ParameterSpec::new("column", 1.0).with_bounds(0.0, f64::INFINITY)],
            photoelectric_absorption,
        ),
        SpectralComponent {
            name: "gaussian_broadening".to_owned(),
            kind: ComponentKind::Convolution,
            parameters: vec![ParameterSpec::new("fwhm", 0.5).with_bounds(0.0, f64::INFINITY)],
            function: ComponentFunction::Convolution(Arc::new(gaussian_broadening)),
        },
    ]
}

fn non_negative(name: &str, value: f64) -> Result<(), DomainError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(DomainError::new(name, value, "must be non-negative"))
    }
}

fn positive(name: &str, value: f64) -> Result<(), DomainError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(DomainError::new(name, value, "must be positive"))
    }
}

/// `norm` photons per keV
pub fn constant(bins: &EnergyBins, params: &[f64]) -> Result<Array1<f64>, DomainError> {
    let norm = params[0];
    Ok(bins.widths() * norm)
}

/// Integral of `x^-index` over `[a, b]`
fn power_integral(a: f64, b: f64, index: f64) -> f64 {
    let p = 1.0 - index;
    if p.abs() < 1e-10 {
        f64::ln(b / a)
    } else {
        (b.powf(p) - a.powf(p)) / p
    }
}

/// `norm * E^-index`
pub fn power_law(bins: &EnergyBins, params: &[f64]) -> Result<Array1<f64>, DomainError> {
    let (norm, index) = (params[0], params[1]);
    positive("lowest energy", bins.min())?;
    Ok(Array1::from_iter(
        (0..bins.len()).map(|i| norm * power_integral(bins.lower(i), bins.upper(i), index)),
    ))
}

/// `norm * (E / break_energy)^-index1` below the break and `^-index2` above it
pub fn broken_power_law(bins: &EnergyBins, params: &[f64]) -> Result<Array1<f64>, DomainError> {
    let (norm, index1, e_break, index2) = (params[0], params[1], params[2], params[3]);
    positive("break_energy", e_break)?;
    positive("lowest energy", bins.min())?;
    let segment = |a: f64, b: f64| -> f64 {
        let below = if a < e_break {
            power_integral(a / e_break, b.min(e_break) / e_break, index1)
        } else {
            0.0
        };
        let above = if b > e_break {
            power_integral(a.max(e_break) / e_break, b / e_break, index2)
        } else {
            0.0
        };
        norm * e_break * (below + above)
    };
    Ok(Array1::from_iter(
        (0..bins.len()).map(|i| segment(bins.lower(i), bins.upper(i))),
    ))
}

/// Gaussian line with total flux `norm`
pub fn gaussian_line(bins: &EnergyBins, params: &[f64]) -> Result<Array1<f64>, DomainError> {
    let (norm, centre, sigma) = (params[0], params[1], params[2]);
    positive("sigma", sigma)?;
    let cdf: Array1<f64> = bins.edges().mapv(|e| normal_cdf((e - centre) / sigma));
    Ok(Array1::from_iter(
        cdf.windows(2).into_iter().map(|w| norm * (w[1] - w[0])),
    ))
}

/// Isothermal bremsstrahlung with unit Gaunt factor, `norm * exp(-E / kt) / (E * sqrt(kt))`
///
/// Integrated with the composite Simpson rule.
pub fn thermal_bremsstrahlung(
    bins: &EnergyBins,
    params: &[f64],
) -> Result<Array1<f64>, DomainError> {
    const INTERVALS: usize = 16;

    let (norm, kt) = (params[0], params[1]);
    positive("kt", kt)?;
    positive("lowest energy", bins.min())?;
    let coeff = norm / kt.sqrt();
    let density = |e: f64| coeff * f64::exp(-e / kt) / e;
    Ok(Array1::from_iter((0..bins.len()).map(|i| {
        let (a, b) = (bins.lower(i), bins.upper(i));
        let h = (b - a) / INTERVALS as f64;
        let inner: f64 = (1..INTERVALS)
            .map(|k| {
                let weight = if k % 2 == 1 { 4.0 } else { 2.0 };
                weight * density(a + k as f64 * h)
            })
            .sum();
        h / 3.0 * (density(a) + inner + density(b))
    })))
}

/// Transmission `exp(-column * (E / 1 keV)^(-8/3))` at the bin centres
///
/// `column` is the optical depth at 1 keV.
pub fn photoelectric_absorption(
    bins: &EnergyBins,
    params: &[f64],
) -> Result<Array1<f64>, DomainError> {
    let column = params[0];
    non_negative("column", column)?;
    positive("lowest energy", bins.min())?;
    Ok(bins
        .centers()
        .mapv(|e| f64::exp(-column * e.powf(-8.0 / 3.0))))
}

/// Gaussian energy-resolution kernel of full width at half maximum `fwhm`
///
/// The flux of every bin is treated as concentrated at its centre and spread over the grid,
/// flux spread outside of the grid is lost. Zero width is the identity.
pub fn gaussian_broadening(
    bins: &EnergyBins,
    params: &[f64],
    flux: ArrayView1<f64>,
) -> Result<Array1<f64>, DomainError> {
    const FWHM_TO_SIGMA: f64 = 0.42466090014400953; // 1 / (2 sqrt(2 ln 2))
    const CUTOFF: f64 = 8.0;

    let fwhm = params[0];
    non_negative("fwhm", fwhm)?;
    if fwhm == 0.0 {
        return Ok(flux.to_owned());
    }
    let sigma = fwhm * FWHM_TO_SIGMA;
    let edges = bins.edges();
    let centers = bins.centers();
    let mut out = Array1::zeros(bins.len());
    for (i, (&f, &c)) in flux.iter().zip(centers.iter()).enumerate() {
        if f == 0.0 {
            continue;
        }
        let first = edges
            .iter()
            .position(|&e| e > c - CUTOFF * sigma)
            .map_or(0, |k| k.saturating_sub(1));
        let mut previous = normal_cdf((edges[first] - c) / sigma);
        for j in first..bins.len() {
            let next = normal_cdf((edges[j + 1] - c) / sigma);
            out[j] += f * (next - previous);
            previous = next;
            if edges[j + 1] > c + CUTOFF * sigma && j >= i {
                break;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    fn fine_bins() -> EnergyBins {
        EnergyBins::logspace(1.0, 100.0, 400).unwrap()
    }

    #[test]
    fn power_law_integral() {
        let bins = EnergyBins::from_edges(array![1.0, 2.0, 4.0]).unwrap();
        let flux = power_law(&bins, &[3.0, 2.0]).unwrap();
        assert_relative_eq!(flux, array![1.5, 0.75], max_relative = 1e-12);
        let flux = power_law(&bins, &[1.0, 1.0]).unwrap();
        assert_relative_eq!(flux, array![f64::ln(2.0), f64::ln(2.0)], max_relative = 1e-9);
    }

    #[test]
    fn broken_power_law_matches_power_law_for_equal_indices() {
        let bins = fine_bins();
        let broken = broken_power_law(&bins, &[2.0, 1.7, 10.0, 1.7]).unwrap();
        let simple = power_law(&bins, &[2.0 * 10f64.powf(1.7), 1.7]).unwrap();
        assert_relative_eq!(broken, simple, max_relative = 1e-9);
    }

    #[test]
    fn broken_power_law_is_continuous_at_break() {
        let bins = EnergyBins::from_edges(array![9.0, 10.0, 11.0]).unwrap();
        let flux = broken_power_law(&bins, &[1.0, 2.0, 10.0, 4.0]).unwrap();
        assert_relative_eq!(flux[0], 10.0 * power_integral(0.9, 1.0, 2.0));
        assert_relative_eq!(flux[1], 10.0 * power_integral(1.0, 1.1, 4.0));
    }

    #[test]
    fn gaussian_line_total_flux() {
        let bins = EnergyBins::linspace(0.0, 20.0, 200).unwrap();
        let flux = gaussian_line(&bins, &[5.0, 6.7, 0.3]).unwrap();
        assert_relative_eq!(flux.sum(), 5.0, max_relative = 1e-12);
        assert!(gaussian_line(&bins, &[5.0, 6.7, 0.0]).is_err());
    }

    #[test]
    fn bremsstrahlung_simpson_accuracy() {
        let bins = EnergyBins::linspace(1.0, 2.0, 1).unwrap();
        let flux = thermal_bremsstrahlung(&bins, &[1.0, 1e6]).unwrap();
        // exp(-E/kT) is unity to 1e-6 here, the integral of 1/E is ln 2
        assert_relative_eq!(flux[0] * 1e3, f64::ln(2.0), max_relative = 1e-5);
        assert!(thermal_bremsstrahlung(&bins, &[1.0, -1.0]).is_err());
    }

    #[test]
    fn absorption_factor() {
        let bins = EnergyBins::from_edges(array![0.5, 1.5, 100.0]).unwrap();
        let factor = photoelectric_absorption(&bins, &[2.0]).unwrap();
        assert_relative_eq!(factor[0], f64::exp(-2.0));
        assert!(factor[1] > 0.99);
        assert!(photoelectric_absorption(&bins, &[-1.0]).is_err());
    }

    #[test]
    fn broadening_conserves_flux_inside_grid() {
        let bins = EnergyBins::linspace(0.0, 20.0, 400).unwrap();
        let line = gaussian_line(&bins, &[1.0, 10.0, 0.05]).unwrap();
        let broadened = gaussian_broadening(&bins, &[1.0], line.view()).unwrap();
        assert_relative_eq!(broadened.sum(), 1.0, max_relative = 1e-9);
        let peak = |a: &Array1<f64>| a.iter().copied().fold(0.0, f64::max);
        assert!(peak(&broadened) < peak(&line));
        let same = gaussian_broadening(&bins, &[0.0], line.view()).unwrap();
        assert_eq!(same, line);
    }
}
