use crate::error::{EvaluationError, FitError};
use crate::fit::LogPosterior;
use crate::params::Bounds;

pub use approx::{assert_abs_diff_eq, assert_relative_eq};
pub use rand::prelude::*;
pub use rand_distr::StandardNormal;

/// Normalised Gaussian likelihood with uniform priors within the bounds
///
/// Dimensions are independent except for the correlation `rho` between the first two.
#[derive(Clone, Debug)]
pub struct GaussianPosterior {
    mean: Vec<f64>,
    std: Vec<f64>,
    rho: f64,
    bounds: Vec<Bounds>,
}

impl GaussianPosterior {
    pub fn new(mean: Vec<f64>, std: Vec<f64>, rho: f64) -> Self {
        assert_eq!(mean.len(), std.len());
        assert!(rho.abs() < 1.0);
        let bounds = vec![Bounds::unbounded(); mean.len()];
        Self {
            mean,
            std,
            rho,
            bounds,
        }
    }

    pub fn with_bounds(mut self, bounds: Vec<Bounds>) -> Self {
        assert_eq!(bounds.len(), self.mean.len());
        self.bounds = bounds;
        self
    }

    /// Analytic ln-evidence for bounds much wider than the Gaussian
    pub fn ln_evidence(&self) -> f64 {
        -self
            .bounds
            .iter()
            .map(|b| f64::ln(b.upper - b.lower))
            .sum::<f64>()
    }
}

impl LogPosterior for GaussianPosterior {
    fn ndim(&self) -> usize {
        self.mean.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.ndim()).map(|i| format!("x{i}")).collect()
    }

    fn bounds(&self) -> Vec<Bounds> {
        self.bounds.clone()
    }

    fn ln_likelihood(&self, params: &[f64]) -> Result<f64, EvaluationError> {
        let z: Vec<f64> = params
            .iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((&x, &mu), &sigma)| (x - mu) / sigma)
            .collect();
        let ln_norm = -self
            .std
            .iter()
            .map(|&sigma| f64::ln(f64::sqrt(2.0 * std::f64::consts::PI) * sigma))
            .sum::<f64>();
        let (correlated, ln_det) = if z.len() >= 2 {
            let one_minus = 1.0 - self.rho * self.rho;
            (
                (z[0] * z[0] - 2.0 * self.rho * z[0] * z[1] + z[1] * z[1]) / one_minus,
                0.5 * one_minus.ln(),
            )
        } else {
            (z.iter().map(|z| z * z).sum(), 0.0)
        };
        let rest: f64 = z.iter().skip(2).map(|z| z * z).sum();
        Ok(ln_norm - ln_det - 0.5 * (correlated + rest))
    }

    fn ln_prior(&self, params: &[f64]) -> f64 {
        if params.iter().zip(&self.bounds).all(|(&x, b)| b.contains(x)) {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }

    fn prior_transform(&self, unit: &[f64], out: &mut [f64]) -> Result<(), FitError> {
        self.check_proper_prior()?;
        for ((x, &u), b) in out.iter_mut().zip(unit).zip(&self.bounds) {
            *x = b.lower + u * (b.upper - b.lower);
        }
        Ok(())
    }

    fn check_proper_prior(&self) -> Result<(), FitError> {
        match self.bounds.iter().position(|b| !b.is_finite()) {
            Some(i) => Err(FitError::ImproperPrior {
                parameter: format!("x{i}"),
            }),
            None => Ok(()),
        }
    }
}

pub fn randvec(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.sample(StandardNormal)).collect()
}

#[test]
fn gaussian_posterior_is_normalised() {
    let posterior = GaussianPosterior::new(vec![0.5], vec![2.0], 0.0);
    let step = 1e-3;
    let integral: f64 = (-20_000..20_000)
        .map(|i| posterior.ln_likelihood(&[i as f64 * step]).unwrap().exp() * step)
        .sum();
    assert_relative_eq!(integral, 1.0, max_relative = 1e-6);
}
