use crate::special::{normal_cdf, normal_ppf};

use enum_dispatch::enum_dispatch;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[enum_dispatch]
pub trait LnPrior1DTrait: Clone + Debug + Serialize + DeserializeOwned + PartialEq {
    /// Natural logarithm of the prior density at x
    fn ln_prior_1d(&self, x: f64) -> f64;

    /// Cumulative distribution function, `None` for improper priors
    fn cdf(&self, x: f64) -> Option<f64>;

    /// Quantile function mapping `u` from the unit interval onto the parameter,
    /// `None` for improper priors
    fn inverse_cdf(&self, u: f64) -> Option<f64>;
}

/// Natural logarithm of prior for a single model parameter
#[enum_dispatch(LnPrior1DTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum LnPrior1D {
    None(NoneLnPrior1D),
    LogNormal(LogNormalLnPrior1D),
    LogUniform(LogUniformLnPrior1D),
    Normal(NormalLnPrior1D),
    Uniform(UniformLnPrior1D),
    Mix(MixLnPrior1D),
}

impl LnPrior1D {
    pub fn none() -> Self {
        NoneLnPrior1D {}.into()
    }

    pub fn log_normal(mu: f64, std: f64) -> Self {
        LogNormalLnPrior1D::new(mu, std).into()
    }

    pub fn log_uniform(left: f64, right: f64) -> Self {
        LogUniformLnPrior1D::new(left, right).into()
    }

    pub fn normal(mu: f64, std: f64) -> Self {
        NormalLnPrior1D::new(mu, std).into()
    }

    pub fn uniform(left: f64, right: f64) -> Self {
        UniformLnPrior1D::new(left, right).into()
    }

    pub fn mix(weight_prior_pairs: &[(f64, LnPrior1D)]) -> Self {
        MixLnPrior1D::new(weight_prior_pairs).into()
    }

    /// Proper priors integrate to unity and have a quantile function
    pub fn is_proper(&self) -> bool {
        self.inverse_cdf(0.5).is_some()
    }
}

/// Flat improper prior
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NoneLnPrior1D {}

impl LnPrior1DTrait for NoneLnPrior1D {
    fn ln_prior_1d(&self, _x: f64) -> f64 {
        0.0
    }

    fn cdf(&self, _x: f64) -> Option<f64> {
        None
    }

    fn inverse_cdf(&self, _u: f64) -> Option<f64> {
        None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(
    into = "LogNormalLnPrior1DParameters",
    from = "LogNormalLnPrior1DParameters"
)]
pub struct LogNormalLnPrior1D {
    mu: f64,
    std: f64,
    ln_prob_coeff: f64,
}

impl LogNormalLnPrior1D {
    pub fn new(mu: f64, std: f64) -> Self {
        assert!(mu.is_finite(), "mu must be finite");
        assert!(std.is_finite() && std > 0.0, "std must be positive and finite");
        Self {
            mu,
            std,
            ln_prob_coeff: -f64::ln(std) - 0.5 * f64::ln(std::f64::consts::TAU),
        }
    }
}

impl LnPrior1DTrait for LogNormalLnPrior1D {
    fn ln_prior_1d(&self, x: f64) -> f64 {
        if x.is_nan() || x <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let ln_x = f64::ln(x);
        let z = (ln_x - self.mu) / self.std;
        self.ln_prob_coeff - 0.5 * z * z - ln_x
    }

    fn cdf(&self, x: f64) -> Option<f64> {
        if x <= 0.0 {
            return Some(0.0);
        }
        Some(normal_cdf((f64::ln(x) - self.mu) / self.std))
    }

    fn inverse_cdf(&self, u: f64) -> Option<f64> {
        Some(f64::exp(self.mu + self.std * normal_ppf(u)))
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename = "LogNormalLnPrior1D")]
struct LogNormalLnPrior1DParameters {
    mu: f64,
    std: f64,
}

impl From<LogNormalLnPrior1D> for LogNormalLnPrior1DParameters {
    fn from(f: LogNormalLnPrior1D) -> Self {
        Self {
            mu: f.mu,
            std: f.std,
        }
    }
}

impl From<LogNormalLnPrior1DParameters> for LogNormalLnPrior1D {
    fn from(f: LogNormalLnPrior1DParameters) -> Self {
        Self::new(f.mu, f.std)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(
    into = "LogUniformLnPrior1DParameters",
    from = "LogUniformLnPrior1DParameters"
)]
pub struct LogUniformLnPrior1D {
    ln_left: f64,
    ln_right: f64,
    ln_prob_coeff: f64,
}

impl LogUniformLnPrior1D {
    pub fn new(left: f64, right: f64) -> Self {
        assert!(left > 0.0, "left must be positive");
        assert!(left < right, "right must be larger than left");
        assert!(right.is_finite(), "right must be finite");
        let (ln_left, ln_right) = (f64::ln(left), f64::ln(right));
        Self {
            ln_left,
            ln_right,
            ln_prob_coeff: -f64::ln(ln_right - ln_left),
        }
    }
}

impl LnPrior1DTrait for LogUniformLnPrior1D {
    fn ln_prior_1d(&self, x: f64) -> f64 {
        let ln_x = f64::ln(x);
        if (self.ln_left..=self.ln_right).contains(&ln_x) {
            self.ln_prob_coeff - ln_x
        } else {
            f64::NEG_INFINITY
        }
    }

    fn cdf(&self, x: f64) -> Option<f64> {
        if x <= 0.0 {
            return Some(0.0);
        }
        let t = (f64::ln(x) - self.ln_left) / (self.ln_right - self.ln_left);
        Some(t.clamp(0.0, 1.0))
    }

    fn inverse_cdf(&self, u: f64) -> Option<f64> {
        Some(f64::exp(self.ln_left + u * (self.ln_right - self.ln_left)))
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename = "LogUniformLnPrior1D")]
struct LogUniformLnPrior1DParameters {
    ln_range: std::ops::RangeInclusive<f64>,
}

impl From<LogUniformLnPrior1D> for LogUniformLnPrior1DParameters {
    fn from(f: LogUniformLnPrior1D) -> Self {
        Self {
            ln_range: f.ln_left..=f.ln_right,
        }
    }
}

impl From<LogUniformLnPrior1DParameters> for LogUniformLnPrior1D {
    fn from(f: LogUniformLnPrior1DParameters) -> Self {
        Self::new(f.ln_range.start().exp(), f.ln_range.end().exp())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(into = "NormalLnPrior1DParameters", from = "NormalLnPrior1DParameters")]
pub struct NormalLnPrior1D {
    mu: f64,
    std: f64,
    ln_prob_coeff: f64,
}

impl NormalLnPrior1D {
    pub fn new(mu: f64, std: f64) -> Self {
        assert!(mu.is_finite(), "mu must be finite");
        assert!(std.is_finite() && std > 0.0, "std must be positive and finite");
        Self {
            mu,
            std,
            ln_prob_coeff: -f64::ln(std) - 0.5 * f64::ln(std::f64::consts::TAU),
        }
    }
}

impl LnPrior1DTrait for NormalLnPrior1D {
    fn ln_prior_1d(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.std;
        self.ln_prob_coeff - 0.5 * z * z
    }

    fn cdf(&self, x: f64) -> Option<f64> {
        Some(normal_cdf((x - self.mu) / self.std))
    }

    fn inverse_cdf(&self, u: f64) -> Option<f64> {
        Some(self.mu + self.std * normal_ppf(u))
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename = "NormalLnPrior1D")]
struct NormalLnPrior1DParameters {
    mu: f64,
    std: f64,
}

impl From<NormalLnPrior1D> for NormalLnPrior1DParameters {
    fn from(f: NormalLnPrior1D) -> Self {
        Self {
            mu: f.mu,
            std: f.std,
        }
    }
}

impl From<NormalLnPrior1DParameters> for NormalLnPrior1D {
    fn from(f: NormalLnPrior1DParameters) -> Self {
        Self::new(f.mu, f.std)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(
    into = "UniformLnPrior1DParameters",
    from = "UniformLnPrior1DParameters"
)]
pub struct UniformLnPrior1D {
    left: f64,
    right: f64,
    ln_prob: f64,
}

impl UniformLnPrior1D {
    pub fn new(left: f64, right: f64) -> Self {
        assert!(
            left.is_finite() && right.is_finite(),
            "left and right must be finite"
        );
        assert!(left < right, "right must be larger than left");
        Self {
            left,
            right,
            ln_prob: -f64::ln(right - left),
        }
    }
}

impl LnPrior1DTrait for UniformLnPrior1D {
    fn ln_prior_1d(&self, x: f64) -> f64 {
        if (self.left..=self.right).contains(&x) {
            self.ln_prob
        } else {
            f64::NEG_INFINITY
        }
    }

    fn cdf(&self, x: f64) -> Option<f64> {
        Some(((x - self.left) / (self.right - self.left)).clamp(0.0, 1.0))
    }

    fn inverse_cdf(&self, u: f64) -> Option<f64> {
        Some(self.left + u * (self.right - self.left))
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename = "UniformLnPrior1D")]
struct UniformLnPrior1DParameters {
    range: std::ops::RangeInclusive<f64>,
}

impl From<UniformLnPrior1D> for UniformLnPrior1DParameters {
    fn from(f: UniformLnPrior1D) -> Self {
        Self {
            range: f.left..=f.right,
        }
    }
}

impl From<UniformLnPrior1DParameters> for UniformLnPrior1D {
    fn from(f: UniformLnPrior1DParameters) -> Self {
        Self::new(*f.range.start(), *f.range.end())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MixLnPrior1D {
    mix: Vec<(f64, LnPrior1D)>,
}

impl MixLnPrior1D {
    /// Create MixLnPrior1D from pairs of a weight (positive number) and an instance of `LnPrior1D`
    pub fn new(weight_prior_pairs: &[(f64, LnPrior1D)]) -> Self {
        assert!(!weight_prior_pairs.is_empty(), "mix must not be empty");
        let total_weight: f64 = weight_prior_pairs.iter().map(|(weight, _)| *weight).sum();
        let mix = weight_prior_pairs
            .iter()
            .map(|(weight, prior)| {
                assert!(
                    weight.is_finite() && *weight > 0.0,
                    "weights must be positive and finite"
                );
                (*weight / total_weight, prior.clone())
            })
            .collect();
        Self { mix }
    }
}

impl LnPrior1DTrait for MixLnPrior1D {
    fn ln_prior_1d(&self, x: f64) -> f64 {
        let prob: f64 = self
            .mix
            .iter()
            .map(|(weight, prior)| weight * f64::exp(prior.ln_prior_1d(x)))
            .sum();
        f64::ln(prob)
    }

    fn cdf(&self, x: f64) -> Option<f64> {
        self.mix
            .iter()
            .map(|(weight, prior)| prior.cdf(x).map(|c| weight * c))
            .sum()
    }

    /// Bisection between the smallest and the largest component quantiles
    fn inverse_cdf(&self, u: f64) -> Option<f64> {
        let quantiles = self
            .mix
            .iter()
            .map(|(_, prior)| prior.inverse_cdf(u))
            .collect::<Option<Vec<_>>>()?;
        let mut left = quantiles.iter().copied().fold(f64::INFINITY, f64::min);
        let mut right = quantiles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(left.is_finite() && right.is_finite()) || left == right {
            return Some(left);
        }
        for _ in 0..200 {
            let middle = 0.5 * (left + right);
            if middle <= left || middle >= right {
                break;
            }
            if self.cdf(middle)? < u {
                left = middle;
            } else {
                right = middle;
            }
        }
        Some(0.5 * (left + right))
    }
}
