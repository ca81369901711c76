use crate::error::FitError;
use crate::fit::prior::ln_prior_1d::{LnPrior1D, LnPrior1DTrait};
use crate::params::{Bounds, ParameterSpace};

/// Natural logarithm of the joint prior of the free parameters
///
/// Parameters are independent, each has an optional [LnPrior1D] truncated to its bounds. A
/// parameter without a prior has a flat prior within its bounds.
#[derive(Clone, Debug)]
pub struct IndependentLnPrior {
    components: Vec<Component>,
}

#[derive(Clone, Debug)]
struct Component {
    name: String,
    prior: Option<LnPrior1D>,
    bounds: Bounds,
}

impl IndependentLnPrior {
    /// Prior over the free parameters of `space`, in vector order
    pub fn from_space(space: &ParameterSpace) -> Self {
        let components = space
            .free_names()
            .into_iter()
            .zip(space.free_priors())
            .zip(space.free_bounds())
            .map(|((name, prior), bounds)| Component {
                name: name.to_owned(),
                prior,
                bounds,
            })
            .collect();
        Self { components }
    }

    pub fn ndim(&self) -> usize {
        self.components.len()
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        self.components.iter().map(|c| c.bounds).collect()
    }

    /// Unnormalized ln-prior, `-inf` outside of the bounds
    pub fn ln_prior(&self, params: &[f64]) -> f64 {
        debug_assert_eq!(params.len(), self.components.len());
        let mut ln_prior = 0.0;
        for (c, &x) in self.components.iter().zip(params) {
            if !c.bounds.contains(x) {
                return f64::NEG_INFINITY;
            }
            if let Some(prior) = &c.prior {
                ln_prior += prior.ln_prior_1d(x);
            }
        }
        ln_prior
    }

    /// Fails unless [IndependentLnPrior::prior_transform] is defined for every component
    pub fn check_proper(&self) -> Result<(), FitError> {
        for c in &self.components {
            c.truncation()?;
        }
        Ok(())
    }

    /// Map a point of the unit hypercube onto the parameter space
    ///
    /// Every coordinate goes through the quantile function of the component prior truncated to
    /// the bounds, or is spread uniformly over the bounds if there is no prior.
    pub fn prior_transform(&self, unit: &[f64], out: &mut [f64]) -> Result<(), FitError> {
        debug_assert_eq!(unit.len(), self.components.len());
        debug_assert_eq!(out.len(), self.components.len());
        for ((c, &u), x) in self.components.iter().zip(unit).zip(out.iter_mut()) {
            *x = match c.truncation()? {
                Truncation::Flat { lower, upper } => lower + u * (upper - lower),
                Truncation::Prior { prior, cdf_lower, cdf_upper } => {
                    let v = cdf_lower + u * (cdf_upper - cdf_lower);
                    // inverse_cdf is Some for priors having passed truncation()
                    let value = prior.inverse_cdf(v).unwrap_or(f64::NAN);
                    c.bounds.clamp(value)
                }
            };
        }
        Ok(())
    }
}

enum Truncation<'a> {
    Flat {
        lower: f64,
        upper: f64,
    },
    Prior {
        prior: &'a LnPrior1D,
        cdf_lower: f64,
        cdf_upper: f64,
    },
}

impl Component {
    fn truncation(&self) -> Result<Truncation<'_>, FitError> {
        let prior = match &self.prior {
            Some(prior) if prior.is_proper() => prior,
            _ => {
                return if self.bounds.is_finite() {
                    Ok(Truncation::Flat {
                        lower: self.bounds.lower,
                        upper: self.bounds.upper,
                    })
                } else {
                    Err(FitError::ImproperPrior {
                        parameter: self.name.clone(),
                    })
                };
            }
        };
        let cdf = |x: f64| prior.cdf(x).unwrap_or(f64::NAN);
        let cdf_lower = if self.bounds.lower.is_finite() {
            cdf(self.bounds.lower)
        } else {
            0.0
        };
        let cdf_upper = if self.bounds.upper.is_finite() {
            cdf(self.bounds.upper)
        } else {
            1.0
        };
        if cdf_upper > cdf_lower {
            Ok(Truncation::Prior {
                prior,
                cdf_lower,
                cdf_upper,
            })
        } else {
            Err(FitError::EmptyPrior {
                parameter: self.name.clone(),
            })
        }
    }
}
