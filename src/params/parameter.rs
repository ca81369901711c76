use crate::fit::prior::LnPrior1D;
use crate::params::tie::TieExpr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Closed interval of allowed parameter values, either end may be infinite
///
/// Infinite ends are serialized as `null`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Bounds {
    #[serde(with = "infinite_as_null::lower")]
    #[schemars(with = "Option<f64>")]
    pub lower: f64,
    #[serde(with = "infinite_as_null::upper")]
    #[schemars(with = "Option<f64>")]
    pub upper: f64,
}

mod infinite_as_null {
    use serde::Serializer;

    fn serialize<S: Serializer>(x: f64, serializer: S) -> Result<S::Ok, S::Error> {
        if x.is_finite() {
            serializer.serialize_some(&x)
        } else {
            serializer.serialize_none()
        }
    }

    macro_rules! bound_end {
        ($name: ident, $infinity: expr) => {
            pub mod $name {
                use serde::{Deserialize, Deserializer, Serializer};

                pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
                    super::serialize(*x, serializer)
                }

                pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
                    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or($infinity))
                }
            }
        };
    }

    bound_end!(lower, f64::NEG_INFINITY);
    bound_end!(upper, f64::INFINITY);
}

impl Bounds {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub const fn unbounded() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub const fn non_negative() -> Self {
        Self::new(0.0, f64::INFINITY)
    }

    /// Valid bounds have `lower < upper` and no NaN ends
    pub fn is_valid(&self) -> bool {
        self.lower < self.upper
    }

    pub fn is_finite(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }

    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.lower, self.upper)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// How a parameter participates in a fit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterStatus {
    /// Varied by the fit backends
    Free,
    /// Kept at its value, still consumed by the model
    Frozen,
    /// Derived from other parameters via a [TieExpr]
    Tied,
}

/// Named model parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    value: f64,
    bounds: Bounds,
    frozen: bool,
    tie: Option<TieExpr>,
    prior: Option<LnPrior1D>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            bounds: Bounds::unbounded(),
            frozen: false,
            tie: None,
            prior: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn with_prior(mut self, prior: LnPrior1D) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn tie(&self) -> Option<&TieExpr> {
        self.tie.as_ref()
    }

    pub fn prior(&self) -> Option<&LnPrior1D> {
        self.prior.as_ref()
    }

    pub fn status(&self) -> ParameterStatus {
        if self.tie.is_some() {
            ParameterStatus::Tied
        } else if self.frozen {
            ParameterStatus::Frozen
        } else {
            ParameterStatus::Free
        }
    }

    pub(super) fn set_value_unchecked(&mut self, value: f64) {
        self.value = value;
    }

    pub(super) fn set_bounds_unchecked(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    pub(super) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub(super) fn set_tie(&mut self, tie: Option<TieExpr>) {
        self.tie = tie;
    }

    pub(super) fn set_prior(&mut self, prior: Option<LnPrior1D>) {
        self.prior = prior;
    }
}
