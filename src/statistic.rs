use ndarray::{ArrayView1, Zip};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fit statistic comparing observed counts with folded model counts
///
/// Both statistics are `-2 ln L` up to a term depending on the data only, so the negative
/// log-likelihood is half of the statistic value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Statistic {
    /// Poisson likelihood ratio (Cash-type):
    /// `2 (model - data + data ln(data / model))`, `2 model` for empty channels
    #[default]
    Poisson,
    /// `((data - model) / error)^2`
    Chi2,
}

impl Statistic {
    /// Contribution of a single channel
    #[inline]
    pub fn channel(self, data: f64, model: f64, error: f64) -> f64 {
        match self {
            Self::Poisson => {
                if data > 0.0 {
                    if model > 0.0 {
                        2.0 * (model - data + data * f64::ln(data / model))
                    } else {
                        f64::INFINITY
                    }
                } else {
                    2.0 * model
                }
            }
            Self::Chi2 => {
                let residual = (data - model) / error;
                residual * residual
            }
        }
    }

    /// Sum over channels where `mask` is set
    pub fn evaluate(
        self,
        data: ArrayView1<f64>,
        model: ArrayView1<f64>,
        error: ArrayView1<f64>,
        mask: ArrayView1<bool>,
    ) -> f64 {
        Zip::from(data)
            .and(model)
            .and(error)
            .and(mask)
            .fold(0.0, |acc, &d, &m, &e, &use_channel| {
                if use_channel {
                    acc + self.channel(d, m, e)
                } else {
                    acc
                }
            })
    }
}
