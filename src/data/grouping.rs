use crate::error::DataError;

use ndarray::{Array1, ArrayView1};
use std::ops::Range;

/// Partition of detector channels into consecutive groups
///
/// Every group is flagged as fitted or not, regrouped spectra exclude unfitted groups from
/// the statistic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelGrouping {
    groups: Vec<Range<usize>>,
    fitted: Vec<bool>,
    nchannels: usize,
}

impl ChannelGrouping {
    /// Group channels so that every group holds at least `min_counts` counts
    ///
    /// Channels are scanned from low to high energy, a group is closed as soon as its counts
    /// reach the minimum. Trailing channels which cannot reach the minimum keep their native
    /// binning and are excluded from the fit. Fails if no group reaches the minimum.
    pub fn min_counts(counts: ArrayView1<f64>, min_counts: f64) -> Result<Self, DataError> {
        if !min_counts.is_finite() || min_counts <= 0.0 {
            return Err(DataError::InvalidGroupMinimum(min_counts));
        }
        let nchannels = counts.len();
        if nchannels == 0 {
            return Err(DataError::LengthMismatch {
                what: "counts",
                expected: 1,
                actual: 0,
            });
        }

        let mut groups: Vec<Range<usize>> = vec![];
        let mut start: Option<usize> = None;
        let mut accumulated = 0.0;
        for (i, &c) in counts.iter().enumerate() {
            let first = *start.get_or_insert(i);
            accumulated += c;
            if accumulated >= min_counts {
                groups.push(first..i + 1);
                start = None;
                accumulated = 0.0;
            }
        }
        if groups.is_empty() {
            return Err(DataError::GroupMinimumUnreachable {
                total: counts.sum(),
                minimum: min_counts,
            });
        }
        let mut fitted = vec![true; groups.len()];
        if let Some(first) = start {
            tracing::debug!(
                channels = nchannels - first,
                counts = accumulated,
                "channels left over from grouping are excluded from the fit"
            );
            groups.extend((first..nchannels).map(|i| i..i + 1));
            fitted.resize(groups.len(), false);
        }
        Ok(Self {
            groups,
            fitted,
            nchannels,
        })
    }

    /// Grouping from explicit consecutive ranges which must cover `0..nchannels`
    pub fn from_ranges(groups: Vec<Range<usize>>, nchannels: usize) -> Result<Self, DataError> {
        let mut expected_start = 0;
        for (i, g) in groups.iter().enumerate() {
            if g.start != expected_start || g.end <= g.start {
                return Err(DataError::NonIncreasingEdges { index: i });
            }
            expected_start = g.end;
        }
        if expected_start != nchannels {
            return Err(DataError::GroupingMismatch {
                expected: nchannels,
                actual: expected_start,
            });
        }
        Ok(Self {
            fitted: vec![true; groups.len()],
            groups,
            nchannels,
        })
    }

    /// One group per channel
    pub fn identity(nchannels: usize) -> Self {
        Self {
            groups: (0..nchannels).map(|i| i..i + 1).collect(),
            fitted: vec![true; nchannels],
            nchannels,
        }
    }

    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }

    /// Whether each group enters the fit
    pub fn fitted(&self) -> &[bool] {
        &self.fitted
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of ungrouped channels
    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    pub(crate) fn check_channels(&self, nchannels: usize) -> Result<(), DataError> {
        if nchannels != self.nchannels {
            return Err(DataError::GroupingMismatch {
                expected: nchannels,
                actual: self.nchannels,
            });
        }
        Ok(())
    }

    pub(crate) fn sum(&self, values: ArrayView1<f64>) -> Array1<f64> {
        self.groups
            .iter()
            .map(|g| values.slice(ndarray::s![g.clone()]).sum())
            .collect()
    }

    pub(crate) fn quadrature_sum(&self, values: ArrayView1<f64>) -> Array1<f64> {
        self.groups
            .iter()
            .map(|g| {
                values
                    .slice(ndarray::s![g.clone()])
                    .iter()
                    .map(|x| x * x)
                    .sum::<f64>()
                    .sqrt()
            })
            .collect()
    }

    /// A group is fitted if the grouping fits it and every merged channel was fitted
    pub(crate) fn fit_mask(&self, channel_mask: ArrayView1<bool>) -> Array1<bool> {
        self.groups
            .iter()
            .zip(&self.fitted)
            .map(|(g, &fitted)| {
                fitted && channel_mask.slice(ndarray::s![g.clone()]).iter().all(|&m| m)
            })
            .collect()
    }

    pub(crate) fn mean(&self, values: ArrayView1<f64>) -> Array1<f64> {
        self.groups
            .iter()
            .map(|g| values.slice(ndarray::s![g.clone()]).sum() / (g.len() as f64))
            .collect()
    }
}
