use crate::error::DataError;

use itertools::Itertools;
use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

/// Contiguous energy bins defined by their edges, keV
///
/// Edges are finite and strictly increasing, so there is always at least one bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct EnergyBins {
    edges: Array1<f64>,
}

impl EnergyBins {
    pub fn from_edges(edges: impl Into<Array1<f64>>) -> Result<Self, DataError> {
        let edges = edges.into();
        if edges.len() < 2 {
            return Err(DataError::TooFewEdges {
                actual: edges.len(),
                minimum: 2,
            });
        }
        if let Some((i, _)) = edges
            .iter()
            .tuple_windows()
            .enumerate()
            .find(|(_, (a, b))| !(a.is_finite() && b.is_finite() && b > a))
        {
            return Err(DataError::NonIncreasingEdges { index: i + 1 });
        }
        Ok(Self { edges })
    }

    /// `nbins` equal-width bins between `low` and `high`
    pub fn linspace(low: f64, high: f64, nbins: usize) -> Result<Self, DataError> {
        Self::from_edges(Array1::linspace(low, high, nbins + 1))
    }

    /// `nbins` bins with logarithmically spaced edges between `low` and `high`
    pub fn logspace(low: f64, high: f64, nbins: usize) -> Result<Self, DataError> {
        if low.is_nan() || low <= 0.0 {
            return Err(DataError::InvalidValue {
                what: "lowest logarithmic edge",
                index: 0,
                value: low,
            });
        }
        Self::from_edges(Array1::logspace(
            std::f64::consts::E,
            low.ln(),
            high.ln(),
            nbins + 1,
        ))
    }

    /// Number of bins
    #[inline]
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn edges(&self) -> ArrayView1<'_, f64> {
        self.edges.view()
    }

    #[inline]
    pub fn lower(&self, i: usize) -> f64 {
        self.edges[i]
    }

    #[inline]
    pub fn upper(&self, i: usize) -> f64 {
        self.edges[i + 1]
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.edges[0]
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    pub fn lowers(&self) -> ArrayView1<'_, f64> {
        self.edges.slice(ndarray::s![..-1])
    }

    pub fn uppers(&self) -> ArrayView1<'_, f64> {
        self.edges.slice(ndarray::s![1..])
    }

    pub fn widths(&self) -> Array1<f64> {
        Zip::from(self.lowers())
            .and(self.uppers())
            .map_collect(|&lo, &hi| hi - lo)
    }

    pub fn centers(&self) -> Array1<f64> {
        Zip::from(self.lowers())
            .and(self.uppers())
            .map_collect(|&lo, &hi| 0.5 * (lo + hi))
    }

    /// Length of the energy interval covered by both bin sets
    pub fn overlap(&self, other: &Self) -> f64 {
        (self.max().min(other.max()) - self.min().max(other.min())).max(0.0)
    }

    /// Merge consecutive bins, `groups` are consecutive half-open index ranges covering all bins
    pub(crate) fn regroup(&self, groups: &[std::ops::Range<usize>]) -> Result<Self, DataError> {
        let edges: Vec<f64> = std::iter::once(self.edges[groups[0].start])
            .chain(groups.iter().map(|g| self.edges[g.end]))
            .collect();
        Self::from_edges(edges)
    }
}

impl TryFrom<Vec<f64>> for EnergyBins {
    type Error = DataError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_edges(value)
    }
}

impl From<EnergyBins> for Vec<f64> {
    fn from(value: EnergyBins) -> Self {
        value.edges.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    #[test]
    fn widths_and_centers() {
        let bins = EnergyBins::from_edges(vec![1.0, 2.0, 4.0, 8.0]).unwrap();
        assert_eq!(bins.len(), 3);
        assert_abs_diff_eq!(bins.widths().as_slice().unwrap(), &[1.0, 2.0, 4.0][..]);
        assert_abs_diff_eq!(bins.centers().as_slice().unwrap(), &[1.5, 3.0, 6.0][..]);
    }

    #[test]
    fn rejects_unsorted_edges() {
        assert_eq!(
            EnergyBins::from_edges(vec![1.0, 3.0, 2.0]),
            Err(DataError::NonIncreasingEdges { index: 2 })
        );
        assert_eq!(
            EnergyBins::from_edges(vec![1.0]),
            Err(DataError::TooFewEdges {
                actual: 1,
                minimum: 2
            })
        );
    }

    #[test]
    fn overlap_of_partially_covering_grids() {
        let a = EnergyBins::linspace(3.0, 10.0, 7).unwrap();
        let b = EnergyBins::linspace(8.0, 20.0, 6).unwrap();
        assert_abs_diff_eq!(a.overlap(&b), 2.0);
        let c = EnergyBins::linspace(30.0, 40.0, 2).unwrap();
        assert_eq!(a.overlap(&c), 0.0);
    }

    #[test]
    fn logspace_edges() {
        let bins = EnergyBins::logspace(1.0, 100.0, 2).unwrap();
        assert_abs_diff_eq!(
            bins.edges().as_slice().unwrap(),
            &[1.0, 10.0, 100.0][..],
            epsilon = 1e-9
        );
    }

    #[test]
    fn serde_round_trip_validates() {
        let json = serde_json::to_string(&EnergyBins::linspace(0.0, 1.0, 2).unwrap()).unwrap();
        assert_eq!(json, "[0.0,0.5,1.0]");
        assert!(serde_json::from_str::<EnergyBins>("[1.0,0.0]").is_err());
    }
}
