//! Folding of model photon flux into expected detector counts
//!
//! The instrument photon grid is authoritative: a model evaluated on any other energy grid is
//! rebinned onto the response photon bins before the response matrix is applied. Model flux is
//! integrated over its bins, so rebinning distributes every model bin over the response bins
//! proportionally to their overlap, which conserves photons inside the common energy range.
//! Response bins outside of the model grid receive no flux.

use crate::data::{EnergyBins, InstrumentResponse};
use crate::error::FoldError;

use ndarray::{Array1, ArrayView1, Zip};
use std::sync::Arc;

/// Pre-computed folding pipeline for one model grid and one response
#[derive(Clone, Debug)]
pub struct Folder {
    model_bins: EnergyBins,
    response: Arc<InstrumentResponse>,
    rebin: Option<Vec<RebinWeight>>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct RebinWeight {
    source: usize,
    target: usize,
    fraction: f64,
}

impl Folder {
    /// Fails with [FoldError::GridMismatch] if the grids have no energy range in common
    pub fn new(model_bins: EnergyBins, response: Arc<InstrumentResponse>) -> Result<Self, FoldError> {
        let photon_bins = response.photon_bins();
        if model_bins.overlap(photon_bins) <= 0.0 {
            return Err(FoldError::GridMismatch {
                model_min: model_bins.min(),
                model_max: model_bins.max(),
                response_min: photon_bins.min(),
                response_max: photon_bins.max(),
            });
        }
        let rebin = if &model_bins == photon_bins {
            None
        } else {
            Some(rebin_weights(&model_bins, photon_bins))
        };
        Ok(Self {
            model_bins,
            response,
            rebin,
        })
    }

    pub fn model_bins(&self) -> &EnergyBins {
        &self.model_bins
    }

    pub fn response(&self) -> &InstrumentResponse {
        &self.response
    }

    /// Model flux resampled onto the response photon grid
    pub fn resample(&self, flux: ArrayView1<f64>) -> Result<Array1<f64>, FoldError> {
        if flux.len() != self.model_bins.len() {
            return Err(FoldError::ShapeMismatch {
                what: "model flux",
                expected: self.model_bins.len(),
                actual: flux.len(),
            });
        }
        Ok(match &self.rebin {
            None => flux.to_owned(),
            Some(weights) => {
                let mut out = Array1::zeros(self.response.photon_bins().len());
                for w in weights {
                    out[w.target] += flux[w.source] * w.fraction;
                }
                out
            }
        })
    }

    /// Expected counts per channel: `exposure * (response applied to flux) + background`
    pub fn fold(
        &self,
        flux: ArrayView1<f64>,
        exposure: ArrayView1<f64>,
        background: Option<ArrayView1<f64>>,
    ) -> Result<Array1<f64>, FoldError> {
        let nchannels = self.response.channels().len();
        if exposure.len() != nchannels {
            return Err(FoldError::ShapeMismatch {
                what: "exposure",
                expected: nchannels,
                actual: exposure.len(),
            });
        }
        let photon_flux = self.resample(flux)?;
        let mut counts = self.response.apply(photon_flux.view()) * exposure;
        if let Some(background) = background {
            if background.len() != nchannels {
                return Err(FoldError::ShapeMismatch {
                    what: "background",
                    expected: nchannels,
                    actual: background.len(),
                });
            }
            Zip::from(&mut counts)
                .and(background)
                .for_each(|c, &b| *c += b);
        }
        Ok(counts)
    }
}

/// One-off folding of `flux` given on `model_bins`, see [Folder::fold]
pub fn fold(
    flux: ArrayView1<f64>,
    model_bins: &EnergyBins,
    response: Arc<InstrumentResponse>,
    exposure: ArrayView1<f64>,
    background: Option<ArrayView1<f64>>,
) -> Result<Array1<f64>, FoldError> {
    Folder::new(model_bins.clone(), response)?.fold(flux, exposure, background)
}

fn rebin_weights(source: &EnergyBins, target: &EnergyBins) -> Vec<RebinWeight> {
    let mut weights = vec![];
    let mut j = 0;
    for i in 0..source.len() {
        let (lo, hi) = (source.lower(i), source.upper(i));
        while j < target.len() && target.upper(j) <= lo {
            j += 1;
        }
        let mut k = j;
        while k < target.len() && target.lower(k) < hi {
            let overlap = hi.min(target.upper(k)) - lo.max(target.lower(k));
            if overlap > 0.0 {
                weights.push(RebinWeight {
                    source: i,
                    target: k,
                    fraction: overlap / (hi - lo),
                });
            }
            k += 1;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn response(bins: EnergyBins) -> Arc<InstrumentResponse> {
        let n = bins.len();
        Arc::new(InstrumentResponse::diagonal(bins, Array1::from_elem(n, 2.0)).unwrap())
    }

    #[test]
    fn same_grid_folds_directly() {
        let bins = EnergyBins::linspace(1.0, 5.0, 4).unwrap();
        let folder = Folder::new(bins.clone(), response(bins)).unwrap();
        let counts = folder
            .fold(
                array![1.0, 2.0, 3.0, 4.0].view(),
                Array1::from_elem(4, 10.0).view(),
                Some(array![1.0, 1.0, 1.0, 1.0].view()),
            )
            .unwrap();
        assert_abs_diff_eq!(counts, array![21.0, 41.0, 61.0, 81.0]);
    }

    #[test]
    fn finer_model_grid_is_summed_into_response_bins() {
        let model_bins = EnergyBins::linspace(1.0, 5.0, 8).unwrap();
        let folder = Folder::new(model_bins, response(EnergyBins::linspace(1.0, 5.0, 4).unwrap()))
            .unwrap();
        let photon_flux = folder.resample(Array1::ones(8).view()).unwrap();
        assert_abs_diff_eq!(photon_flux, array![2.0, 2.0, 2.0, 2.0], epsilon = 1e-12);
    }

    #[test]
    fn partial_overlap_conserves_common_flux() {
        let model_bins = EnergyBins::linspace(3.0, 10.0, 7).unwrap();
        let folder = Folder::new(
            model_bins,
            response(EnergyBins::from_edges(array![1.0, 2.5, 4.0, 5.5]).unwrap()),
        )
        .unwrap();
        let photon_flux = folder.resample(Array1::ones(7).view()).unwrap();
        assert_abs_diff_eq!(photon_flux, array![0.0, 1.0, 1.5], epsilon = 1e-12);
    }

    #[test]
    fn disjoint_grids_are_rejected() {
        let model_bins = EnergyBins::linspace(10.0, 20.0, 5).unwrap();
        let err = Folder::new(
            model_bins,
            response(EnergyBins::linspace(1.0, 5.0, 4).unwrap()),
        )
        .unwrap_err();
        assert!(matches!(err, FoldError::GridMismatch { .. }));
    }

    #[test]
    fn touching_grids_are_disjoint() {
        let model_bins = EnergyBins::linspace(5.0, 6.0, 1).unwrap();
        assert!(Folder::new(model_bins, response(EnergyBins::linspace(1.0, 5.0, 4).unwrap())).is_err());
    }

    #[test]
    fn shape_errors() {
        let bins = EnergyBins::linspace(1.0, 3.0, 2).unwrap();
        let photon_bins = bins.clone();
        let r = Arc::new(InstrumentResponse::new(photon_bins, bins.clone(), Array2::eye(2)).unwrap());
        let folder = Folder::new(bins, r).unwrap();
        assert!(matches!(
            folder.fold(array![1.0].view(), array![1.0, 1.0].view(), None),
            Err(FoldError::ShapeMismatch {
                what: "model flux",
                ..
            })
        ));
        assert!(matches!(
            folder.fold(array![1.0, 1.0].view(), array![1.0].view(), None),
            Err(FoldError::ShapeMismatch {
                what: "exposure",
                ..
            })
        ));
    }

    #[test]
    fn free_function_matches_folder() {
        let bins = EnergyBins::linspace(1.0, 5.0, 4).unwrap();
        let r = response(bins.clone());
        let flux = array![1.0, 2.0, 3.0, 4.0];
        let exposure = Array1::from_elem(4, 3.0);
        let a = fold(flux.view(), &bins, r.clone(), exposure.view(), None).unwrap();
        let b = Folder::new(bins, r)
            .unwrap()
            .fold(flux.view(), exposure.view(), None)
            .unwrap();
        assert_eq!(a, b);
    }
}
