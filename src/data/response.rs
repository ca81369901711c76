use crate::data::energy_bins::EnergyBins;
use crate::data::grouping::ChannelGrouping;
use crate::error::DataError;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Instrument spectral response
///
/// Maps photon flux integrated over photon-energy bins, photons / cm^2 / s, onto count rates in
/// detector channels. The redistribution matrix has one row per photon bin and one column per
/// detector channel, the effective area, cm^2, is given per photon bin. Their product is the
/// spectral response matrix (SRM), counts cm^2 / photon.
///
/// The SRM is not serialized, it is recomputed when the response is deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "InstrumentResponseParameters",
    into = "InstrumentResponseParameters"
)]
pub struct InstrumentResponse {
    photon_bins: EnergyBins,
    channels: EnergyBins,
    redistribution: Array2<f64>,
    effective_area: Array1<f64>,
    srm: Array2<f64>,
}

impl InstrumentResponse {
    /// Construct from a redistribution matrix with unit effective area
    pub fn new(
        photon_bins: EnergyBins,
        channels: EnergyBins,
        redistribution: Array2<f64>,
    ) -> Result<Self, DataError> {
        let effective_area = Array1::<f64>::ones(photon_bins.len());
        Self::with_effective_area(photon_bins, channels, redistribution, effective_area)
    }

    pub fn with_effective_area(
        photon_bins: EnergyBins,
        channels: EnergyBins,
        redistribution: Array2<f64>,
        effective_area: impl Into<Array1<f64>>,
    ) -> Result<Self, DataError> {
        let effective_area = effective_area.into();
        let (nrows, ncols) = redistribution.dim();
        if nrows != photon_bins.len() {
            return Err(DataError::LengthMismatch {
                what: "redistribution matrix rows",
                expected: photon_bins.len(),
                actual: nrows,
            });
        }
        if ncols != channels.len() {
            return Err(DataError::LengthMismatch {
                what: "redistribution matrix columns",
                expected: channels.len(),
                actual: ncols,
            });
        }
        if effective_area.len() != nrows {
            return Err(DataError::LengthMismatch {
                what: "effective area",
                expected: nrows,
                actual: effective_area.len(),
            });
        }
        if let Some((index, &value)) = redistribution
            .iter()
            .chain(effective_area.iter())
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(DataError::InvalidValue {
                what: "response",
                index,
                value,
            });
        }
        let srm = &redistribution * &effective_area.view().insert_axis(Axis(1));
        Ok(Self {
            photon_bins,
            channels,
            redistribution,
            effective_area,
            srm,
        })
    }

    /// Perfect-resolution response: photon bins coincide with channels
    pub fn diagonal(bins: EnergyBins, effective_area: impl Into<Array1<f64>>) -> Result<Self, DataError> {
        let redistribution = Array2::eye(bins.len());
        Self::with_effective_area(bins.clone(), bins, redistribution, effective_area)
    }

    pub fn photon_bins(&self) -> &EnergyBins {
        &self.photon_bins
    }

    pub fn channels(&self) -> &EnergyBins {
        &self.channels
    }

    pub fn redistribution(&self) -> ArrayView2<'_, f64> {
        self.redistribution.view()
    }

    pub fn effective_area(&self) -> ArrayView1<'_, f64> {
        self.effective_area.view()
    }

    /// Spectral response matrix, photon bins x channels
    pub fn srm(&self) -> ArrayView2<'_, f64> {
        self.srm.view()
    }

    /// Count rate per channel for photon flux given on [Self::photon_bins]
    pub fn apply(&self, photon_flux: ArrayView1<f64>) -> Array1<f64> {
        photon_flux.dot(&self.srm)
    }

    /// Merge detector channels according to `grouping`, matrix columns are summed
    pub fn regroup_channels(&self, grouping: &ChannelGrouping) -> Result<Self, DataError> {
        grouping.check_channels(self.channels.len())?;
        let mut redistribution = Array2::zeros((self.photon_bins.len(), grouping.len()));
        for (mut column, g) in redistribution
            .axis_iter_mut(Axis(1))
            .zip(grouping.groups())
        {
            column.assign(
                &self
                    .redistribution
                    .slice(ndarray::s![.., g.clone()])
                    .sum_axis(Axis(1)),
            );
        }
        Self::with_effective_area(
            self.photon_bins.clone(),
            self.channels.regroup(grouping.groups())?,
            redistribution,
            self.effective_area.clone(),
        )
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename = "InstrumentResponse")]
struct InstrumentResponseParameters {
    photon_bins: EnergyBins,
    channels: EnergyBins,
    redistribution: Array2<f64>,
    effective_area: Array1<f64>,
}

impl TryFrom<InstrumentResponseParameters> for InstrumentResponse {
    type Error = DataError;

    fn try_from(p: InstrumentResponseParameters) -> Result<Self, Self::Error> {
        Self::with_effective_area(p.photon_bins, p.channels, p.redistribution, p.effective_area)
    }
}

impl From<InstrumentResponse> for InstrumentResponseParameters {
    fn from(r: InstrumentResponse) -> Self {
        Self {
            photon_bins: r.photon_bins,
            channels: r.channels,
            redistribution: r.redistribution,
            effective_area: r.effective_area,
        }
    }
}
