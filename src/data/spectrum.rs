use crate::data::energy_bins::EnergyBins;
use crate::data::grouping::ChannelGrouping;
use crate::error::DataError;

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

/// Background counts measured with their own exposure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BackgroundParameters", into = "BackgroundParameters")]
pub struct Background {
    counts: Array1<f64>,
    exposure: f64,
}

impl Background {
    pub fn new(counts: impl Into<Array1<f64>>, exposure: f64) -> Result<Self, DataError> {
        let counts = counts.into();
        check_non_negative("background counts", counts.view())?;
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(DataError::InvalidExposure(exposure));
        }
        Ok(Self { counts, exposure })
    }

    pub fn counts(&self) -> ArrayView1<'_, f64> {
        self.counts.view()
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename = "Background")]
struct BackgroundParameters {
    counts: Array1<f64>,
    exposure: f64,
}

impl TryFrom<BackgroundParameters> for Background {
    type Error = DataError;

    fn try_from(p: BackgroundParameters) -> Result<Self, Self::Error> {
        Self::new(p.counts, p.exposure)
    }
}

impl From<Background> for BackgroundParameters {
    fn from(b: Background) -> Self {
        Self {
            counts: b.counts,
            exposure: b.exposure,
        }
    }
}

/// Observed counts spectrum
///
/// Holds everything the fit needs from a measurement: channel energy edges, counts and their
/// errors, effective exposure per channel and an optional background. The object is immutable
/// once constructed, derived spectra (e.g. regrouped) are new objects.
///
/// Channels may be excluded from the fit, see [ObservedSpectrum::fit_mask].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "ObservedSpectrumParameters",
    into = "ObservedSpectrumParameters"
)]
pub struct ObservedSpectrum {
    channels: EnergyBins,
    counts: Array1<f64>,
    counts_error: Array1<f64>,
    effective_exposure: Array1<f64>,
    background: Option<Background>,
    fit_mask: Array1<bool>,
}

impl ObservedSpectrum {
    /// Construct from channel edges, counts and a single exposure time, s
    ///
    /// Counts errors default to `sqrt(counts)`, floored at unity for empty channels.
    pub fn new(
        channels: EnergyBins,
        counts: impl Into<Array1<f64>>,
        exposure: f64,
    ) -> Result<Self, DataError> {
        let counts = counts.into();
        check_length("counts", channels.len(), counts.len())?;
        check_non_negative("counts", counts.view())?;
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(DataError::InvalidExposure(exposure));
        }
        let counts_error = counts.mapv(|c| c.max(1.0).sqrt());
        let effective_exposure = Array1::from_elem(counts.len(), exposure);
        let fit_mask = Array1::from_elem(counts.len(), true);
        Ok(Self {
            channels,
            counts,
            counts_error,
            effective_exposure,
            background: None,
            fit_mask,
        })
    }

    /// Replace the default counts errors, they must be positive
    pub fn with_counts_error(mut self, error: impl Into<Array1<f64>>) -> Result<Self, DataError> {
        let error = error.into();
        check_length("counts error", self.counts.len(), error.len())?;
        if let Some((index, &value)) = error
            .iter()
            .enumerate()
            .find(|(_, e)| !e.is_finite() || **e <= 0.0)
        {
            return Err(DataError::InvalidValue {
                what: "counts error",
                index,
                value,
            });
        }
        self.counts_error = error;
        Ok(self)
    }

    /// Exclude channels from the fit where `mask` is `false`
    pub fn with_fit_mask(mut self, mask: impl Into<Array1<bool>>) -> Result<Self, DataError> {
        let mask = mask.into();
        check_length("fit mask", self.counts.len(), mask.len())?;
        self.fit_mask = mask;
        Ok(self)
    }

    /// Replace the exposure with per-channel effective exposures, s
    pub fn with_channel_exposure(
        mut self,
        exposure: impl Into<Array1<f64>>,
    ) -> Result<Self, DataError> {
        let exposure = exposure.into();
        check_length("effective exposure", self.counts.len(), exposure.len())?;
        if let Some(&bad) = exposure.iter().find(|e| !e.is_finite() || **e <= 0.0) {
            return Err(DataError::InvalidExposure(bad));
        }
        self.effective_exposure = exposure;
        Ok(self)
    }

    pub fn with_background(mut self, background: Background) -> Result<Self, DataError> {
        check_length("background counts", self.counts.len(), background.counts.len())?;
        self.background = Some(background);
        Ok(self)
    }

    pub fn channels(&self) -> &EnergyBins {
        &self.channels
    }

    pub fn nchannels(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> ArrayView1<'_, f64> {
        self.counts.view()
    }

    pub fn counts_error(&self) -> ArrayView1<'_, f64> {
        self.counts_error.view()
    }

    pub fn effective_exposure(&self) -> ArrayView1<'_, f64> {
        self.effective_exposure.view()
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    /// Channels entering the fit statistic
    pub fn fit_mask(&self) -> ArrayView1<'_, bool> {
        self.fit_mask.view()
    }

    /// Background counts scaled to the source exposure of every channel
    pub fn scaled_background(&self) -> Option<Array1<f64>> {
        self.background.as_ref().map(|bkg| {
            Zip::from(&bkg.counts)
                .and(&self.effective_exposure)
                .map_collect(|&c, &exposure| c * exposure / bkg.exposure)
        })
    }

    /// Counts per unit energy per unit time, counts / keV / s
    pub fn count_rate(&self) -> Array1<f64> {
        self.per_width_per_second(&self.counts)
    }

    pub fn count_rate_error(&self) -> Array1<f64> {
        self.per_width_per_second(&self.counts.mapv(f64::sqrt))
    }

    fn per_width_per_second(&self, values: &Array1<f64>) -> Array1<f64> {
        Zip::from(values)
            .and(&self.channels.widths())
            .and(&self.effective_exposure)
            .map_collect(|&v, &width, &exposure| v / width / exposure)
    }

    /// Merge channels according to `grouping`
    ///
    /// Counts and background counts are summed, errors are added in quadrature and the
    /// effective exposure is averaged over the merged channels. Groups the grouping does not
    /// fit, or which merge an excluded channel, are excluded from the fit.
    pub fn regroup(&self, grouping: &ChannelGrouping) -> Result<Self, DataError> {
        grouping.check_channels(self.nchannels())?;
        let background = match &self.background {
            Some(bkg) => Some(Background::new(grouping.sum(bkg.counts.view()), bkg.exposure)?),
            None => None,
        };
        Ok(Self {
            channels: self.channels.regroup(grouping.groups())?,
            counts: grouping.sum(self.counts.view()),
            counts_error: grouping.quadrature_sum(self.counts_error.view()),
            effective_exposure: grouping.mean(self.effective_exposure.view()),
            background,
            fit_mask: grouping.fit_mask(self.fit_mask.view()),
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename = "ObservedSpectrum")]
struct ObservedSpectrumParameters {
    channels: EnergyBins,
    counts: Array1<f64>,
    counts_error: Array1<f64>,
    effective_exposure: Array1<f64>,
    background: Option<Background>,
    #[serde(default)]
    fit_mask: Option<Array1<bool>>,
}

impl TryFrom<ObservedSpectrumParameters> for ObservedSpectrum {
    type Error = DataError;

    fn try_from(p: ObservedSpectrumParameters) -> Result<Self, Self::Error> {
        // the scalar exposure is replaced by the per-channel one right away
        let mut spectrum = Self::new(p.channels, p.counts, 1.0)?
            .with_counts_error(p.counts_error)?
            .with_channel_exposure(p.effective_exposure)?;
        if let Some(background) = p.background {
            spectrum = spectrum.with_background(background)?;
        }
        if let Some(mask) = p.fit_mask {
            spectrum = spectrum.with_fit_mask(mask)?;
        }
        Ok(spectrum)
    }
}

impl From<ObservedSpectrum> for ObservedSpectrumParameters {
    fn from(s: ObservedSpectrum) -> Self {
        Self {
            channels: s.channels,
            counts: s.counts,
            counts_error: s.counts_error,
            effective_exposure: s.effective_exposure,
            background: s.background,
            fit_mask: Some(s.fit_mask),
        }
    }
}

fn check_length(what: &'static str, expected: usize, actual: usize) -> Result<(), DataError> {
    if expected != actual {
        return Err(DataError::LengthMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_non_negative(what: &'static str, values: ArrayView1<f64>) -> Result<(), DataError> {
    match values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        Some((index, &value)) => Err(DataError::InvalidValue { what, index, value }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn spectrum() -> ObservedSpectrum {
        let channels = EnergyBins::from_edges(Array1::range(0.0, 11.0, 1.0)).unwrap();
        ObservedSpectrum::new(channels, Array1::range(1.0, 11.0, 1.0), 0.5).unwrap()
    }

    #[test]
    fn default_errors_and_widths() {
        let s = spectrum();
        assert_eq!(s.nchannels(), 10);
        assert_abs_diff_eq!(s.counts_error()[3], 2.0);
        assert_eq!(s.channels().widths(), Array1::from_elem(10, 1.0));
        assert!(s.fit_mask().iter().all(|&m| m));
    }

    #[test]
    fn count_rate_uses_width_and_exposure() {
        let channels = EnergyBins::from_edges(array![0.0, 2.0, 4.0]).unwrap();
        let s = ObservedSpectrum::new(channels, array![4.0, 16.0], 2.0)
            .unwrap()
            .with_channel_exposure(array![2.0, 4.0])
            .unwrap();
        assert_abs_diff_eq!(s.count_rate(), array![1.0, 2.0]);
        assert_abs_diff_eq!(s.count_rate_error(), array![0.5, 0.5]);
    }

    #[test]
    fn rejects_invalid_input() {
        let channels = EnergyBins::linspace(0.0, 2.0, 2).unwrap();
        assert_eq!(
            ObservedSpectrum::new(channels.clone(), array![1.0, -1.0], 1.0),
            Err(DataError::InvalidValue {
                what: "counts",
                index: 1,
                value: -1.0
            })
        );
        assert_eq!(
            ObservedSpectrum::new(channels.clone(), array![1.0, 1.0, 1.0], 1.0),
            Err(DataError::LengthMismatch {
                what: "counts",
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(
            ObservedSpectrum::new(channels.clone(), array![1.0, 1.0], 0.0),
            Err(DataError::InvalidExposure(0.0))
        );
        let s = ObservedSpectrum::new(channels, array![1.0, 1.0], 1.0).unwrap();
        for bad in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                s.clone().with_counts_error(array![1.0, bad]),
                Err(DataError::InvalidValue {
                    what: "counts error",
                    index: 1,
                    ..
                })
            ));
        }
    }

    #[test]
    fn serde_validates() {
        let s = spectrum()
            .with_background(Background::new(Array1::from_elem(10, 4.0), 2.0).unwrap())
            .unwrap()
            .with_fit_mask(Array1::from_shape_fn(10, |i| i != 3))
            .unwrap();
        let json = serde_json::to_value(&s).unwrap();
        let restored: ObservedSpectrum = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(restored, s);

        let mut short_counts = json.clone();
        short_counts["counts"] = serde_json::to_value(array![1.0, 2.0]).unwrap();
        assert!(serde_json::from_value::<ObservedSpectrum>(short_counts).is_err());

        let mut zero_error = json.clone();
        zero_error["counts_error"] = serde_json::to_value(Array1::<f64>::zeros(10)).unwrap();
        assert!(serde_json::from_value::<ObservedSpectrum>(zero_error).is_err());

        let mut bad_background = json;
        bad_background["background"]["exposure"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<ObservedSpectrum>(bad_background).is_err());
    }

    #[test]
    fn background_is_scaled_to_source_exposure() {
        let s = spectrum()
            .with_background(Background::new(Array1::from_elem(10, 4.0), 2.0).unwrap())
            .unwrap();
        assert_abs_diff_eq!(s.scaled_background().unwrap(), Array1::from_elem(10, 1.0));
    }

    #[test]
    fn regroup_sums_counts() {
        let s = spectrum();
        let grouping = ChannelGrouping::min_counts(s.counts(), 6.0).unwrap();
        let grouped = s.regroup(&grouping).unwrap();
        assert_eq!(grouped.counts().sum(), s.counts().sum());
        assert_eq!(grouped.channels().min(), 0.0);
        assert_eq!(grouped.channels().max(), 10.0);
        assert!(grouped.counts().iter().all(|&c| c >= 6.0));
        assert!(grouped.fit_mask().iter().all(|&m| m));
        assert_abs_diff_eq!(grouped.counts_error()[0], (1.0_f64 + 2.0 + 3.0).sqrt());
    }

    #[test]
    fn regroup_excludes_remainder() {
        let channels = EnergyBins::linspace(0.0, 5.0, 5).unwrap();
        let s = ObservedSpectrum::new(channels, array![3.0, 4.0, 6.0, 2.0, 1.0], 1.0).unwrap();
        let grouping = ChannelGrouping::min_counts(s.counts(), 5.0).unwrap();
        let grouped = s.regroup(&grouping).unwrap();
        assert_eq!(grouped.counts(), array![7.0, 6.0, 2.0, 1.0]);
        assert_eq!(grouped.fit_mask(), array![true, true, false, false]);
        assert_eq!(grouped.channels().max(), 5.0);
    }
}
