use crate::data::{EnergyBins, InstrumentResponse, ObservedSpectrum};
use crate::error::{EvaluationError, FitError, FoldError, ParameterError, RegistryError};
use crate::fit::LogPosterior;
use crate::fit::prior::IndependentLnPrior;
use crate::fold::Folder;
use crate::model::CompositeModel;
use crate::params::{Bounds, ParameterSpace};
use crate::statistic::Statistic;

use ndarray::{Array1, Zip};
use std::sync::Arc;

/// Observed spectrum with the response it was measured through
#[derive(Clone, Debug)]
pub struct Dataset {
    spectrum: Arc<ObservedSpectrum>,
    response: Arc<InstrumentResponse>,
    energy_range: Option<(f64, f64)>,
}

impl Dataset {
    pub fn new(spectrum: Arc<ObservedSpectrum>, response: Arc<InstrumentResponse>) -> Self {
        Self {
            spectrum,
            response,
            energy_range: None,
        }
    }

    /// Fit only channels with centres inside `[low, high]`, keV
    pub fn with_energy_range(mut self, low: f64, high: f64) -> Self {
        self.energy_range = Some((low, high));
        self
    }

    pub fn spectrum(&self) -> &ObservedSpectrum {
        &self.spectrum
    }

    pub fn response(&self) -> &InstrumentResponse {
        &self.response
    }

    pub fn energy_range(&self) -> Option<(f64, f64)> {
        self.energy_range
    }
}

#[derive(Clone, Debug)]
struct PreparedDataset {
    folder: Folder,
    counts: Array1<f64>,
    counts_error: Array1<f64>,
    exposure: Array1<f64>,
    background: Option<Array1<f64>>,
    mask: Array1<bool>,
}

/// Fit statistic of one model against one or more datasets, as a function of the free
/// parameter vector
///
/// Binds a snapshot of the parameter space: frozen values, ties and the vector layout are fixed
/// at construction. All datasets share the model, their statistics are summed. Evaluation only
/// reads immutable data, equal inputs give bit-identical outputs.
#[derive(Clone, Debug)]
pub struct Objective {
    model: CompositeModel,
    model_bins: EnergyBins,
    datasets: Vec<PreparedDataset>,
    space: ParameterSpace,
    statistic: Statistic,
    prior: IndependentLnPrior,
}

impl Objective {
    /// Model flux is evaluated on `model_bins`, or on the photon grid of the first response
    pub fn new(
        model: CompositeModel,
        space: &ParameterSpace,
        datasets: &[Dataset],
        statistic: Statistic,
        model_bins: Option<EnergyBins>,
    ) -> Result<Self, FitError> {
        if model.n_parameters() != space.len() {
            return Err(FitError::ModelSpaceMismatch {
                model: model.n_parameters(),
                space: space.len(),
            });
        }
        if let Some((position, (spec, name))) = model
            .parameter_specs()
            .iter()
            .zip(space.names())
            .enumerate()
            .find(|(_, (spec, name))| spec.name != *name)
        {
            return Err(FitError::ParameterNameMismatch {
                position,
                model: spec.name.clone(),
                space: name.to_owned(),
            });
        }
        if !model.is_flux() {
            return Err(RegistryError::InvalidComposition(format!(
                "model {model} produces no flux"
            ))
            .into());
        }
        if space.nfree() == 0 {
            return Err(FitError::NoFreeParameters);
        }
        let first = datasets
            .first()
            .ok_or_else(|| FitError::InvalidConfig("no datasets to fit".to_owned()))?;
        let model_bins = model_bins.unwrap_or_else(|| first.response.photon_bins().clone());
        let prepared = datasets
            .iter()
            .map(|dataset| prepare(dataset, &model_bins))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            model = %model,
            datasets = prepared.len(),
            channels = prepared.iter().map(|d| d.mask.iter().filter(|&&m| m).count()).sum::<usize>(),
            free = space.nfree(),
            "objective prepared"
        );
        Ok(Self {
            model,
            model_bins,
            datasets: prepared,
            prior: IndependentLnPrior::from_space(space),
            space: space.clone(),
            statistic,
        })
    }

    pub fn model(&self) -> &CompositeModel {
        &self.model
    }

    pub fn model_bins(&self) -> &EnergyBins {
        &self.model_bins
    }

    pub fn statistic_kind(&self) -> Statistic {
        self.statistic
    }

    /// Snapshot of the parameter space the objective is bound to
    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn prior(&self) -> &IndependentLnPrior {
        &self.prior
    }

    /// Layout version of the bound parameter space snapshot
    pub fn layout_version(&self) -> u64 {
        self.space.layout_version()
    }

    /// Fails with [ParameterError::StaleLayout] if `space` has changed its layout since the
    /// objective was built
    pub fn check_space(&self, space: &ParameterSpace) -> Result<(), ParameterError> {
        space.check_layout(self.layout_version())
    }

    /// Values of all named parameters for a free-parameter vector
    pub fn resolve(&self, params: &[f64]) -> Result<Vec<f64>, ParameterError> {
        self.space.resolve(params)
    }

    /// Number of fitted channels minus number of free parameters
    pub fn degrees_of_freedom(&self) -> isize {
        let channels: usize = self
            .datasets
            .iter()
            .map(|d| d.mask.iter().filter(|&&m| m).count())
            .sum();
        channels as isize - self.space.nfree() as isize
    }

    /// Expected counts per channel of every dataset
    pub fn model_counts(&self, params: &[f64]) -> Result<Vec<Array1<f64>>, EvaluationError> {
        let values = self.resolve(params)?;
        let flux = self.model.evaluate(&self.model_bins, &values)?;
        self.datasets
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let counts = d.folder.fold(
                    flux.view(),
                    d.exposure.view(),
                    d.background.as_ref().map(|b| b.view()),
                )?;
                if let Some((channel, &value)) = counts
                    .iter()
                    .enumerate()
                    .find(|(_, c)| !(c.is_finite() && **c >= 0.0))
                {
                    return Err(EvaluationError::InvalidModel {
                        dataset: i,
                        channel,
                        value,
                    });
                }
                Ok(counts)
            })
            .collect()
    }

    /// Fit statistic summed over datasets
    pub fn statistic(&self, params: &[f64]) -> Result<f64, EvaluationError> {
        let model_counts = self.model_counts(params)?;
        Ok(self
            .datasets
            .iter()
            .zip(&model_counts)
            .map(|(d, m)| {
                self.statistic.evaluate(
                    d.counts.view(),
                    m.view(),
                    d.counts_error.view(),
                    d.mask.view(),
                )
            })
            .sum())
    }

    /// Half of [Objective::statistic]
    pub fn negative_log_likelihood(&self, params: &[f64]) -> Result<f64, EvaluationError> {
        Ok(0.5 * self.statistic(params)?)
    }
}

fn prepare(dataset: &Dataset, model_bins: &EnergyBins) -> Result<PreparedDataset, FitError> {
    let spectrum = &dataset.spectrum;
    let channels = spectrum.channels();
    if dataset.response.channels().len() != channels.len() {
        return Err(FoldError::ShapeMismatch {
            what: "spectrum channels",
            expected: dataset.response.channels().len(),
            actual: channels.len(),
        }
        .into());
    }
    let folder = Folder::new(model_bins.clone(), dataset.response.clone())?;
    let mut mask = spectrum.fit_mask().to_owned();
    if let Some((low, high)) = dataset.energy_range {
        Zip::from(&mut mask)
            .and(&channels.centers())
            .for_each(|m, &c| *m &= low <= c && c <= high);
    }
    if !mask.iter().any(|&m| m) {
        return Err(FitError::InvalidConfig(format!(
            "no channels to fit, energy range {:?}",
            dataset.energy_range
        )));
    }
    Ok(PreparedDataset {
        folder,
        counts: spectrum.counts().to_owned(),
        counts_error: spectrum.counts_error().to_owned(),
        exposure: spectrum.effective_exposure().to_owned(),
        background: spectrum.scaled_background(),
        mask,
    })
}

impl LogPosterior for Objective {
    fn ndim(&self) -> usize {
        self.space.nfree()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.space
            .free_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    fn bounds(&self) -> Vec<Bounds> {
        self.prior.bounds()
    }

    fn ln_likelihood(&self, params: &[f64]) -> Result<f64, EvaluationError> {
        Ok(-self.negative_log_likelihood(params)?)
    }

    fn ln_prior(&self, params: &[f64]) -> f64 {
        self.prior.ln_prior(params)
    }

    fn prior_transform(&self, unit: &[f64], out: &mut [f64]) -> Result<(), FitError> {
        self.prior.prior_transform(unit, out)
    }

    fn check_proper_prior(&self) -> Result<(), FitError> {
        self.prior.check_proper()
    }
}
