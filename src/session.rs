//! Fit session: one fitting problem, its parameter space and the result of the last run

use crate::data::EnergyBins;
use crate::error::{FitError, SessionError};
use crate::fit::{BackendConfig, CancelToken, FitBackend, FitResult, FitStatus};
use crate::model::{CompositeModel, ModelRegistry};
use crate::objective::{Dataset, Objective};
use crate::params::ParameterSpace;
use crate::statistic::Statistic;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Backend and statistic of a fit
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FitConfig {
    pub backend: BackendConfig,
    pub statistic: Statistic,
}

/// Life-cycle state of a [FitSession]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Ready to run
    Configured,
    Running,
    /// The backend completed, its result may still be flagged as not converged
    Converged,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    token: CancelToken,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Requests cancellation of a running session from another thread
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<Shared>);

impl CancelHandle {
    /// The request is honoured at the next iteration boundary of the backend
    pub fn cancel(&self) -> Result<(), SessionError> {
        let state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SessionState::Running => {
                self.0.token.cancel();
                Ok(())
            }
            state => Err(SessionError::NotRunning(state)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.0.state()
    }
}

enum ModelSource {
    Model(CompositeModel),
    Named(String),
}

/// Builder of a [FitSession]
pub struct FitSessionBuilder {
    registry: Arc<ModelRegistry>,
    model: Option<ModelSource>,
    space: Option<ParameterSpace>,
    datasets: Vec<Dataset>,
    backend: Option<BackendConfig>,
    statistic: Statistic,
    model_bins: Option<EnergyBins>,
}

impl FitSessionBuilder {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            model: None,
            space: None,
            datasets: vec![],
            backend: None,
            statistic: Statistic::default(),
            model_bins: None,
        }
    }

    pub fn model(mut self, model: CompositeModel) -> Self {
        self.model = Some(ModelSource::Model(model));
        self
    }

    /// Single registered component, looked up when the session is built
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.model = Some(ModelSource::Named(name.into()));
        self
    }

    /// Parameter space to start from instead of the model defaults
    pub fn parameters(mut self, space: ParameterSpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn dataset(mut self, dataset: Dataset) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn backend(mut self, backend: impl Into<BackendConfig>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }

    pub fn config(self, config: FitConfig) -> Self {
        self.backend(config.backend).statistic(config.statistic)
    }

    /// Energy grid of model evaluation, the photon grid of the first response by default
    pub fn model_bins(mut self, bins: EnergyBins) -> Self {
        self.model_bins = Some(bins);
        self
    }

    pub fn build(self) -> Result<FitSession, SessionError> {
        let model = match self.model.ok_or(SessionError::NoModel)? {
            ModelSource::Model(model) => model,
            ModelSource::Named(name) => self.registry.model(&name)?,
        };
        let space = match self.space {
            Some(space) => space,
            None => model.parameter_space()?,
        };
        if space.is_empty() {
            return Err(SessionError::EmptyParameterSpace);
        }
        if self.datasets.is_empty() {
            return Err(SessionError::NoDatasets);
        }
        let backend = self.backend.ok_or(SessionError::NoBackend)?;
        Ok(FitSession {
            registry: self.registry,
            model,
            space,
            datasets: self.datasets,
            model_bins: self.model_bins,
            config: FitConfig {
                backend,
                statistic: self.statistic,
            },
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Configured),
                token: CancelToken::new(),
            }),
            result: None,
            failure: None,
        })
    }
}

/// Single fitting problem: model, datasets, parameter space and backend
///
/// The session owns its parameter space and the result of the last run, the registry and the
/// data are shared read-only. [FitSession::run] blocks until the backend finishes, use a
/// [CancelHandle] to stop it from another thread.
pub struct FitSession {
    registry: Arc<ModelRegistry>,
    model: CompositeModel,
    space: ParameterSpace,
    datasets: Vec<Dataset>,
    model_bins: Option<EnergyBins>,
    config: FitConfig,
    shared: Arc<Shared>,
    result: Option<FitResult>,
    failure: Option<FitError>,
}

impl FitSession {
    pub fn builder(registry: Arc<ModelRegistry>) -> FitSessionBuilder {
        FitSessionBuilder::new(registry)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn model(&self) -> &CompositeModel {
        &self.model
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn parameters(&self) -> &ParameterSpace {
        &self.space
    }

    /// Mutable access for freezing, tying and setting priors between runs
    pub fn parameters_mut(&mut self) -> &mut ParameterSpace {
        &mut self.space
    }

    pub fn set_backend(&mut self, backend: impl Into<BackendConfig>) {
        self.config.backend = backend.into();
    }

    pub fn set_statistic(&mut self, statistic: Statistic) {
        self.config.statistic = statistic;
    }

    pub fn add_dataset(&mut self, dataset: Dataset) {
        self.datasets.push(dataset);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.shared.clone())
    }

    /// Result of the last run which reached [SessionState::Converged] or
    /// [SessionState::Cancelled]
    pub fn result(&self) -> Option<&FitResult> {
        self.result.as_ref()
    }

    /// Cause of the last [SessionState::Failed] run
    pub fn failure(&self) -> Option<&FitError> {
        self.failure.as_ref()
    }

    /// Run the backend from the current parameter values
    ///
    /// On [SessionState::Converged] the best fit is written back into the parameter space,
    /// otherwise the space is left untouched.
    pub fn run(&mut self) -> Result<&FitResult, SessionError> {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.token.reset();
            *state = SessionState::Running;
        }
        self.result = None;
        self.failure = None;
        tracing::info!(model = %self.model, backend = ?self.config.backend.kind(), "fit started");

        match self.run_backend() {
            Ok(result) => {
                let state = if result.status() == FitStatus::Cancelled {
                    SessionState::Cancelled
                } else {
                    SessionState::Converged
                };
                tracing::info!(?state, status = ?result.status(), statistic = ?result.statistic(), "fit finished");
                self.shared.set_state(state);
                let result: &FitResult = self.result.insert(result);
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(%err, "fit failed");
                self.shared.set_state(SessionState::Failed);
                self.failure = Some(err.clone());
                Err(err.into())
            }
        }
    }

    fn run_backend(&mut self) -> Result<FitResult, FitError> {
        let objective = Objective::new(
            self.model.clone(),
            &self.space,
            &self.datasets,
            self.config.statistic,
            self.model_bins.clone(),
        )?;
        let start = self.space.to_vector();
        let output = self
            .config
            .backend
            .run(&objective, &start, &self.shared.token)?;
        let result = FitResult::new(output, &objective)?;
        if result.status() != FitStatus::Cancelled {
            self.space.from_vector(result.best_fit())?;
        }
        Ok(result)
    }
}
