use crate::data::EnergyBins;
use crate::error::{DomainError, ModelError, RegistryError};
use crate::model::library;
use crate::model::{
    CombinationRule, ComponentFunction, ComponentKind, CompositeModel, ModelNode, ParameterSpec,
    SpectralComponent,
};

use ndarray::{Array1, ArrayView1};
use std::collections::HashMap;
use std::sync::Arc;

/// Named spectral model components
///
/// An explicit object rather than process-wide state: independent sessions may use distinct
/// registries, share one behind an [Arc], or clone one and extend the copy.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    components: HashMap<String, Arc<SpectralComponent>>,
}

impl ModelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the [library] models registered
    pub fn with_builtin_models() -> Self {
        let components = library::components()
            .into_iter()
            .map(|component| (component.name.clone(), Arc::new(component)))
            .collect();
        Self { components }
    }

    /// Register an additive model producing bin-integrated flux
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        function: F,
        parameters: Vec<ParameterSpec>,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&EnergyBins, &[f64]) -> Result<Array1<f64>, DomainError> + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            ComponentKind::Additive,
            parameters,
            ComponentFunction::Flux(Arc::new(function)),
        )
    }

    /// Register a multiplicative model producing a dimensionless factor per bin
    pub fn register_multiplicative<F>(
        &mut self,
        name: impl Into<String>,
        function: F,
        parameters: Vec<ParameterSpec>,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&EnergyBins, &[f64]) -> Result<Array1<f64>, DomainError> + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            ComponentKind::Multiplicative,
            parameters,
            ComponentFunction::Flux(Arc::new(function)),
        )
    }

    /// Register a convolution model transforming the flux of the preceding members
    pub fn register_convolution<F>(
        &mut self,
        name: impl Into<String>,
        function: F,
        parameters: Vec<ParameterSpec>,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&EnergyBins, &[f64], ArrayView1<f64>) -> Result<Array1<f64>, DomainError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(
            name.into(),
            ComponentKind::Convolution,
            parameters,
            ComponentFunction::Convolution(Arc::new(function)),
        )
    }

    fn insert(
        &mut self,
        name: String,
        kind: ComponentKind,
        parameters: Vec<ParameterSpec>,
        function: ComponentFunction,
    ) -> Result<(), RegistryError> {
        if self.components.contains_key(&name) {
            return Err(RegistryError::DuplicateModel(name));
        }
        if name.is_empty() || name.contains('.') {
            return Err(RegistryError::InvalidComposition(format!(
                "model name {name:?} must be non-empty and contain no dots"
            )));
        }
        for (i, p) in parameters.iter().enumerate() {
            if parameters[..i].iter().any(|other| other.name == p.name) {
                return Err(RegistryError::DuplicateParameter {
                    model: name,
                    parameter: p.name.clone(),
                });
            }
        }
        let component = SpectralComponent {
            name: name.clone(),
            kind,
            parameters,
            function,
        };
        self.components.insert(name, Arc::new(component));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<SpectralComponent>> {
        self.components.get(name).cloned()
    }

    /// Sorted names of the registered models
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.components.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Building block for nested composites
    pub fn node(&self, name: &str) -> Result<ModelNode, RegistryError> {
        self.get(name)
            .map(ModelNode::component)
            .ok_or_else(|| RegistryError::UnknownModel(name.to_owned()))
    }

    /// Model consisting of a single component
    pub fn model(&self, name: &str) -> Result<CompositeModel, RegistryError> {
        CompositeModel::single(self.node(name)?)
    }

    /// Combine registered components with one rule
    ///
    /// For [CombinationRule::Convolution] the first name is the flux source and the rest are
    /// convolution components applied in order.
    pub fn compose(
        &self,
        names: &[&str],
        rule: CombinationRule,
    ) -> Result<CompositeModel, RegistryError> {
        let nodes = names
            .iter()
            .map(|name| self.node(name))
            .collect::<Result<Vec<_>, _>>()?;
        CompositeModel::combine(nodes, rule)
    }

    /// Flux of `model` on `bins`, see [CompositeModel::evaluate]
    pub fn evaluate(
        &self,
        model: &CompositeModel,
        bins: &EnergyBins,
        parameters: &[f64],
    ) -> Result<Array1<f64>, ModelError> {
        model.evaluate(bins, parameters)
    }
}
