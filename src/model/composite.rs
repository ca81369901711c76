use crate::data::EnergyBins;
use crate::error::{ModelError, ParameterError, RegistryError};
use crate::model::{ComponentFunction, ComponentKind, ParameterSpec, SpectralComponent};
use crate::params::{Parameter, ParameterSpace};

use ndarray::{Array1, Zip};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How members of a composite are combined
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum CombinationRule {
    /// Sum of fluxes
    Additive,
    /// Product of multiplicative factors and at most one flux
    Multiplicative,
    /// The first member's flux transformed by the remaining convolution components in order
    Convolution,
}

impl CombinationRule {
    fn operator(self) -> &'static str {
        match self {
            Self::Additive => " + ",
            Self::Multiplicative => " * ",
            Self::Convolution => " <> ",
        }
    }
}

/// What a node of the composite tree produces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Output {
    Flux,
    Factor,
    Operator,
}

#[derive(Clone, Debug)]
enum Node {
    Component {
        label: String,
        component: Arc<SpectralComponent>,
    },
    Combination {
        rule: CombinationRule,
        children: Vec<Node>,
    },
}

impl Node {
    fn output(&self) -> Output {
        match self {
            Self::Component { component, .. } => match component.kind() {
                ComponentKind::Additive => Output::Flux,
                ComponentKind::Multiplicative => Output::Factor,
                ComponentKind::Convolution => Output::Operator,
            },
            Self::Combination { rule, children } => match rule {
                CombinationRule::Additive | CombinationRule::Convolution => Output::Flux,
                CombinationRule::Multiplicative => {
                    if children.iter().any(|c| c.output() == Output::Flux) {
                        Output::Flux
                    } else {
                        Output::Factor
                    }
                }
            },
        }
    }

    fn visit_components<'a>(&'a self, f: &mut impl FnMut(&'a str, &'a SpectralComponent)) {
        match self {
            Self::Component { label, component } => f(label, component),
            Self::Combination { children, .. } => {
                for child in children {
                    child.visit_components(f);
                }
            }
        }
    }

    fn relabel(&mut self, seen: &mut HashMap<String, usize>) {
        match self {
            Self::Component { label, component } => {
                let count = seen.entry(component.name().to_owned()).or_default();
                *count += 1;
                *label = if *count == 1 {
                    component.name().to_owned()
                } else {
                    format!("{}_{}", component.name(), count)
                };
            }
            Self::Combination { children, .. } => {
                for child in children {
                    child.relabel(seen);
                }
            }
        }
    }

    fn evaluate(
        &self,
        bins: &EnergyBins,
        parameters: &[f64],
        offset: &mut usize,
    ) -> Result<Array1<f64>, ModelError> {
        match self {
            Self::Component { label, component } => {
                let values = take(component, parameters, offset);
                match component.function() {
                    ComponentFunction::Flux(function) => {
                        let flux = function(bins, values).map_err(|source| ModelError::Domain {
                            model: label.clone(),
                            source,
                        })?;
                        check_output(label, bins, flux)
                    }
                    // Convolution components are applied by their parent
                    ComponentFunction::Convolution(_) => Err(ModelError::WrongLength {
                        model: label.clone(),
                        expected: bins.len(),
                        actual: 0,
                    }),
                }
            }
            Self::Combination { rule, children } => match rule {
                CombinationRule::Additive => {
                    let mut total = Array1::zeros(bins.len());
                    for child in children {
                        total += &child.evaluate(bins, parameters, offset)?;
                    }
                    Ok(total)
                }
                CombinationRule::Multiplicative => {
                    let mut total = Array1::ones(bins.len());
                    for child in children {
                        let value = child.evaluate(bins, parameters, offset)?;
                        Zip::from(&mut total).and(&value).for_each(|t, &v| *t *= v);
                    }
                    Ok(total)
                }
                CombinationRule::Convolution => {
                    let (source, operators) = children
                        .split_first()
                        .ok_or_else(|| empty_convolution(bins))?;
                    let mut flux = source.evaluate(bins, parameters, offset)?;
                    for operator in operators {
                        flux = operator.convolve(bins, parameters, offset, flux)?;
                    }
                    Ok(flux)
                }
            },
        }
    }

    fn convolve(
        &self,
        bins: &EnergyBins,
        parameters: &[f64],
        offset: &mut usize,
        flux: Array1<f64>,
    ) -> Result<Array1<f64>, ModelError> {
        match self {
            Self::Component { label, component } => {
                let values = take(component, parameters, offset);
                match component.function() {
                    ComponentFunction::Convolution(function) => {
                        let out = function(bins, values, flux.view()).map_err(|source| {
                            ModelError::Domain {
                                model: label.clone(),
                                source,
                            }
                        })?;
                        check_output(label, bins, out)
                    }
                    ComponentFunction::Flux(_) => Err(empty_convolution(bins)),
                }
            }
            Self::Combination { .. } => Err(empty_convolution(bins)),
        }
    }
}

fn take<'a>(component: &SpectralComponent, parameters: &'a [f64], offset: &mut usize) -> &'a [f64] {
    let n = component.parameters().len();
    let values = &parameters[*offset..*offset + n];
    *offset += n;
    values
}

// Unreachable for trees validated by CompositeModel::combine
fn empty_convolution(bins: &EnergyBins) -> ModelError {
    ModelError::WrongLength {
        model: "convolution".to_owned(),
        expected: bins.len(),
        actual: 0,
    }
}

fn check_output(
    label: &str,
    bins: &EnergyBins,
    values: Array1<f64>,
) -> Result<Array1<f64>, ModelError> {
    if values.len() != bins.len() {
        return Err(ModelError::WrongLength {
            model: label.to_owned(),
            expected: bins.len(),
            actual: values.len(),
        });
    }
    if let Some((bin, &value)) = values.iter().enumerate().find(|(_, x)| !x.is_finite()) {
        return Err(ModelError::NonFinite {
            model: label.to_owned(),
            bin,
            value,
        });
    }
    Ok(values)
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component { label, .. } => write!(f, "{label}"),
            Self::Combination { rule, children } => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(rule.operator())?;
                    }
                    match child {
                        Self::Combination { .. } => write!(f, "({child})")?,
                        Self::Component { .. } => write!(f, "{child}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Building block of a [CompositeModel]: a registered component or another composite
#[derive(Clone, Debug)]
pub struct ModelNode(Node);

impl ModelNode {
    pub(crate) fn component(component: Arc<SpectralComponent>) -> Self {
        Self(Node::Component {
            label: component.name().to_owned(),
            component,
        })
    }
}

impl From<CompositeModel> for ModelNode {
    fn from(model: CompositeModel) -> Self {
        Self(model.root)
    }
}

/// Tree of model components evaluated as one spectral model
///
/// Every component gets a unique label, its name, with a `_2`, `_3`, ... suffix for repeated
/// components. Parameters are named `label.parameter` and ordered depth-first.
#[derive(Clone, Debug)]
pub struct CompositeModel {
    root: Node,
    parameters: Vec<ParameterSpec>,
}

impl CompositeModel {
    /// Model consisting of a single additive or multiplicative node
    pub fn single(node: ModelNode) -> Result<Self, RegistryError> {
        if node.0.output() == Output::Operator {
            return Err(RegistryError::InvalidComposition(format!(
                "convolution component {} needs a flux to act on",
                node.0
            )));
        }
        Ok(Self::from_root(node.0))
    }

    /// Combine nodes with `rule`
    ///
    /// Fails with [RegistryError::InvalidComposition] if
    /// - there are no nodes,
    /// - a sum has a non-flux member,
    /// - a product has a convolution member or more than one flux member,
    /// - a convolution does not start with a flux or continues with anything but convolution
    ///   components.
    pub fn combine(nodes: Vec<ModelNode>, rule: CombinationRule) -> Result<Self, RegistryError> {
        let children: Vec<Node> = nodes.into_iter().map(|node| node.0).collect();
        let invalid = |reason: String| Err(RegistryError::InvalidComposition(reason));
        let Some(first) = children.first() else {
            return invalid("composite model needs at least one member".to_owned());
        };
        match rule {
            CombinationRule::Additive => {
                if let Some(child) = children.iter().find(|c| c.output() != Output::Flux) {
                    return invalid(format!("sum member {child} does not produce flux"));
                }
            }
            CombinationRule::Multiplicative => {
                if let Some(child) = children.iter().find(|c| c.output() == Output::Operator) {
                    return invalid(format!("convolution {child} cannot be a product member"));
                }
                if children.iter().filter(|c| c.output() == Output::Flux).count() > 1 {
                    return invalid("product of two fluxes".to_owned());
                }
            }
            CombinationRule::Convolution => {
                if first.output() != Output::Flux {
                    return invalid(format!(
                        "first convolution member {first} must produce flux"
                    ));
                }
                if children.len() < 2 {
                    return invalid("convolution needs at least one convolution component".into());
                }
                for child in &children[1..] {
                    let is_operator = matches!(
                        child,
                        Node::Component { component, .. } if component.kind() == ComponentKind::Convolution
                    );
                    if !is_operator {
                        return invalid(format!("{child} is not a convolution component"));
                    }
                }
            }
        }
        Ok(Self::from_root(Node::Combination { rule, children }))
    }

    fn from_root(mut root: Node) -> Self {
        root.relabel(&mut HashMap::new());
        let mut parameters = vec![];
        root.visit_components(&mut |label, component| {
            parameters.extend(component.parameters().iter().map(|p| ParameterSpec {
                name: format!("{label}.{}", p.name),
                ..p.clone()
            }))
        });
        Self { root, parameters }
    }

    /// Qualified parameter declarations in evaluation order
    pub fn parameter_specs(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn n_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// Parameter space initialised from the declared defaults, bounds and frozen flags
    pub fn parameter_space(&self) -> Result<ParameterSpace, ParameterError> {
        ParameterSpace::from_parameters(
            self.parameters
                .iter()
                .map(|spec| {
                    let parameter =
                        Parameter::new(spec.name.clone(), spec.default).with_bounds(spec.bounds);
                    if spec.frozen {
                        parameter.frozen()
                    } else {
                        parameter
                    }
                })
                .collect(),
        )
    }

    /// Component labels in evaluation order
    pub fn labels(&self) -> Vec<&str> {
        let mut labels = vec![];
        self.root.visit_components(&mut |label, _| labels.push(label));
        labels
    }

    /// Whether the model produces flux rather than a dimensionless factor
    pub fn is_flux(&self) -> bool {
        self.root.output() == Output::Flux
    }

    /// Bin-integrated flux (or factor for a purely multiplicative model) on `bins`
    ///
    /// `parameters` holds the full parameter values in [CompositeModel::parameter_specs] order.
    /// Domain violations, wrong-length and non-finite outputs of any component are errors.
    pub fn evaluate(&self, bins: &EnergyBins, parameters: &[f64]) -> Result<Array1<f64>, ModelError> {
        if parameters.len() != self.parameters.len() {
            return Err(ModelError::ParameterCount {
                model: self.to_string(),
                expected: self.parameters.len(),
                actual: parameters.len(),
            });
        }
        let mut offset = 0;
        let flux = self.root.evaluate(bins, parameters, &mut offset)?;
        debug_assert_eq!(offset, parameters.len());
        Ok(flux)
    }
}

impl fmt::Display for CompositeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::DomainError;
    use crate::model::ModelRegistry;

    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                "flat",
                |bins: &EnergyBins, p: &[f64]| Ok(bins.widths() * p[0]),
                vec![ParameterSpec::new("norm", 1.0)],
            )
            .unwrap();
        registry
            .register_multiplicative(
                "scale",
                |bins: &EnergyBins, p: &[f64]| {
                    if p[0] < 0.0 {
                        return Err(DomainError::new("factor", p[0], "must be non-negative"));
                    }
                    Ok(Array1::from_elem(bins.len(), p[0]))
                },
                vec![ParameterSpec::new("factor", 1.0)],
            )
            .unwrap();
        registry
            .register_convolution(
                "shift",
                |_bins: &EnergyBins, _p: &[f64], flux| {
                    let mut out = Array1::zeros(flux.len());
                    for i in 1..flux.len() {
                        out[i] = flux[i - 1];
                    }
                    Ok(out)
                },
                vec![],
            )
            .unwrap();
        registry
            .register(
                "broken",
                |_bins: &EnergyBins, _p: &[f64]| Ok(array![1.0, f64::NAN, 1.0]),
                vec![],
            )
            .unwrap();
        registry
            .register(
                "short",
                |_bins: &EnergyBins, _p: &[f64]| Ok(array![1.0]),
                vec![],
            )
            .unwrap();
        registry
    }

    fn bins() -> EnergyBins {
        EnergyBins::linspace(0.0, 3.0, 3).unwrap()
    }

    #[test]
    fn sum_of_same_component_gets_unique_labels() {
        let model = registry()
            .compose(&["flat", "flat", "flat"], CombinationRule::Additive)
            .unwrap();
        assert_eq!(model.labels(), vec!["flat", "flat_2", "flat_3"]);
        let names: Vec<_> = model.parameter_specs().iter().map(|p| &p.name).collect();
        assert_eq!(names, vec!["flat.norm", "flat_2.norm", "flat_3.norm"]);
        let flux = model.evaluate(&bins(), &[1.0, 2.0, 3.0]).unwrap();
        assert_abs_diff_eq!(flux, array![6.0, 6.0, 6.0], epsilon = 1e-12);
    }

    #[test]
    fn nested_product_of_sum() {
        let registry = registry();
        let sum = registry
            .compose(&["flat", "flat"], CombinationRule::Additive)
            .unwrap();
        let model = CompositeModel::combine(
            vec![registry.node("scale").unwrap(), sum.into()],
            CombinationRule::Multiplicative,
        )
        .unwrap();
        assert_eq!(model.to_string(), "scale * (flat + flat_2)");
        assert!(model.is_flux());
        let flux = model.evaluate(&bins(), &[0.5, 1.0, 3.0]).unwrap();
        assert_abs_diff_eq!(flux, array![2.0, 2.0, 2.0], epsilon = 1e-12);
    }

    #[test]
    fn convolution_applies_in_order() {
        let model = registry()
            .compose(&["flat", "shift", "shift"], CombinationRule::Convolution)
            .unwrap();
        let bins = EnergyBins::linspace(0.0, 4.0, 4).unwrap();
        let flux = model.evaluate(&bins, &[1.0]).unwrap();
        assert_abs_diff_eq!(flux, array![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn invalid_compositions() {
        let registry = registry();
        for (names, rule) in [
            (&["shift", "flat"][..], CombinationRule::Convolution),
            (&["flat"][..], CombinationRule::Convolution),
            (&["flat", "flat"][..], CombinationRule::Convolution),
            (&["flat", "shift"][..], CombinationRule::Additive),
            (&["flat", "scale"][..], CombinationRule::Additive),
            (&["flat", "flat"][..], CombinationRule::Multiplicative),
            (&["scale", "shift"][..], CombinationRule::Multiplicative),
            (&[][..], CombinationRule::Additive),
        ] {
            assert!(
                matches!(
                    registry.compose(names, rule),
                    Err(RegistryError::InvalidComposition(_))
                ),
                "{names:?} {rule:?}"
            );
        }
        assert!(registry.model("shift").is_err());
    }

    #[test]
    fn domain_error_names_component() {
        let model = registry()
            .compose(&["scale", "flat"], CombinationRule::Multiplicative)
            .unwrap();
        let err = model.evaluate(&bins(), &[-1.0, 1.0]).unwrap_err();
        assert!(matches!(err, ModelError::Domain { model, .. } if model == "scale"));
    }

    #[test]
    fn invalid_outputs_are_errors() {
        let registry = registry();
        let err = registry.model("broken").unwrap().evaluate(&bins(), &[]).unwrap_err();
        assert!(matches!(err, ModelError::NonFinite { ref model, bin: 1, .. } if model == "broken"));
        let err = registry.model("short").unwrap().evaluate(&bins(), &[]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::WrongLength {
                expected: 3,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn parameter_count_is_checked() {
        let model = registry().model("flat").unwrap();
        assert!(matches!(
            model.evaluate(&bins(), &[1.0, 2.0]),
            Err(ModelError::ParameterCount { .. })
        ));
    }

    #[test]
    fn space_from_declarations() {
        let mut registry = registry();
        registry
            .register(
                "line",
                |bins: &EnergyBins, p: &[f64]| Ok(bins.widths() * p[0]),
                vec![
                    ParameterSpec::new("norm", 2.0).with_bounds(0.0, 10.0),
                    ParameterSpec::new("energy", 6.4).frozen(),
                ],
            )
            .unwrap();
        let model = registry.compose(&["flat", "line"], CombinationRule::Additive).unwrap();
        let space = model.parameter_space().unwrap();
        assert_eq!(space.free_names(), vec!["flat.norm", "line.norm"]);
        assert_eq!(space.value("line.energy").unwrap(), 6.4);
        assert_eq!(space.get("line.norm").unwrap().bounds(), crate::params::Bounds::new(0.0, 10.0));
    }
}
