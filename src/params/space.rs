use crate::error::ParameterError;
use crate::fit::prior::LnPrior1D;
use crate::params::parameter::{Bounds, Parameter, ParameterStatus};
use crate::params::tie::TieExpr;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered set of named parameters and the free-parameter vector layout
///
/// Backends see only a flat vector of the free parameters, i.e. parameters which are neither
/// frozen nor tied, in declaration order. Every change of that layout (freezing, tying, bounds
/// changes) increments [ParameterSpace::layout_version], anything built for an older version
/// must be rebuilt, see [ParameterSpace::check_layout].
///
/// Ties form a directed acyclic graph, a tie closing a cycle is rejected when it is set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Parameter>", try_from = "Vec<Parameter>")]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    tie_order: Vec<usize>,
    layout_version: u64,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters(parameters: Vec<Parameter>) -> Result<Self, ParameterError> {
        let mut space = Self::new();
        let mut ties = vec![];
        for mut p in parameters {
            if let Some(tie) = p.tie().cloned() {
                ties.push((p.name().to_owned(), tie));
                p.set_tie(None);
            }
            space.add(p)?;
        }
        for (name, tie) in ties {
            space.tie(&name, tie)?;
        }
        Ok(space)
    }

    /// Append a parameter
    pub fn add(&mut self, parameter: Parameter) -> Result<(), ParameterError> {
        let name = parameter.name().to_owned();
        if self.index.contains_key(&name) {
            return Err(ParameterError::DuplicateParameter(name));
        }
        if !parameter.bounds().is_valid() {
            return Err(ParameterError::InvalidBounds {
                name,
                lower: parameter.bounds().lower,
                upper: parameter.bounds().upper,
            });
        }
        check_value(&parameter, parameter.value())?;
        if parameter.tie().is_some() {
            return Err(ParameterError::ParameterTied(name));
        }
        self.index.insert(name, self.parameters.len());
        self.parameters.push(parameter);
        self.rebuild_layout();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index.get(name).map(|&i| &self.parameters[i])
    }

    pub fn value(&self, name: &str) -> Result<f64, ParameterError> {
        Ok(self.parameters[self.position(name)?].value())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name())
    }

    /// Names of the free parameters, in vector order
    pub fn free_names(&self) -> Vec<&str> {
        self.free.iter().map(|&i| self.parameters[i].name()).collect()
    }

    /// Length of the free-parameter vector
    pub fn nfree(&self) -> usize {
        self.free.len()
    }

    pub fn free_bounds(&self) -> Vec<Bounds> {
        self.free.iter().map(|&i| self.parameters[i].bounds()).collect()
    }

    pub fn free_priors(&self) -> Vec<Option<LnPrior1D>> {
        self.free
            .iter()
            .map(|&i| self.parameters[i].prior().cloned())
            .collect()
    }

    /// Current values of all parameters as `(name, value)` pairs
    pub fn named_values(&self) -> Vec<(String, f64)> {
        self.parameters
            .iter()
            .map(|p| (p.name().to_owned(), p.value()))
            .collect()
    }

    pub fn layout_version(&self) -> u64 {
        self.layout_version
    }

    /// Fail with [ParameterError::StaleLayout] unless `version` is the current layout version
    pub fn check_layout(&self, version: u64) -> Result<(), ParameterError> {
        if version != self.layout_version {
            return Err(ParameterError::StaleLayout {
                expected: self.layout_version,
                actual: version,
            });
        }
        Ok(())
    }

    /// Values of the free parameters
    pub fn to_vector(&self) -> Vec<f64> {
        self.free.iter().map(|&i| self.parameters[i].value()).collect()
    }

    /// Set the free parameters from a vector and re-derive the tied ones
    ///
    /// The exact inverse of [ParameterSpace::to_vector]. Values must lie within bounds, nothing
    /// is changed on error.
    pub fn from_vector(&mut self, values: &[f64]) -> Result<(), ParameterError> {
        self.check_vector_length(values)?;
        for (&i, &value) in self.free.iter().zip(values) {
            check_value(&self.parameters[i], value)?;
        }
        let resolved = self.resolve(values)?;
        for (p, value) in self.parameters.iter_mut().zip(resolved) {
            p.set_value_unchecked(value);
        }
        Ok(())
    }

    /// Values of all parameters for the given free-parameter vector, without changing the space
    ///
    /// Frozen parameters keep their values, tied ones are evaluated in dependency order.
    /// Bounds are not checked.
    pub fn resolve(&self, values: &[f64]) -> Result<Vec<f64>, ParameterError> {
        self.check_vector_length(values)?;
        let mut all: Vec<f64> = self.parameters.iter().map(|p| p.value()).collect();
        for (&i, &value) in self.free.iter().zip(values) {
            all[i] = value;
        }
        self.resolve_ties(&mut all)?;
        Ok(all)
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        let i = self.position(name)?;
        if self.parameters[i].tie().is_some() {
            return Err(ParameterError::ParameterTied(name.to_owned()));
        }
        check_value(&self.parameters[i], value)?;
        let mut all: Vec<f64> = self.parameters.iter().map(|p| p.value()).collect();
        all[i] = value;
        self.resolve_ties(&mut all)?;
        for (p, value) in self.parameters.iter_mut().zip(all) {
            p.set_value_unchecked(value);
        }
        Ok(())
    }

    /// Change bounds, the current value is clamped into the new interval
    pub fn set_bounds(&mut self, name: &str, bounds: Bounds) -> Result<(), ParameterError> {
        let i = self.position(name)?;
        if !bounds.is_valid() {
            return Err(ParameterError::InvalidBounds {
                name: name.to_owned(),
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }
        let p = &mut self.parameters[i];
        p.set_bounds_unchecked(bounds);
        if p.tie().is_none() {
            let clamped = bounds.clamp(p.value());
            self.set_value(name, clamped)?;
        }
        self.bump_layout();
        Ok(())
    }

    pub fn set_prior(&mut self, name: &str, prior: Option<LnPrior1D>) -> Result<(), ParameterError> {
        let i = self.position(name)?;
        self.parameters[i].set_prior(prior);
        Ok(())
    }

    pub fn freeze(&mut self, name: &str) -> Result<(), ParameterError> {
        self.set_frozen(name, true)
    }

    pub fn unfreeze(&mut self, name: &str) -> Result<(), ParameterError> {
        self.set_frozen(name, false)
    }

    fn set_frozen(&mut self, name: &str, frozen: bool) -> Result<(), ParameterError> {
        let i = self.position(name)?;
        if self.parameters[i].status() == ParameterStatus::Tied {
            return Err(ParameterError::ParameterTied(name.to_owned()));
        }
        if self.parameters[i].is_frozen() != frozen {
            self.parameters[i].set_frozen(frozen);
            self.rebuild_layout();
        }
        Ok(())
    }

    /// Derive parameter `name` from `expr`
    ///
    /// Fails with [ParameterError::CyclicTie] if the tie graph would get a cycle, and with
    /// [ParameterError::UnknownParameter] if the expression reads an unknown parameter. The
    /// space is not changed on error.
    pub fn tie(&mut self, name: &str, expr: TieExpr) -> Result<(), ParameterError> {
        let i = self.position(name)?;
        for dep in expr.dependencies() {
            self.position(dep)?;
        }
        let previous = self.parameters[i].tie().cloned();
        self.parameters[i].set_tie(Some(expr));
        let order = match self.topological_tie_order() {
            Ok(order) => order,
            Err(cycle) => {
                self.parameters[i].set_tie(previous);
                return Err(ParameterError::CyclicTie { cycle });
            }
        };
        let mut all: Vec<f64> = self.parameters.iter().map(|p| p.value()).collect();
        let saved_order = std::mem::replace(&mut self.tie_order, order);
        if let Err(err) = self.resolve_ties(&mut all) {
            self.parameters[i].set_tie(previous);
            self.tie_order = saved_order;
            return Err(err);
        }
        for (p, value) in self.parameters.iter_mut().zip(all) {
            p.set_value_unchecked(value);
        }
        self.rebuild_layout();
        Ok(())
    }

    /// Remove a tie, the parameter becomes free (or frozen) at its current derived value
    pub fn untie(&mut self, name: &str) -> Result<(), ParameterError> {
        let i = self.position(name)?;
        if self.parameters[i].tie().is_some() {
            self.parameters[i].set_tie(None);
            self.rebuild_layout();
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize, ParameterError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ParameterError::UnknownParameter(name.to_owned()))
    }

    fn check_vector_length(&self, values: &[f64]) -> Result<(), ParameterError> {
        if values.len() != self.free.len() {
            return Err(ParameterError::VectorLengthMismatch {
                expected: self.free.len(),
                actual: values.len(),
            });
        }
        Ok(())
    }

    fn resolve_ties(&self, all: &mut [f64]) -> Result<(), ParameterError> {
        for &i in &self.tie_order {
            // tie_order contains tied parameters only
            if let Some(expr) = self.parameters[i].tie() {
                let value = expr.evaluate(&|name: &str| self.index.get(name).map(|&j| all[j]))?;
                all[i] = value;
            }
        }
        Ok(())
    }

    fn bump_layout(&mut self) {
        self.layout_version += 1;
    }

    fn rebuild_layout(&mut self) {
        self.free = self
            .parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.status() == ParameterStatus::Free)
            .map(|(i, _)| i)
            .collect();
        // Cycles are rejected in tie(), so the order always exists here
        self.tie_order = self.topological_tie_order().unwrap_or_default();
        self.bump_layout();
    }

    /// Depth-first topological sort of tied parameters, a cycle is returned as a name path
    fn topological_tie_order(&self) -> Result<Vec<usize>, Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            space: &ParameterSpace,
            i: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
            order: &mut Vec<usize>,
        ) -> Result<(), Vec<String>> {
            match marks[i] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    let start = path.iter().position(|&j| j == i).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|&j| space.parameters[j].name().to_owned())
                        .collect();
                    cycle.push(space.parameters[i].name().to_owned());
                    return Err(cycle);
                }
                Mark::New => {}
            }
            let Some(expr) = space.parameters[i].tie() else {
                marks[i] = Mark::Done;
                return Ok(());
            };
            marks[i] = Mark::Active;
            path.push(i);
            for dep in expr.dependencies() {
                if let Some(&j) = space.index.get(dep) {
                    visit(space, j, marks, path, order)?;
                }
            }
            path.pop();
            marks[i] = Mark::Done;
            order.push(i);
            Ok(())
        }

        let mut marks = vec![Mark::New; self.parameters.len()];
        let mut order = vec![];
        let mut path = vec![];
        for i in 0..self.parameters.len() {
            visit(self, i, &mut marks, &mut path, &mut order)?;
        }
        Ok(order)
    }
}

fn check_value(parameter: &Parameter, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() {
        return Err(ParameterError::NonFiniteValue(parameter.name().to_owned()));
    }
    let bounds = parameter.bounds();
    if !bounds.contains(value) {
        return Err(ParameterError::OutOfBounds {
            name: parameter.name().to_owned(),
            value,
            lower: bounds.lower,
            upper: bounds.upper,
        });
    }
    Ok(())
}

impl From<ParameterSpace> for Vec<Parameter> {
    fn from(space: ParameterSpace) -> Self {
        space.parameters
    }
}

impl TryFrom<Vec<Parameter>> for ParameterSpace {
    type Error = ParameterError;

    fn try_from(parameters: Vec<Parameter>) -> Result<Self, Self::Error> {
        Self::from_parameters(parameters)
    }
}
