use crate::array_stats::{argmax, covariance};
use crate::error::{FitError, FitWarning};
use crate::objective::Objective;
use crate::sorted_array::SortedArray;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Outcome of a backend run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum FitStatus {
    /// Stopping criterion reached
    Converged,
    /// Iteration budget exhausted before the stopping criterion
    NotConverged,
    /// Stopped by cancellation, the result holds the iterations completed before it
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum BackendKind {
    LocalOptimizer,
    EnsembleMcmc,
    NestedSampling,
}

/// Posterior samples, one row per sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleEnsemble {
    samples: Array2<f64>,
    ln_posterior: Array1<f64>,
    ln_likelihood: Array1<f64>,
}

impl SampleEnsemble {
    pub(crate) fn new(
        samples: Array2<f64>,
        ln_posterior: Array1<f64>,
        ln_likelihood: Array1<f64>,
    ) -> Self {
        debug_assert_eq!(samples.nrows(), ln_posterior.len());
        debug_assert_eq!(samples.nrows(), ln_likelihood.len());
        Self {
            samples,
            ln_posterior,
            ln_likelihood,
        }
    }

    pub(crate) fn empty(ndim: usize) -> Self {
        Self::new(Array2::zeros((0, ndim)), Array1::zeros(0), Array1::zeros(0))
    }

    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    pub fn ln_posterior(&self) -> ArrayView1<'_, f64> {
        self.ln_posterior.view()
    }

    pub fn ln_likelihood(&self) -> ArrayView1<'_, f64> {
        self.ln_likelihood.view()
    }

    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ndim(&self) -> usize {
        self.samples.ncols()
    }

    /// Sample with the largest ln-posterior
    pub fn best(&self) -> Option<ArrayView1<'_, f64>> {
        argmax(self.ln_posterior.view()).map(|i| self.samples.row(i))
    }

    /// Sample covariance matrix of the parameters
    pub fn covariance(&self) -> Option<Array2<f64>> {
        covariance(self.samples.view())
    }
}

/// Bayesian evidence estimate of nested sampling
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEvidence {
    /// ln Z
    pub value: f64,
    /// Statistical uncertainty of ln Z, `sqrt(information / n_live)`
    pub uncertainty: f64,
    /// Kullback-Leibler divergence of the posterior from the prior, nats
    pub information: f64,
}

/// Run statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Completed iterations: optimisation rounds, MCMC steps or nested-sampling replacements
    pub iterations: usize,
    pub evaluations: usize,
    pub failed_evaluations: usize,
    /// Mean acceptance fraction of MCMC walkers
    pub acceptance_fraction: Option<f64>,
    pub warnings: Vec<FitWarning>,
}

/// What a backend hands back, before names and summaries are attached
#[derive(Clone, Debug, PartialEq)]
pub struct BackendOutput {
    pub kind: BackendKind,
    pub status: FitStatus,
    /// Best free-parameter vector: the optimum or the sample of largest posterior
    pub best: Vec<f64>,
    /// Covariance of the free parameters from the Hessian
    pub covariance: Option<Array2<f64>>,
    pub samples: Option<SampleEnsemble>,
    pub evidence: Option<LogEvidence>,
    pub diagnostics: Diagnostics,
}

/// Point estimate and credible interval of one free parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub best: f64,
    /// One-sigma error from the covariance matrix
    pub error: Option<f64>,
    /// 16, 50 and 84 per cent posterior quantiles
    pub quantiles: Option<[f64; 3]>,
}

/// Result of a fit, immutable after creation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    backend: BackendKind,
    status: FitStatus,
    parameter_names: Vec<String>,
    best_fit: Vec<f64>,
    statistic: Option<f64>,
    degrees_of_freedom: isize,
    covariance: Option<Array2<f64>>,
    summaries: Vec<ParameterSummary>,
    named_values: Vec<(String, f64)>,
    samples: Option<SampleEnsemble>,
    evidence: Option<LogEvidence>,
    diagnostics: Diagnostics,
}

impl FitResult {
    pub(crate) fn new(output: BackendOutput, objective: &Objective) -> Result<Self, FitError> {
        let parameter_names = objective
            .space()
            .free_names()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let covariance = output.covariance.or_else(|| {
            output
                .samples
                .as_ref()
                .filter(|s| s.len() > 1)
                .and_then(SampleEnsemble::covariance)
        });
        let quantiles = output.samples.as_ref().filter(|s| !s.is_empty()).map(|s| {
            s.samples
                .axis_iter(Axis(1))
                .map(|column| {
                    SortedArray::try_from(column)
                        .map(|sorted| [sorted.ppf(0.16), sorted.median(), sorted.ppf(0.84)])
                        .ok()
                })
                .collect::<Vec<_>>()
        });
        let summaries = parameter_names
            .iter()
            .enumerate()
            .map(|(i, name)| ParameterSummary {
                name: name.clone(),
                best: output.best[i],
                error: covariance
                    .as_ref()
                    .map(|c| c[(i, i)])
                    .filter(|&variance| variance >= 0.0)
                    .map(f64::sqrt),
                quantiles: quantiles.as_ref().and_then(|q| q[i]),
            })
            .collect();
        let named_values = objective
            .space()
            .names()
            .map(str::to_owned)
            .zip(objective.resolve(&output.best)?)
            .collect();
        Ok(Self {
            backend: output.kind,
            status: output.status,
            statistic: objective.statistic(&output.best).ok(),
            degrees_of_freedom: objective.degrees_of_freedom(),
            parameter_names,
            best_fit: output.best,
            covariance,
            summaries,
            named_values,
            samples: output.samples,
            evidence: output.evidence,
            diagnostics: output.diagnostics,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Names of the free parameters, in vector order
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Best free-parameter vector
    pub fn best_fit(&self) -> &[f64] {
        &self.best_fit
    }

    /// Fit statistic at the best fit
    pub fn statistic(&self) -> Option<f64> {
        self.statistic
    }

    pub fn degrees_of_freedom(&self) -> isize {
        self.degrees_of_freedom
    }

    /// Statistic divided by the degrees of freedom
    pub fn reduced_statistic(&self) -> Option<f64> {
        let dof = self.degrees_of_freedom;
        self.statistic.filter(|_| dof > 0).map(|s| s / dof as f64)
    }

    /// Covariance of the free parameters, from the Hessian or the samples
    pub fn covariance(&self) -> Option<ArrayView2<'_, f64>> {
        self.covariance.as_ref().map(|c| c.view())
    }

    pub fn summaries(&self) -> &[ParameterSummary] {
        &self.summaries
    }

    pub fn summary(&self, name: &str) -> Option<&ParameterSummary> {
        self.summaries.iter().find(|s| s.name == name)
    }

    /// Values of all parameters at the best fit, frozen and tied included
    pub fn named_values(&self) -> &[(String, f64)] {
        &self.named_values
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.named_values
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }

    pub fn samples(&self) -> Option<&SampleEnsemble> {
        self.samples.as_ref()
    }

    pub fn evidence(&self) -> Option<LogEvidence> {
        self.evidence
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn warnings(&self) -> &[FitWarning] {
        &self.diagnostics.warnings
    }
}
