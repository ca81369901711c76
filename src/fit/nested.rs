use crate::error::{FitError, FitWarning, ParameterError};
use crate::fit::backend::{FitBackend, Sampler};
use crate::fit::{
    BackendKind, BackendOutput, CancelToken, Diagnostics, EvaluationCounter, FitStatus,
    LogEvidence, LogPosterior, SampleEnsemble,
};
use crate::special::logaddexp;

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Nested sampling of the evidence and the posterior
///
/// A fixed number of live points is drawn from the prior through the unit-hypercube prior
/// transform. Every iteration the live point of the lowest likelihood is moved to the dead set
/// and replaced by a constrained random walk in the unit hypercube, started from another live
/// point and accepting only points of higher likelihood. The walk step adapts to the
/// acceptance rate. The prior volume shrinks as `exp(-i / nlive)`, evidence is integrated with
/// the trapezoidal rule.
///
/// The run stops when the evidence the live points can still add, `L_max X`, changes `ln Z` by
/// less than `evidence_tolerance`, or after `max_iterations` replacements. Every parameter must
/// have a proper prior or finite bounds.
///
/// Posterior samples are drawn from the weighted dead and live points with systematic
/// resampling, so the sample set is equally weighted.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "NestedSampling", default)]
pub struct NestedSampling {
    pub nlive: usize,
    pub evidence_tolerance: f64,
    pub max_iterations: usize,
    pub walk_steps: usize,
    pub seed: u64,
    pub parallel: bool,
}

impl NestedSampling {
    pub fn new(nlive: usize, evidence_tolerance: f64) -> Self {
        assert!(nlive > 1, "nlive must be at least two");
        assert!(evidence_tolerance > 0.0, "evidence_tolerance must be positive");
        Self {
            nlive,
            evidence_tolerance,
            max_iterations: Self::default_max_iterations(),
            walk_steps: Self::default_walk_steps(),
            seed: Self::default_seed(),
            parallel: Self::default_parallel(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_walk_steps(mut self, walk_steps: usize) -> Self {
        assert!(walk_steps > 0, "walk_steps must be positive");
        self.walk_steps = walk_steps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[inline]
    pub fn default_nlive() -> usize {
        400
    }

    #[inline]
    pub fn default_evidence_tolerance() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_max_iterations() -> usize {
        100_000
    }

    #[inline]
    pub fn default_walk_steps() -> usize {
        25
    }

    #[inline]
    pub fn default_seed() -> u64 {
        0
    }

    #[inline]
    pub fn default_parallel() -> bool {
        true
    }

    fn validate(&self) -> Result<(), FitError> {
        if self.nlive < 2 {
            return Err(FitError::InvalidConfig(format!(
                "at least two live points are required, {} given",
                self.nlive
            )));
        }
        if !(self.evidence_tolerance > 0.0) {
            return Err(FitError::InvalidConfig(format!(
                "evidence tolerance must be positive, {} given",
                self.evidence_tolerance
            )));
        }
        if self.walk_steps == 0 {
            return Err(FitError::InvalidConfig(
                "random walk needs at least one step".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for NestedSampling {
    fn default() -> Self {
        Self::new(Self::default_nlive(), Self::default_evidence_tolerance())
    }
}

#[derive(Clone, Debug)]
struct LivePoint {
    unit: Vec<f64>,
    params: Vec<f64>,
    ln_likelihood: f64,
}

/// Point of the nested-sampling trace with the ln prior mass it represents
struct WeightedPoint {
    params: Vec<f64>,
    ln_likelihood: f64,
    ln_width: f64,
}

/// Running evidence and information integrals
#[derive(Clone, Copy, Debug)]
struct Integrals {
    ln_z: f64,
    information: f64,
}

impl Integrals {
    fn new() -> Self {
        Self {
            ln_z: f64::NEG_INFINITY,
            information: 0.0,
        }
    }

    fn add(&mut self, ln_width: f64, ln_likelihood: f64) {
        let ln_weight = ln_width + ln_likelihood;
        if ln_weight == f64::NEG_INFINITY {
            return;
        }
        let ln_z = logaddexp(self.ln_z, ln_weight);
        let previous = if self.ln_z == f64::NEG_INFINITY {
            0.0
        } else {
            f64::exp(self.ln_z - ln_z) * (self.information + self.ln_z)
        };
        self.information = f64::exp(ln_weight - ln_z) * ln_likelihood + previous - ln_z;
        self.ln_z = ln_z;
    }
}

/// Constrained random walk in the unit hypercube with an adaptive step
struct Walker {
    steps: usize,
    step: f64,
    stalled: usize,
}

impl Walker {
    fn walk<P: LogPosterior + ?Sized, R: Rng>(
        &mut self,
        posterior: &P,
        counter: &EvaluationCounter,
        rng: &mut R,
        from: &LivePoint,
        threshold: f64,
    ) -> Result<LivePoint, FitError> {
        let mut current = from.clone();
        let mut unit = vec![0.0; from.unit.len()];
        let mut params = vec![0.0; from.params.len()];
        let (mut accepted, mut rejected) = (0u32, 0u32);
        for _ in 0..self.steps {
            for (u, &u0) in unit.iter_mut().zip(&current.unit) {
                let shift: f64 = rng.sample(StandardNormal);
                *u = u0 + self.step * shift;
            }
            if unit.iter().any(|u| !(0.0..=1.0).contains(u)) {
                rejected += 1;
                continue;
            }
            posterior.prior_transform(&unit, &mut params)?;
            let ln_likelihood = counter.ln_likelihood(posterior, &params);
            if ln_likelihood > threshold {
                current.unit.copy_from_slice(&unit);
                current.params.copy_from_slice(&params);
                current.ln_likelihood = ln_likelihood;
                accepted += 1;
            } else {
                rejected += 1;
            }
        }
        if accepted > rejected {
            self.step *= f64::exp(1.0 / accepted as f64);
        } else if rejected > 0 {
            self.step /= f64::exp(1.0 / rejected as f64);
        }
        self.step = self.step.min(1.0);
        if accepted == 0 {
            self.stalled += 1;
        }
        Ok(current)
    }
}

impl FitBackend for NestedSampling {
    fn kind(&self) -> BackendKind {
        BackendKind::NestedSampling
    }

    fn run<P: LogPosterior + ?Sized>(
        &self,
        posterior: &P,
        start: &[f64],
        cancel: &CancelToken,
    ) -> Result<BackendOutput, FitError> {
        let ndim = posterior.ndim();
        if start.len() != ndim {
            return Err(ParameterError::VectorLengthMismatch {
                expected: ndim,
                actual: start.len(),
            }
            .into());
        }
        self.validate()?;
        posterior.check_proper_prior()?;
        tracing::info!(ndim, nlive = self.nlive, "nested sampling started");

        let counter = EvaluationCounter::default();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let nlive = self.nlive as f64;

        let mut live = (0..self.nlive)
            .map(|_| {
                let unit: Vec<f64> = (0..ndim).map(|_| rng.random()).collect();
                let mut params = vec![0.0; ndim];
                posterior.prior_transform(&unit, &mut params)?;
                Ok(LivePoint {
                    unit,
                    params,
                    ln_likelihood: f64::NEG_INFINITY,
                })
            })
            .collect::<Result<Vec<_>, FitError>>()?;
        let evaluate = |point: &mut LivePoint| {
            point.ln_likelihood = counter.ln_likelihood(posterior, &point.params);
        };
        if self.parallel {
            live.par_iter_mut().for_each(evaluate);
        } else {
            live.iter_mut().for_each(evaluate);
        }
        if live.iter().all(|p| p.ln_likelihood == f64::NEG_INFINITY) {
            return Err(FitError::NonFiniteLogPosterior { walkers: self.nlive });
        }

        let ln_shrinkage = f64::ln(0.5) + f64::ln(-f64::exp_m1(-2.0 / nlive));
        let mut integrals = Integrals::new();
        let mut dead: Vec<WeightedPoint> = vec![];
        let mut walker = Walker {
            steps: self.walk_steps,
            step: 0.1,
            stalled: 0,
        };
        let mut status = FitStatus::NotConverged;
        let mut iterations = 0;
        while iterations < self.max_iterations {
            let ln_x = -(iterations as f64) / nlive;
            let ln_likelihood_max = live
                .iter()
                .map(|p| p.ln_likelihood)
                .fold(f64::NEG_INFINITY, f64::max);
            if integrals.ln_z.is_finite()
                && logaddexp(integrals.ln_z, ln_likelihood_max + ln_x) - integrals.ln_z
                    < self.evidence_tolerance
            {
                status = FitStatus::Converged;
                break;
            }
            if cancel.is_cancelled() {
                status = FitStatus::Cancelled;
                break;
            }

            let (worst, threshold) = live
                .iter()
                .enumerate()
                .map(|(i, p)| (i, p.ln_likelihood))
                .fold((0, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc });
            let seed = {
                let i = rng.random_range(0..self.nlive - 1);
                if i < worst { i } else { i + 1 }
            };
            let replacement =
                walker.walk(posterior, &counter, &mut rng, &live[seed], threshold)?;
            if cancel.is_cancelled() {
                status = FitStatus::Cancelled;
                break;
            }

            // width of the trapezoid: (X_{i-1} - X_{i+1}) / 2
            let ln_width = ln_x + ln_shrinkage;
            integrals.add(ln_width, threshold);
            let removed = std::mem::replace(&mut live[worst], replacement);
            dead.push(WeightedPoint {
                params: removed.params,
                ln_likelihood: removed.ln_likelihood,
                ln_width,
            });
            iterations += 1;
            if iterations % 1000 == 0 {
                tracing::debug!(
                    iterations,
                    ln_z = integrals.ln_z,
                    step = walker.step,
                    "nested sampling progress"
                );
            }
        }

        let ln_width = -(iterations as f64) / nlive - nlive.ln();
        for point in live {
            integrals.add(ln_width, point.ln_likelihood);
            dead.push(WeightedPoint {
                params: point.params,
                ln_likelihood: point.ln_likelihood,
                ln_width,
            });
        }
        let information = integrals.information.max(0.0);
        let evidence = LogEvidence {
            value: integrals.ln_z,
            uncertainty: f64::sqrt(information / nlive),
            information,
        };

        let samples = resample(posterior, &dead, integrals.ln_z, rng.random());
        let best = dead
            .iter()
            .map(|p| (p, p.ln_likelihood + posterior.ln_prior(&p.params)))
            .fold((None, f64::NEG_INFINITY), |acc, (p, value)| {
                if value > acc.1 { (Some(p), value) } else { acc }
            })
            .0
            .map_or_else(|| start.to_vec(), |p| p.params.clone());

        let mut warnings = vec![];
        if walker.stalled > 0 {
            tracing::warn!(count = walker.stalled, "random walk found no better point");
            warnings.push(FitWarning::StalledReplacements {
                count: walker.stalled,
            });
        }
        tracing::info!(
            ?status,
            iterations,
            ln_z = evidence.value,
            ln_z_error = evidence.uncertainty,
            "nested sampling finished"
        );

        Ok(BackendOutput {
            kind: BackendKind::NestedSampling,
            status,
            best,
            covariance: None,
            samples: Some(samples),
            evidence: Some(evidence),
            diagnostics: Diagnostics {
                iterations,
                evaluations: counter.evaluations(),
                failed_evaluations: counter.failures(),
                acceptance_fraction: None,
                warnings,
            },
        })
    }
}

impl Sampler for NestedSampling {}

/// Equally weighted sample set of the trace length, systematic resampling with `offset` in
/// `[0, 1)`
fn resample<P: LogPosterior + ?Sized>(
    posterior: &P,
    trace: &[WeightedPoint],
    ln_z: f64,
    offset: f64,
) -> SampleEnsemble {
    let ndim = posterior.ndim();
    let weights: Vec<f64> = trace
        .iter()
        .map(|p| f64::exp(p.ln_width + p.ln_likelihood - ln_z))
        .collect();
    let total: f64 = weights.iter().sum();
    if trace.is_empty() || !(total > 0.0) {
        return SampleEnsemble::empty(ndim);
    }

    let n = trace.len();
    let mut samples = Array2::zeros((n, ndim));
    let mut ln_posterior = Array1::zeros(n);
    let mut ln_likelihood = Array1::zeros(n);
    let mut cumulative = weights[0] / total;
    let mut k = 0;
    for m in 0..n {
        let target = (m as f64 + offset) / n as f64;
        while cumulative < target && k < n - 1 {
            k += 1;
            cumulative += weights[k] / total;
        }
        let point = &trace[k];
        for (s, &x) in samples.row_mut(m).iter_mut().zip(&point.params) {
            *s = x;
        }
        ln_likelihood[m] = point.ln_likelihood;
        ln_posterior[m] = point.ln_likelihood + posterior.ln_prior(&point.params);
    }
    SampleEnsemble::new(samples, ln_posterior, ln_likelihood)
}
