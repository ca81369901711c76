use criterion::Criterion;
use rand::prelude::*;
use std::hint::black_box;
use std::sync::Arc;
use xspex::{
    CancelToken, Dataset, EnsembleMcmc, FitBackend, LocalOptimizer, ModelRegistry, Objective,
    Statistic,
};
use xspex_test_util::{diagonal_response, synthetic_spectrum};

fn power_law_objective() -> (Objective, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(0);
    let registry = ModelRegistry::with_builtin_models();
    let model = registry.model("power_law").unwrap();
    let space = model.parameter_space().unwrap();
    let response = diagonal_response(0.5, 10.0, 128, 100.0);
    let spectrum = synthetic_spectrum(&mut rng, &model, &response, &[5.0, 1.7], 1e3);
    let objective = Objective::new(
        model,
        &space,
        &[Dataset::new(Arc::new(spectrum), response)],
        Statistic::Poisson,
        None,
    )
    .unwrap();
    (objective, space.to_vector())
}

pub fn bench_optimizer(c: &mut Criterion) {
    let (objective, start) = power_law_objective();
    let optimizer = LocalOptimizer::default();
    c.bench_function("power law: local optimizer", |b| {
        b.iter(|| optimizer.run(black_box(&objective), &start, &CancelToken::new()));
    });
}

pub fn bench_mcmc(c: &mut Criterion) {
    let (objective, start) = power_law_objective();
    let mcmc = EnsembleMcmc::new(32, 200, 100, 1);
    c.bench_function("power law: ensemble MCMC 200 iterations", |b| {
        b.iter(|| mcmc.run(black_box(&objective), &start, &CancelToken::new()));
    });
}
