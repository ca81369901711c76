use criterion::Criterion;
use rand::prelude::*;
use std::hint::black_box;
use std::sync::Arc;
use xspex::{CombinationRule, Dataset, ModelRegistry, Objective, Statistic};
use xspex_test_util::{gaussian_response, synthetic_spectrum};

pub fn bench_objective(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let registry = ModelRegistry::with_builtin_models();
    let model = registry
        .compose(
            &["photoelectric_absorption", "power_law"],
            CombinationRule::Multiplicative,
        )
        .unwrap();
    let space = model.parameter_space().unwrap();
    let truth = [0.5, 10.0, 1.8];

    for nchannels in [64, 512] {
        let response = gaussian_response(0.3, 10.0, nchannels, 4, 0.15, 100.0);
        let spectrum = synthetic_spectrum(&mut rng, &model, &response, &truth, 1e3);
        let dataset = Dataset::new(Arc::new(spectrum), response);
        let objective =
            Objective::new(model.clone(), &space, &[dataset], Statistic::Poisson, None).unwrap();
        c.bench_function(&format!("negative log-likelihood, {nchannels} channels"), |b| {
            b.iter(|| objective.negative_log_likelihood(black_box(&truth)));
        });
    }
}
