use criterion::{criterion_group, criterion_main};

mod fit;
mod objective;

criterion_group!(benches_fit, fit::bench_optimizer, fit::bench_mcmc);
criterion_group!(benches_objective, objective::bench_objective);
criterion_main!(benches_fit, benches_objective);
