use criterion::{black_box, criterion_group, criterion_main, Criterion};
use swarm_core::services::{DecisionPolicy, DecisionPolicyConfig};

const TRIVIAL_GOAL: &str = "fix the typo in the README";

const COMPLEX_GOAL: &str = "Build a new backend API service with a database migration, \
    wire up the frontend components to call it, update the infra deployment pipeline, \
    and add a data export job. This touches 6 files and 4 components, and needs careful \
    review of the security implications and the error handling throughout.";

fn bench_analyze(c: &mut Criterion) {
    let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
    let mut group = c.benchmark_group("decision_policy_analyze");
    group.bench_function("trivial_goal", |b| {
        b.iter(|| black_box(policy.analyze(black_box(TRIVIAL_GOAL))));
    });
    group.bench_function("complex_goal", |b| {
        b.iter(|| black_box(policy.analyze(black_box(COMPLEX_GOAL))));
    });
    group.finish();
}

fn bench_decide(c: &mut Criterion) {
    let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
    let analysis = policy.analyze(COMPLEX_GOAL);
    let mut group = c.benchmark_group("decision_policy_decide");
    group.bench_function("complex_goal", |b| {
        b.iter(|| black_box(policy.decide(black_box(&analysis))));
    });
    group.finish();
}

criterion_group!(benches, bench_analyze, bench_decide);
criterion_main!(benches);
