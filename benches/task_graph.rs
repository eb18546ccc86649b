use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use swarm_core::domain::models::Task;
use swarm_core::services::TaskGraph;

fn build_chain(n: usize) -> TaskGraph {
    let mut graph = TaskGraph::new();
    let mut prev = None;
    for i in 0..n {
        let mut task = Task::new(format!("task {i}"));
        if let Some(prev_id) = prev {
            task.depends_on.insert(prev_id);
        }
        let id = graph.add_task(task).expect("unique id");
        prev = Some(id);
    }
    graph
}

fn build_fan_out(n: usize) -> TaskGraph {
    let mut graph = TaskGraph::new();
    let root = graph.add_task(Task::new("root")).expect("unique id");
    for i in 0..n {
        let mut task = Task::new(format!("leaf {i}"));
        task.depends_on.insert(root);
        graph.add_task(task).expect("unique id");
    }
    graph
}

fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for size in [10, 100, 1000] {
        let chain = build_chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &chain, |b, graph| {
            b.iter(|| black_box(graph.topological_order()));
        });

        let fan_out = build_fan_out(size);
        group.bench_with_input(BenchmarkId::new("fan_out", size), &fan_out, |b, graph| {
            b.iter(|| black_box(graph.topological_order()));
        });
    }
    group.finish();
}

fn bench_ready_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_tasks");
    for size in [10, 100, 1000] {
        let chain = build_chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &chain, |b, graph| {
            b.iter(|| black_box(graph.ready_tasks()));
        });
    }
    group.finish();
}

fn bench_execution_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_levels");
    for size in [10, 100, 1000] {
        let fan_out = build_fan_out(size);
        group.bench_with_input(BenchmarkId::new("fan_out", size), &fan_out, |b, graph| {
            b.iter(|| black_box(graph.execution_levels()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_topological_order, bench_ready_tasks, bench_execution_levels);
criterion_main!(benches);
