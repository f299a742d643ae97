//! Benchmarks for foreach expansion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use stagedef::testing::MemoryFileSystem;
use stagedef::DataResolver;

fn document(members: usize, vars: usize) -> Value {
    let models: Map<String, Value> = (0..members)
        .map(|i| (format!("model{i}"), json!({"thresh": i, "name": format!("m{i}")})))
        .collect();
    let globals: Map<String, Value> = (0..vars)
        .map(|i| (format!("var{i}"), json!({"value": i})))
        .collect();

    json!({
        "vars": [{"models": models}, globals],
        "stages": {
            "train": {
                "foreach": "${models}",
                "do": {
                    "cmd": "python train.py --thresh ${item.thresh} --name ${item.name}",
                    "outs": ["${key}/model.pkl"]
                }
            }
        }
    })
}

fn foreach_benchmark(c: &mut Criterion) {
    let fs = MemoryFileSystem::new();
    let mut group = c.benchmark_group("foreach_resolve");

    for &(members, vars) in &[(10, 10), (100, 10), (100, 1000)] {
        let document = document(members, vars);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{members}x{vars}")),
            &document,
            |b, document| {
                b.iter(|| {
                    let mut resolver = DataResolver::new(&fs, "", document).unwrap();
                    black_box(resolver.resolve().unwrap())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, foreach_benchmark);
criterion_main!(benches);
