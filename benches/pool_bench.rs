//! Engine pool benchmarks
//!
//! Run with: cargo bench --bench pool_bench
//!
//! Measures the dispose-and-replace rent/return cycle and a full evaluate
//! through the coordinator (bind, run, marshal, release).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use functions_engine::host::{HostServices, HyperHttpClient, Identity, LogEmailer, UnavailableHostApi};
use functions_engine::runtime::{EnginePool, ExecutionCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Rent an engine and hand it straight back
fn bench_rent_return(c: &mut Criterion) {
    let mut group = c.benchmark_group("rent_return");

    for max_pool_size in [0, 2, 10] {
        let pool = EnginePool::new(max_pool_size).unwrap();

        group.bench_function(format!("max_idle_{}", max_pool_size), |b| {
            b.iter(|| {
                let engine = pool.rent().unwrap();
                pool.return_engine(black_box(engine));
            })
        });
    }

    group.finish();
}

/// Full execution of a small JSON-returning function
fn bench_evaluate(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let coordinator = ExecutionCoordinator::new(Arc::new(EnginePool::new(4).unwrap()));
    let host = HostServices::new(
        Arc::new(UnavailableHostApi),
        Arc::new(LogEmailer::new()),
        Arc::new(HyperHttpClient::new(Duration::from_secs(1))),
    );
    let code = "function get(q) { return new JsonResult({ id: q.id, items: [1, 2, 3] }); }";

    c.bench_function("evaluate_as_get_json", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let result = coordinator
                    .evaluate_as_get(
                        code,
                        r#"{"id":"42"}"#,
                        Duration::from_secs(5),
                        &CancellationToken::new(),
                        host.bind(&Identity::anonymous()),
                    )
                    .await
                    .unwrap();
                black_box(result)
            })
        })
    });
}

criterion_group!(benches, bench_rent_return, bench_evaluate);
criterion_main!(benches);
