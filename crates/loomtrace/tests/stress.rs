use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use loomtrace::{EmbeddedTracer, HttpExportConfig, HttpTracer, SpanOptions, Tracer};
use loomtrace_store::{MemoryStorage, Storage};
use testkit::MockCollector;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_no_spans() -> Result<()> {
    let collector = MockCollector::start().await?;
    let tracer = Arc::new(HttpTracer::new(HttpExportConfig {
        batch_size: 7,
        flush_interval: Duration::from_millis(25),
        ..HttpExportConfig::new(collector.url())
    })?);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let tracer = Arc::clone(&tracer);
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                let span = tracer.start_span(&format!("w{worker}-{i}"), None, SpanOptions::new());
                tracer.end_span(span);
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for task in tasks {
        task.await?;
    }
    tracer.close().await?;

    let names: Vec<String> = collector
        .requests()
        .iter()
        .flat_map(|r| r.span_names())
        .collect();
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(names.len(), 400);
    assert_eq!(unique.len(), 400);
    Ok(())
}

#[test]
fn embedded_tracer_is_safe_across_threads() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(10_000));
    let tracer =
        Arc::new(EmbeddedTracer::with_storage(Arc::clone(&storage), Duration::ZERO).unwrap());
    tracer.set_eval_id("stress");

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let tracer = Arc::clone(&tracer);
            scope.spawn(move || {
                for i in 0..100 {
                    let root = tracer.start_span("agent.conversation", None, SpanOptions::new());
                    let child = tracer.start_span("tool.execute", Some(&root), SpanOptions::new());
                    tracer.end_span(child);
                    tracer.end_span(root);
                    if i % 25 == 0 {
                        tracer.record_metric("progress", i as f64, &HashMap::from([(
                            "worker".to_string(),
                            worker.to_string(),
                        )]));
                    }
                }
            });
        }
    });

    assert_eq!(storage.list_eval_runs("stress").unwrap().len(), 8 * 200);
    let metrics = storage.calculate_eval_metrics("stress").unwrap();
    assert_eq!(metrics.total_runs, 8 * 200);
}

#[test]
fn memory_bound_holds_under_load() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(50));
    let tracer = EmbeddedTracer::with_storage(Arc::clone(&storage), Duration::ZERO).unwrap();
    for _ in 0..500 {
        tracer.end_span(tracer.start_span("op", None, SpanOptions::new()));
    }
    assert_eq!(storage.count_runs().unwrap(), 50);
}
