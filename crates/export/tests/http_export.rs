use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use loomtrace_core::config::Compression;
use loomtrace_core::tracer::{SpanOptions, Tracer};
use loomtrace_export::{HttpExportConfig, HttpTracer, PrivacyConfig};
use testkit::{MockCollector, record_conversation};

fn quiet(endpoint: String) -> HttpExportConfig {
    HttpExportConfig {
        flush_interval: Duration::from_secs(3600),
        retry_backoff: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        ..HttpExportConfig::new(endpoint)
    }
}

#[tokio::test]
async fn spans_ship_in_batches_without_loss() -> Result<()> {
    let collector = MockCollector::start().await?;
    let tracer = HttpTracer::new(HttpExportConfig {
        batch_size: 5,
        ..quiet(collector.url_for("/v1/traces"))
    })?;

    for i in 0..12 {
        let span = tracer.start_span(&format!("op-{i}"), None, SpanOptions::new());
        tracer.end_span(span);
    }
    tracer.flush().await?;

    let requests = collector.requests();
    assert_eq!(requests.len(), 3);
    let mut sizes: Vec<usize> = requests.iter().map(|r| r.span_names().len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 5, 5]);

    let names: HashSet<String> = requests.iter().flat_map(|r| r.span_names()).collect();
    assert_eq!(names.len(), 12);
    assert!(requests.iter().all(|r| r.path == "/v1/traces"));
    Ok(())
}

#[tokio::test]
async fn credentials_and_pii_never_reach_the_wire() -> Result<()> {
    let collector = MockCollector::start().await?;
    let tracer = HttpTracer::new(HttpExportConfig {
        privacy: PrivacyConfig::strict(),
        ..quiet(collector.url())
    })?;

    let mut span = tracer.start_span("llm.completion", None, SpanOptions::new());
    span.set_attribute("api_key", "sk-live-123");
    span.set_attribute("user.email", "jane@example.com");
    span.set_attribute("llm.model", "claude-sonnet");
    tracer.end_span(span);
    tracer.flush().await?;

    let requests = collector.requests();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8(requests[0].body.clone())?;
    assert!(!body.contains("sk-live-123"));
    assert!(!body.contains("jane@example.com"));

    let attrs = &requests[0].json()["spans"][0]["attributes"];
    assert!(attrs.get("api_key").is_none());
    assert_eq!(attrs["user.email"], "[EMAIL_REDACTED]");
    assert_eq!(attrs["llm.model"], "claude-sonnet");
    Ok(())
}

#[tokio::test]
async fn close_flushes_once_and_drops_later_spans() -> Result<()> {
    let collector = MockCollector::start().await?;
    let tracer = HttpTracer::new(quiet(collector.url()))?;

    record_conversation(&tracer, "sess-1", "what is the weather");
    tracer.close().await?;
    tracer.close().await?;
    assert_eq!(collector.request_count(), 1);
    assert_eq!(collector.requests()[0].span_names().len(), 3);

    let late = tracer.start_span("late", None, SpanOptions::new());
    tracer.end_span(late);
    assert_eq!(tracer.buffered(), 0);
    tracer.flush().await?;
    assert_eq!(collector.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn transient_failure_is_retried() -> Result<()> {
    let collector = MockCollector::builder().statuses([503]).start().await?;
    let tracer = HttpTracer::new(HttpExportConfig {
        max_retries: 2,
        ..quiet(collector.url())
    })?;

    let span = tracer.start_span("op", None, SpanOptions::new());
    tracer.end_span(span);
    tracer.flush().await?;
    assert_eq!(collector.request_count(), 2);
    Ok(())
}

#[tokio::test]
async fn rejected_batch_surfaces_from_flush() -> Result<()> {
    let collector = MockCollector::builder().default_status(400).start().await?;
    let tracer = HttpTracer::new(HttpExportConfig {
        max_retries: 3,
        ..quiet(collector.url())
    })?;

    let span = tracer.start_span("op", None, SpanOptions::new());
    tracer.end_span(span);
    assert!(tracer.flush().await.is_err());
    assert_eq!(collector.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn gzip_and_custom_headers_are_sent() -> Result<()> {
    let collector = MockCollector::start().await?;
    let tracer = HttpTracer::new(HttpExportConfig {
        api_key: Some("k-42".to_string()),
        headers: vec![("x-tenant".to_string(), "dev".to_string())],
        compression: Compression::Gzip,
        ..quiet(collector.url())
    })?;

    let span = tracer.start_span("op", None, SpanOptions::new());
    tracer.end_span(span);
    tracer.flush().await?;

    let request = &collector.requests()[0];
    assert_eq!(request.header("content-encoding"), Some("gzip"));
    assert_eq!(request.header("authorization"), Some("Bearer k-42"));
    assert_eq!(request.header("x-tenant"), Some("dev"));
    assert_eq!(request.span_names(), vec!["op".to_string()]);
    Ok(())
}

#[tokio::test]
async fn periodic_flush_ships_partial_batches() -> Result<()> {
    let collector = MockCollector::start().await?;
    let tracer = HttpTracer::new(HttpExportConfig {
        flush_interval: Duration::from_millis(50),
        ..quiet(collector.url())
    })?;

    let span = tracer.start_span("op", None, SpanOptions::new());
    tracer.end_span(span);
    assert!(collector.wait_for_requests(1, Duration::from_secs(5)).await);
    tracer.close().await?;
    Ok(())
}
