use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use loomtrace_core::config::Compression;
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::model::span::{Attributes, Span};
use loomtrace_core::tracer::{SpanOptions, Tracer, build_span, event_span, metric_span};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::delivery::{RetryPolicy, build_client, build_headers, post_json};
use crate::payload::{SpanExportPayload, WireSpan};
use crate::privacy::{PrivacyConfig, Redactor};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpExportConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
    pub privacy: PrivacyConfig,
    pub headers: Vec<(String, String)>,
    pub compression: Compression,
}

impl HttpExportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            privacy: PrivacyConfig::default(),
            headers: Vec::new(),
            compression: Compression::None,
        }
    }

    /// Zero values fall back to the defaults. `max_retries` of zero is kept.
    fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.retry_backoff.is_zero() {
            self.retry_backoff = DEFAULT_RETRY_BACKOFF;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

#[derive(Default)]
struct Buffer {
    spans: Vec<WireSpan>,
    in_flight: Vec<JoinHandle<()>>,
    closed: bool,
}

struct Shared {
    endpoint: String,
    client: Client,
    headers: HeaderMap,
    policy: RetryPolicy,
    compression: Compression,
    batch_size: usize,
    redactor: Redactor,
    buffer: Mutex<Buffer>,
}

impl Shared {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Buffer>> {
        self.buffer
            .lock()
            .map_err(|_| TraceError::Internal("export buffer poisoned".to_string()))
    }

    fn take_spans(&self) -> Result<Vec<WireSpan>> {
        Ok(std::mem::take(&mut self.lock()?.spans))
    }

    async fn send(&self, spans: Vec<WireSpan>) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let count = spans.len();
        let body = serde_json::to_vec(&SpanExportPayload { spans })
            .map_err(|e| TraceError::Export(format!("failed to encode spans: {e}")))?;
        let status = post_json(
            &self.client,
            &self.endpoint,
            &self.headers,
            body,
            self.policy,
            self.compression,
        )
        .await?;
        debug!(count, status, endpoint = %self.endpoint, "exported span batch");
        Ok(())
    }

    /// Drains the buffer and posts it.
    async fn flush_now(&self) -> Result<()> {
        let spans = self.take_spans()?;
        let count = spans.len();
        self.send(spans).await.inspect_err(|e| {
            warn!(error = %e, dropped = count, "span export failed");
        })
    }

    fn take_in_flight(&self) -> Result<Vec<JoinHandle<()>>> {
        Ok(std::mem::take(&mut self.lock()?.in_flight))
    }
}

/// A tracer that batches finished spans and posts them to a collector.
///
/// Spans are redacted when they end, buffered, and shipped when the buffer
/// reaches `batch_size`, on every `flush_interval` tick, on [`Tracer::flush`]
/// and once more on [`Tracer::close`]. Producers never wait on the network.
///
/// Call [`Tracer::close`] before dropping: drop only stops the flush loop,
/// and spans still buffered at that point are discarded with a warning.
pub struct HttpTracer {
    shared: Arc<Shared>,
    handle: Handle,
    worker: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl HttpTracer {
    /// Must be called inside a tokio runtime; the runtime is captured so that
    /// spans ended on any thread can schedule exports.
    pub fn new(cfg: HttpExportConfig) -> Result<Self> {
        if cfg.endpoint.trim().is_empty() {
            return Err(TraceError::Config(
                "http exporter requires an endpoint".to_string(),
            ));
        }
        let handle = Handle::try_current().map_err(|_| {
            TraceError::Config("http exporter must be created inside a tokio runtime".to_string())
        })?;
        let cfg = cfg.normalized();

        let shared = Arc::new(Shared {
            endpoint: cfg.endpoint.trim().to_string(),
            client: build_client(cfg.timeout, None)?,
            headers: build_headers(cfg.api_key.as_deref(), &cfg.headers),
            policy: RetryPolicy {
                max_retries: cfg.max_retries,
                backoff: cfg.retry_backoff,
            },
            compression: cfg.compression,
            batch_size: cfg.batch_size,
            redactor: Redactor::new(&cfg.privacy),
            buffer: Mutex::new(Buffer::default()),
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = handle.spawn(run_flush_loop(
            Arc::clone(&shared),
            cfg.flush_interval,
            stop_rx,
        ));

        Ok(Self {
            shared,
            handle,
            worker: Mutex::new(Some((stop_tx, worker))),
        })
    }

    /// Number of spans waiting for the next export.
    pub fn buffered(&self) -> usize {
        self.shared.lock().map(|b| b.spans.len()).unwrap_or(0)
    }

    /// Spans that would be lost if the tracer were dropped now.
    fn abandoned(&self) -> usize {
        self.shared
            .lock()
            .map(|b| if b.closed { 0 } else { b.spans.len() })
            .unwrap_or(0)
    }

    fn enqueue(&self, mut span: Span) {
        span.seal();
        self.shared.redactor.redact_span(&mut span);
        let wire = WireSpan::from(&span);

        let Ok(mut buffer) = self.shared.lock() else {
            return;
        };
        if buffer.closed {
            debug!(span = %wire.name, "tracer closed; dropping span");
            return;
        }
        buffer.spans.push(wire);
        if buffer.spans.len() < self.shared.batch_size {
            return;
        }

        let batch = std::mem::take(&mut buffer.spans);
        let shared = Arc::clone(&self.shared);
        let task = self.handle.spawn(async move {
            let count = batch.len();
            if let Err(e) = shared.send(batch).await {
                warn!(error = %e, dropped = count, "span batch export failed");
            }
        });
        buffer.in_flight.retain(|h| !h.is_finished());
        buffer.in_flight.push(task);
    }

    async fn flush_inner(shared: Arc<Shared>, handle: Handle) -> Result<()> {
        for task in shared.take_in_flight()? {
            let _ = task.await;
        }
        let job = handle.spawn({
            let shared = Arc::clone(&shared);
            async move { shared.flush_now().await }
        });
        job.await
            .map_err(|e| TraceError::Internal(format!("flush task failed: {e}")))?
    }
}

async fn run_flush_loop(shared: Arc<Shared>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = shared.flush_now().await;
            }
            _ = &mut stop => break,
        }
    }
}

impl Tracer for HttpTracer {
    fn start_span(&self, name: &str, parent: Option<&Span>, opts: SpanOptions) -> Span {
        build_span(name, parent, opts)
    }

    fn end_span(&self, span: Span) {
        self.enqueue(span);
    }

    fn record_metric(&self, name: &str, value: f64, labels: &HashMap<String, String>) {
        self.enqueue(metric_span(name, value, labels));
    }

    fn record_event(&self, target: Option<&mut Span>, name: &str, attributes: Attributes) {
        match target {
            Some(span) => span.add_event(name, attributes),
            None => self.enqueue(event_span(name, attributes)),
        }
    }

    fn flush(&self) -> BoxFuture<'_, Result<()>> {
        let shared = Arc::clone(&self.shared);
        let handle = self.handle.clone();
        Box::pin(async move {
            if shared.lock()?.closed {
                return Ok(());
            }
            Self::flush_inner(shared, handle).await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            {
                let mut buffer = self.shared.lock()?;
                if buffer.closed {
                    return Ok(());
                }
                buffer.closed = true;
            }

            let worker = self
                .worker
                .lock()
                .map_err(|_| TraceError::Internal("worker handle poisoned".to_string()))?
                .take();
            if let Some((stop, task)) = worker {
                let _ = stop.send(());
                let _ = task.await;
            }
            Self::flush_inner(Arc::clone(&self.shared), self.handle.clone()).await
        })
    }
}

impl Drop for HttpTracer {
    fn drop(&mut self) {
        let abandoned = self.abandoned();
        if abandoned > 0 {
            warn!(
                dropped = abandoned,
                endpoint = %self.shared.endpoint,
                "http tracer dropped without close; buffered spans lost"
            );
        }
        if let Ok(mut worker) = self.worker.lock()
            && let Some((stop, _)) = worker.take()
        {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use loomtrace_core::conventions::ATTR_SPAN_KIND;

    use super::*;

    #[tokio::test]
    async fn empty_endpoint_is_a_config_error() {
        let err = HttpTracer::new(HttpExportConfig::new("  ")).err().unwrap();
        assert!(matches!(err, TraceError::Config(_)));
    }

    #[test]
    fn construction_outside_runtime_fails() {
        let err = HttpTracer::new(HttpExportConfig::new("http://127.0.0.1:9"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("tokio runtime"));
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let cfg = HttpExportConfig {
            batch_size: 0,
            flush_interval: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            timeout: Duration::ZERO,
            max_retries: 0,
            ..HttpExportConfig::new("http://x")
        }
        .normalized();
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cfg.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(cfg.retry_backoff, DEFAULT_RETRY_BACKOFF);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cfg.max_retries, 0);
    }

    #[tokio::test]
    async fn spans_buffer_until_batch_size() {
        let tracer = HttpTracer::new(HttpExportConfig {
            batch_size: 10,
            flush_interval: Duration::from_secs(3600),
            ..HttpExportConfig::new("http://127.0.0.1:9")
        })
        .unwrap();
        for i in 0..3 {
            let span = tracer.start_span(&format!("op-{i}"), None, SpanOptions::new());
            tracer.end_span(span);
        }
        tracer.record_metric("latency", 3.0, &HashMap::new());
        assert_eq!(tracer.buffered(), 4);

        let mut span = tracer.start_span("with-event", None, SpanOptions::new());
        tracer.record_event(Some(&mut span), "cache_miss", Attributes::new());
        assert_eq!(span.events().len(), 1);
        assert_eq!(tracer.buffered(), 4);
        drop(span);
    }

    #[tokio::test]
    async fn unclosed_buffer_counts_as_abandoned() {
        let tracer = HttpTracer::new(HttpExportConfig {
            flush_interval: Duration::from_secs(3600),
            ..HttpExportConfig::new("http://127.0.0.1:9")
        })
        .unwrap();
        assert_eq!(tracer.abandoned(), 0);
        for i in 0..2 {
            tracer.end_span(tracer.start_span(&format!("op-{i}"), None, SpanOptions::new()));
        }
        assert_eq!(tracer.abandoned(), 2);

        tracer.shared.lock().unwrap().closed = true;
        assert_eq!(tracer.abandoned(), 0);
    }

    #[tokio::test]
    async fn standalone_event_becomes_span() {
        let tracer = HttpTracer::new(HttpExportConfig {
            flush_interval: Duration::from_secs(3600),
            ..HttpExportConfig::new("http://127.0.0.1:9")
        })
        .unwrap();
        tracer.record_event(None, "boot", Attributes::new());
        let buffer = tracer.shared.lock().unwrap();
        assert_eq!(buffer.spans[0].name, "event.boot");
        assert_eq!(buffer.spans[0].attributes[ATTR_SPAN_KIND], "event");
    }
}
