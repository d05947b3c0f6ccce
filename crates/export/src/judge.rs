use std::env;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use loomtrace_core::conventions::{ATTR_HTTP_STATUS_CODE, SPAN_JUDGE_VERDICT_EXPORT};
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::model::judge::JudgeResult;
use loomtrace_core::noop::NoopTracer;
use loomtrace_core::tracer::{SpanOptions, Tracer};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::delivery::{RetryPolicy, build_client, build_headers, post_json};
use crate::payload::VerdictExportPayload;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";
pub const USER_AGENT: &str = "loom-judge-exporter/1.0";
const VERDICTS_PATH: &str = "/v1/judge-verdicts";

#[derive(Clone)]
pub struct JudgeExporterConfig {
    /// Empty means `$HAWK_ENDPOINT`, then [`DEFAULT_ENDPOINT`].
    pub endpoint: String,
    /// `None` means `$HAWK_API_KEY`.
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub buffer_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Receives one span per exported batch. Defaults to a no-op tracer.
    pub tracer: Option<Arc<dyn Tracer>>,
}

impl Default for JudgeExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            buffer_size: 100,
            timeout: Duration::from_secs(10),
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            tracer: None,
        }
    }
}

impl JudgeExporterConfig {
    fn resolved(mut self) -> Self {
        let defaults = Self::default();
        if self.endpoint.trim().is_empty() {
            self.endpoint = env::var("HAWK_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        }
        if self.api_key.is_none() {
            self.api_key = env::var("HAWK_API_KEY").ok().filter(|v| !v.is_empty());
        }
        if self.batch_size == 0 {
            self.batch_size = defaults.batch_size;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = defaults.flush_interval;
        }
        if self.buffer_size == 0 {
            self.buffer_size = defaults.buffer_size;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.retry_backoff.is_zero() {
            self.retry_backoff = defaults.retry_backoff;
        }
        self
    }
}

struct Exporter {
    endpoint: String,
    url: String,
    client: Client,
    headers: HeaderMap,
    policy: RetryPolicy,
    batch_size: usize,
    flush_interval: Duration,
    tracer: Arc<dyn Tracer>,
}

impl Exporter {
    async fn export_batch(&self, verdicts: Vec<JudgeResult>) -> Result<()> {
        let count = verdicts.len();
        let mut span = self.tracer.start_span(
            SPAN_JUDGE_VERDICT_EXPORT,
            None,
            SpanOptions::new()
                .attribute("hawk.verdict_count", count)
                .attribute("hawk.endpoint", self.endpoint.as_str()),
        );

        let result = match serde_json::to_vec(&VerdictExportPayload { verdicts }) {
            Ok(body) => {
                post_json(
                    &self.client,
                    &self.url,
                    &self.headers,
                    body,
                    self.policy,
                    Default::default(),
                )
                .await
            }
            Err(e) => Err(TraceError::Export(format!("failed to encode verdicts: {e}"))),
        };

        match &result {
            Ok(status) => {
                span.set_attribute(ATTR_HTTP_STATUS_CODE, *status);
                info!(count, status, endpoint = %self.url, "exported judge verdicts");
            }
            Err(e) => {
                if let TraceError::NonRetryable { status } = e {
                    span.set_attribute(ATTR_HTTP_STATUS_CODE, *status);
                }
                span.record_error(e);
            }
        }
        self.tracer.end_span(span);
        result.map(|_| ())
    }

    async fn flush(&self, batch: &mut Vec<JudgeResult>) {
        if batch.is_empty() {
            return;
        }
        let verdicts = std::mem::take(batch);
        let count = verdicts.len();
        if let Err(e) = self.export_batch(verdicts).await {
            warn!(error = %e, batch_size = count, "failed to flush judge verdicts");
        }
    }
}

async fn run_worker(exporter: Arc<Exporter>, mut rx: mpsc::Receiver<JudgeResult>) {
    let interval = exporter.flush_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(exporter.batch_size);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(verdict) => {
                    batch.push(verdict);
                    if batch.len() >= exporter.batch_size {
                        exporter.flush(&mut batch).await;
                    }
                }
                None => {
                    // Sender dropped by stop(); everything queued has been received.
                    exporter.flush(&mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => exporter.flush(&mut batch).await,
        }
    }
    debug!("judge exporter worker exited");
}

#[derive(Default)]
struct State {
    tx: Option<mpsc::Sender<JudgeResult>>,
    rx: Option<mpsc::Receiver<JudgeResult>>,
    worker: Option<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

/// Ships judge verdicts to the collector in batches.
///
/// [`JudgeExporter::export_judge_result`] never blocks: when the queue is full
/// the verdict is dropped and [`TraceError::BufferFull`] is returned.
pub struct JudgeExporter {
    exporter: Arc<Exporter>,
    state: Mutex<State>,
}

impl JudgeExporter {
    pub fn new(cfg: JudgeExporterConfig) -> Result<Self> {
        let cfg = cfg.resolved();
        let endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        let (tx, rx) = mpsc::channel(cfg.buffer_size);

        let exporter = Exporter {
            url: format!("{endpoint}{VERDICTS_PATH}"),
            endpoint,
            client: build_client(cfg.timeout, Some(USER_AGENT))?,
            headers: build_headers(cfg.api_key.as_deref(), &[]),
            policy: RetryPolicy {
                max_retries: cfg.max_retries,
                backoff: cfg.retry_backoff,
            },
            batch_size: cfg.batch_size,
            flush_interval: cfg.flush_interval,
            tracer: cfg.tracer.unwrap_or_else(|| Arc::new(NoopTracer::new())),
        };

        Ok(Self {
            exporter: Arc::new(exporter),
            state: Mutex::new(State {
                tx: Some(tx),
                rx: Some(rx),
                ..State::default()
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.exporter.endpoint
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| TraceError::Internal("judge exporter state poisoned".to_string()))
    }

    /// Spawns the background worker on the current tokio runtime. Calling it
    /// again is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.stopped {
            return Err(TraceError::Stopped);
        }
        if state.started {
            return Ok(());
        }
        let handle = Handle::try_current().map_err(|_| {
            TraceError::Config("judge exporter must be started inside a tokio runtime".to_string())
        })?;
        let Some(rx) = state.rx.take() else {
            return Ok(());
        };
        state.worker = Some(handle.spawn(run_worker(Arc::clone(&self.exporter), rx)));
        state.started = true;
        Ok(())
    }

    pub fn export_judge_result(&self, result: JudgeResult) -> Result<()> {
        let state = self.lock()?;
        let Some(tx) = state.tx.as_ref().filter(|_| !state.stopped) else {
            return Err(TraceError::Stopped);
        };
        match tx.try_send(result) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(result)) => {
                warn!(judge_id = %result.judge_id, "judge verdict buffer full, dropping verdict");
                Err(TraceError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(TraceError::Stopped),
        }
    }

    /// Stops accepting verdicts, flushes what is queued and waits up to
    /// `timeout` for the worker to finish. Idempotent.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let worker = {
            let mut state = self.lock()?;
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
            state.tx = None;
            state.rx = None;
            state.worker.take()
        };

        let Some(worker) = worker else {
            return Ok(());
        };
        info!("stopping judge exporter, flushing remaining verdicts");
        match tokio::time::timeout(timeout, worker).await {
            Ok(_) => {
                info!("judge exporter stopped");
                Ok(())
            }
            Err(_) => {
                warn!("judge exporter stop timed out");
                Err(TraceError::Timeout(format!(
                    "judge exporter did not stop within {timeout:?}"
                )))
            }
        }
    }
}
