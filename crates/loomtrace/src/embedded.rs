//! A tracer that records spans as eval runs in local storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use loomtrace_core::conventions::{
    ATTR_LLM_MODEL, ATTR_LLM_TOKENS_INPUT, ATTR_LLM_TOKENS_OUTPUT, ATTR_LLM_TOKENS_TOTAL,
    ATTR_QUERY, ATTR_RESPONSE, ATTR_SESSION_ID, ATTR_TOKEN_COUNT_LEGACY,
};
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::model::eval::{Eval, EvalRun, EvalStatus};
use loomtrace_core::model::span::{Attributes, Span, StatusCode};
use loomtrace_core::tracer::{SpanOptions, Tracer, build_span};
use loomtrace_store::{Storage, StorageConfig, open_storage};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);
pub const SESSION_EVAL_NAME: &str = "Loom Agent Session";
pub const SESSION_EVAL_SUITE: &str = "embedded";

#[derive(Debug, Clone)]
pub struct EmbeddedConfig {
    pub storage: StorageConfig,
    /// How often metrics for the current eval are recomputed. Zero disables
    /// the background refresh.
    pub metrics_interval: Duration,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Default)]
struct State {
    eval_id: Option<String>,
    /// Whether `eval_id` is known to exist in storage.
    eval_ready: bool,
    closed: bool,
}

struct Inner {
    storage: Arc<dyn Storage>,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| TraceError::Internal("embedded tracer state poisoned".to_string()))
    }

    fn ensure_eval(&self, state: &mut State) -> String {
        let eval_id = state
            .eval_id
            .get_or_insert_with(|| format!("loom-session-{}", Utc::now().timestamp()))
            .clone();
        if state.eval_ready {
            return eval_id;
        }

        state.eval_ready = match self.storage.get_eval(&eval_id) {
            Ok(Some(_)) => true,
            Ok(None) => {
                let eval = Eval::new(eval_id.as_str(), SESSION_EVAL_NAME, SESSION_EVAL_SUITE);
                match self.storage.create_eval(&eval) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(eval_id = %eval_id, error = %e, "failed to create eval");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(eval_id = %eval_id, error = %e, "failed to look up eval");
                false
            }
        };
        eval_id
    }

    fn store(&self, mut span: Span) {
        span.seal();
        let Ok(mut state) = self.lock() else {
            return;
        };
        if state.closed {
            debug!(span = %span.name(), "tracer closed; dropping span");
            return;
        }

        let eval_id = self.ensure_eval(&mut state);
        let run = span_to_run(&span, &eval_id);
        if let Err(e) = self.storage.create_eval_run(&run) {
            error!(span_id = %span.span_id(), error = %e, "failed to store eval run");
            return;
        }
        debug!(
            span_id = %span.span_id(),
            operation = %span.name(),
            duration_ms = run.execution_time_ms,
            "span stored"
        );
    }

    fn refresh_metrics(&self, eval_id: &str) -> Result<()> {
        let metrics = self.storage.calculate_eval_metrics(eval_id)?;
        self.storage.upsert_eval_metrics(&metrics)?;
        debug!(
            eval_id,
            success_rate = metrics.success_rate,
            total_runs = metrics.total_runs,
            "metrics flushed"
        );
        Ok(())
    }

    fn flush_metrics(&self) -> Result<()> {
        let eval_id = {
            let state = self.lock()?;
            if state.closed || !state.eval_ready {
                return Ok(());
            }
            state.eval_id.clone()
        };
        match eval_id {
            Some(eval_id) => self.refresh_metrics(&eval_id),
            None => Ok(()),
        }
    }
}

fn string_attr(attrs: &Attributes, key: &str) -> Option<String> {
    attrs.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Total tokens from the first key that carries a number: the total, the
/// legacy count, then input plus output.
fn token_count(attrs: &Attributes) -> i64 {
    let number = |key: &str| {
        attrs
            .get(key)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
    };
    number(ATTR_LLM_TOKENS_TOTAL)
        .or_else(|| number(ATTR_TOKEN_COUNT_LEGACY))
        .or_else(|| {
            match (number(ATTR_LLM_TOKENS_INPUT), number(ATTR_LLM_TOKENS_OUTPUT)) {
                (None, None) => None,
                (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
            }
        })
        .unwrap_or(0)
}

fn span_to_run(span: &Span, eval_id: &str) -> EvalRun {
    let attrs = span.attributes();
    let success = span.status().code != StatusCode::Error;
    EvalRun {
        query: string_attr(attrs, ATTR_QUERY).unwrap_or_default(),
        model: string_attr(attrs, ATTR_LLM_MODEL).unwrap_or_default(),
        configuration_json: span.attributes_json(),
        response: string_attr(attrs, ATTR_RESPONSE).unwrap_or_default(),
        execution_time_ms: span.duration_ms(),
        token_count: token_count(attrs),
        success,
        error_message: if success {
            None
        } else {
            span.status().message.clone()
        },
        session_id: string_attr(attrs, ATTR_SESSION_ID),
        ..EvalRun::new(span.span_id(), eval_id, span.start_time())
    }
}

async fn run_metrics_loop(inner: Arc<Inner>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = inner.flush_metrics() {
                    error!(error = %e, "periodic metrics flush failed");
                }
            }
            _ = &mut stop => break,
        }
    }
}

/// Stores every ended span as an [`EvalRun`] under the current eval.
///
/// The eval is created on first write unless one was chosen with
/// [`EmbeddedTracer::set_eval_id`]. Metrics and events without a target span
/// are logged, not stored. Storage failures are logged and never reach the
/// caller. After [`Tracer::close`] the tracer keeps producing
/// well-formed spans but stores nothing.
pub struct EmbeddedTracer {
    inner: Arc<Inner>,
    worker: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl EmbeddedTracer {
    /// Must be called inside a tokio runtime unless the metrics interval is
    /// zero.
    pub fn new(cfg: EmbeddedConfig) -> Result<Self> {
        let handle = if cfg.metrics_interval.is_zero() {
            None
        } else {
            Some(Handle::try_current().map_err(|_| {
                TraceError::Config(
                    "embedded tracer with a metrics interval must be created inside a tokio runtime"
                        .to_string(),
                )
            })?)
        };
        let storage = open_storage(&cfg.storage)?;
        info!(
            storage_type = %cfg.storage.storage_type,
            path = ?cfg.storage.path,
            "embedded tracer initialized"
        );
        Ok(Self::start(storage, cfg.metrics_interval, handle))
    }

    /// Wraps an already opened backend.
    pub fn with_storage(storage: Arc<dyn Storage>, metrics_interval: Duration) -> Result<Self> {
        let handle = if metrics_interval.is_zero() {
            None
        } else {
            Some(Handle::try_current().map_err(|_| {
                TraceError::Config("metrics refresh needs a tokio runtime".to_string())
            })?)
        };
        Ok(Self::start(storage, metrics_interval, handle))
    }

    fn start(storage: Arc<dyn Storage>, interval: Duration, handle: Option<Handle>) -> Self {
        let inner = Arc::new(Inner {
            storage,
            state: Mutex::new(State::default()),
        });
        let worker = handle.map(|handle| {
            let (stop_tx, stop_rx) = oneshot::channel();
            let task = handle.spawn(run_metrics_loop(Arc::clone(&inner), interval, stop_rx));
            (stop_tx, task)
        });
        Self {
            inner,
            worker: Mutex::new(worker),
        }
    }

    /// Groups subsequent runs under `eval_id`, creating the eval on the next
    /// write if it does not exist.
    pub fn set_eval_id(&self, eval_id: impl Into<String>) {
        if let Ok(mut state) = self.inner.lock() {
            state.eval_id = Some(eval_id.into());
            state.eval_ready = false;
        }
    }

    pub fn current_eval_id(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|s| s.eval_id.clone())
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.inner.storage)
    }
}

impl Tracer for EmbeddedTracer {
    fn start_span(&self, name: &str, parent: Option<&Span>, opts: SpanOptions) -> Span {
        build_span(name, parent, opts)
    }

    fn end_span(&self, span: Span) {
        self.inner.store(span);
    }

    /// Logged only. Metric samples are not eval runs and would skew the
    /// eval's aggregates.
    fn record_metric(&self, name: &str, value: f64, labels: &HashMap<String, String>) {
        debug!(metric = name, value, ?labels, "metric recorded");
    }

    fn record_event(&self, target: Option<&mut Span>, name: &str, attributes: Attributes) {
        match target {
            Some(span) => span.add_event(name, attributes),
            None => debug!(event = name, ?attributes, "event recorded"),
        }
    }

    fn flush(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.inner.flush_metrics() })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let eval_id = {
                let mut state = self.inner.lock()?;
                if state.closed {
                    return Ok(());
                }
                state.closed = true;
                state.eval_id.clone().filter(|_| state.eval_ready)
            };

            let worker = self
                .worker
                .lock()
                .map_err(|_| TraceError::Internal("worker handle poisoned".to_string()))?
                .take();
            if let Some((stop, task)) = worker {
                let _ = stop.send(());
                let _ = task.await;
            }

            if let Some(eval_id) = eval_id {
                if let Err(e) = self.inner.refresh_metrics(&eval_id) {
                    error!(eval_id = %eval_id, error = %e, "final metrics flush failed");
                }
                if let Err(e) = self
                    .inner
                    .storage
                    .update_eval_status(&eval_id, EvalStatus::Completed)
                {
                    error!(eval_id = %eval_id, error = %e, "failed to update eval status");
                }
            }

            self.inner.storage.close().inspect_err(|e| {
                error!(error = %e, "failed to close storage");
            })?;
            info!("embedded tracer closed");
            Ok(())
        })
    }
}

impl Drop for EmbeddedTracer {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock()
            && let Some((stop, _)) = worker.take()
        {
            let _ = stop.send(());
        }
    }
}
