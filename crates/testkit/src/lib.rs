//! Shared fixtures and a scriptable mock collector for integration tests.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use loomtrace_core::conventions::{
    ATTR_LLM_MODEL, ATTR_LLM_TOKENS_TOTAL, ATTR_QUERY, ATTR_RESPONSE, ATTR_SESSION_ID,
    ATTR_TOOL_NAME, SPAN_AGENT_CONVERSATION, SPAN_LLM_COMPLETION, SPAN_TOOL_EXECUTE,
};
use loomtrace_core::model::eval::EvalRun;
use loomtrace_core::model::judge::JudgeResult;
use loomtrace_core::tracer::{SpanOptions, Tracer};
use serde_json::Value;
use tokio::sync::oneshot;

/// Three runs one second apart: two successes and one failure.
pub fn sample_runs(eval_id: &str) -> Vec<EvalRun> {
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    [(100, true, 50), (200, true, 75), (150, false, 60)]
        .into_iter()
        .enumerate()
        .map(|(i, (exec_ms, success, tokens))| EvalRun {
            query: format!("question {i}"),
            model: "claude-sonnet".to_string(),
            response: if success { "answer".to_string() } else { String::new() },
            execution_time_ms: exec_ms,
            token_count: tokens,
            success,
            error_message: (!success).then(|| "tool timeout".to_string()),
            session_id: Some("sess-1".to_string()),
            ..EvalRun::new(
                format!("{eval_id}-run-{i}"),
                eval_id,
                base + ChronoDuration::seconds(i as i64),
            )
        })
        .collect()
}

pub fn sample_verdict(judge_id: &str) -> JudgeResult {
    let mut verdict = JudgeResult::new(judge_id, "Accuracy Judge", "PASS", 92.5);
    verdict.judge_model = "claude-sonnet".to_string();
    verdict.criteria = vec!["factual".to_string(), "complete".to_string()];
    verdict.factual_accuracy = 95;
    verdict.completeness = 90;
    verdict.reasoning = "matches the reference answer".to_string();
    verdict
}

/// Records a conversation, one LLM call and one tool call under it.
pub fn record_conversation(tracer: &dyn Tracer, session_id: &str, query: &str) {
    let root = tracer.start_span(
        SPAN_AGENT_CONVERSATION,
        None,
        SpanOptions::new()
            .attribute(ATTR_SESSION_ID, session_id)
            .attribute(ATTR_QUERY, query),
    );
    let llm = tracer.start_span(
        SPAN_LLM_COMPLETION,
        Some(&root),
        SpanOptions::new()
            .attribute(ATTR_LLM_MODEL, "claude-sonnet")
            .attribute(ATTR_LLM_TOKENS_TOTAL, 120),
    );
    tracer.end_span(llm);
    let tool = tracer.start_span(
        SPAN_TOOL_EXECUTE,
        Some(&root),
        SpanOptions::new().attribute(ATTR_TOOL_NAME, "search"),
    );
    tracer.end_span(tool);
    let mut root = root;
    root.set_attribute(ATTR_RESPONSE, "done");
    tracer.end_span(root);
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    /// Body after gzip decoding.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn span_names(&self) -> Vec<String> {
        self.field_list("spans", "name")
    }

    pub fn verdict_ids(&self) -> Vec<String> {
        self.field_list("verdicts", "judge_id")
    }

    fn field_list(&self, list: &str, field: &str) -> Vec<String> {
        self.json()[list]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item[field].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct Script {
    statuses: VecDeque<u16>,
    default_status: u16,
    delay: Duration,
}

struct Inner {
    requests: Mutex<Vec<RecordedRequest>>,
    script: Mutex<Script>,
}

pub struct MockCollectorBuilder {
    statuses: Vec<u16>,
    default_status: u16,
    delay: Duration,
}

impl MockCollectorBuilder {
    /// Statuses answered in order before falling back to the default.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn default_status(mut self, status: u16) -> Self {
        self.default_status = status;
        self
    }

    /// Sleep applied to every response after the request is recorded.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn start(self) -> anyhow::Result<MockCollector> {
        let inner = Arc::new(Inner {
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(Script {
                statuses: self.statuses.into(),
                default_status: self.default_status,
                delay: self.delay,
            }),
        });
        let app = Router::new()
            .fallback(record_request)
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, stop) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.await;
                })
                .await;
        });

        Ok(MockCollector {
            addr,
            inner,
            shutdown: Some(shutdown),
        })
    }
}

/// An HTTP server that records every request and answers with scripted
/// statuses. Shuts down when dropped.
pub struct MockCollector {
    addr: SocketAddr,
    inner: Arc<Inner>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockCollector {
    pub fn builder() -> MockCollectorBuilder {
        MockCollectorBuilder {
            statuses: Vec::new(),
            default_status: 200,
            delay: Duration::ZERO,
        }
    }

    /// A collector that answers 200 to everything.
    pub async fn start() -> anyhow::Result<Self> {
        Self::builder().start().await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.lock().unwrap().len()
    }

    /// Polls until at least `n` requests arrived. Returns false on timeout.
    pub async fn wait_for_requests(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.request_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.request_count() >= n
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn record_request(
    State(inner): State<Arc<Inner>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let gzipped = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    let body = if gzipped {
        let mut out = Vec::new();
        match flate2::read::GzDecoder::new(body.as_ref()).read_to_end(&mut out) {
            Ok(_) => out,
            Err(_) => body.to_vec(),
        }
    } else {
        body.to_vec()
    };

    let headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    inner.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        headers,
        body,
    });

    let (status, delay) = {
        let mut script = inner.script.lock().unwrap();
        let status = script.statuses.pop_front().unwrap_or(script.default_status);
        (status, script.delay)
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
