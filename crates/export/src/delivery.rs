//! HTTP POST with bounded exponential retry.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use loomtrace_core::config::Compression;
use loomtrace_core::error::{Result, TraceError};
use reqwest::Client;
use reqwest::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Sleep before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the failed attempt with zero-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(20))
    }
}

/// Builds the static request headers: bearer auth when an API key is set,
/// then any extra `key=value` headers. Invalid entries are logged and skipped.
pub fn build_headers(api_key: Option<&str>, extra: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
        match HeaderValue::try_from(format!("Bearer {key}")) {
            Ok(value) => {
                out.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("ignored api key that is not a valid header value"),
        }
    }
    for (k, v) in extra {
        let name = HeaderName::try_from(k.as_str());
        let value = HeaderValue::try_from(v.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => {
                warn!(header = %k, "ignored invalid export header");
            }
        }
    }
    out
}

pub fn build_client(timeout: Duration, user_agent: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(agent) = user_agent {
        builder = builder.user_agent(agent);
    }
    builder
        .build()
        .map_err(|e| TraceError::Config(format!("failed to build http client: {e}")))
}

fn maybe_compress(
    body: Vec<u8>,
    compression: Compression,
) -> std::io::Result<(Vec<u8>, Option<&'static str>)> {
    match compression {
        Compression::None => Ok((body, None)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&body)?;
            let compressed = encoder.finish()?;
            Ok((compressed, Some("gzip")))
        }
    }
}

/// POSTs a JSON body and returns the response status.
///
/// 2xx succeeds. 4xx fails immediately with [`TraceError::NonRetryable`].
/// 5xx and transport errors are retried per `policy`; once attempts run out
/// the last cause is wrapped in [`TraceError::ExportFailed`].
pub async fn post_json(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    body: Vec<u8>,
    policy: RetryPolicy,
    compression: Compression,
) -> Result<u16> {
    let (body, content_encoding) = maybe_compress(body, compression)
        .map_err(|e| TraceError::Export(format!("failed to compress payload: {e}")))?;

    let attempts = policy.attempts();
    let mut last_err = TraceError::Export("no attempt made".to_string());
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt - 1)).await;
        }

        let mut req = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .headers(headers.clone());
        if let Some(encoding) = content_encoding {
            req = req.header(CONTENT_ENCODING, encoding);
        }

        match req.body(body.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(status.as_u16());
                }
                if status.is_client_error() {
                    return Err(TraceError::NonRetryable {
                        status: status.as_u16(),
                    });
                }
                last_err = TraceError::Export(format!("collector returned status {status}"));
            }
            Err(e) => {
                last_err = TraceError::Export(format!("request failed: {e}"));
            }
        }
        debug!(
            url = %url,
            attempt = attempt + 1,
            attempts,
            error = %last_err,
            "export attempt failed"
        );
    }

    Err(TraceError::ExportFailed {
        attempts,
        source: Box::new(last_err),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;

    use super::*;

    async fn serve_status(status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/"), hits)
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(p.attempts(), 4);
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn headers_include_bearer_and_extras() {
        let headers = build_headers(
            Some("k-123"),
            &[
                ("x-tenant".to_string(), "dev".to_string()),
                ("bad header".to_string(), "v".to_string()),
            ],
        );
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer k-123");
        assert_eq!(headers.get("x-tenant").unwrap(), "dev");
        assert_eq!(headers.len(), 2);
        assert!(build_headers(Some("  "), &[]).is_empty());
    }

    #[test]
    fn gzip_round_trips() {
        use std::io::Read;

        let (body, encoding) =
            maybe_compress(b"{\"spans\":[]}".to_vec(), Compression::Gzip).unwrap();
        assert_eq!(encoding, Some("gzip"));
        let mut out = String::new();
        flate2::read::GzDecoder::new(body.as_slice())
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "{\"spans\":[]}");
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let (url, hits) = serve_status(StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = build_client(Duration::from_secs(5), None).unwrap();
        let err = post_json(
            &client,
            &url,
            &HeaderMap::new(),
            b"{}".to_vec(),
            policy(2),
            Compression::None,
        )
        .await
        .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        match err {
            TraceError::ExportFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve_status(StatusCode::BAD_REQUEST).await;
        let client = build_client(Duration::from_secs(5), None).unwrap();
        let err = post_json(
            &client,
            &url,
            &HeaderMap::new(),
            b"{}".to_vec(),
            policy(5),
            Compression::None,
        )
        .await
        .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(err, TraceError::NonRetryable { status: 400 }));
    }

    #[tokio::test]
    async fn any_2xx_is_success() {
        let (url, hits) = serve_status(StatusCode::ACCEPTED).await;
        let client = build_client(Duration::from_secs(5), None).unwrap();
        let status = post_json(
            &client,
            &url,
            &HeaderMap::new(),
            b"{}".to_vec(),
            policy(2),
            Compression::Gzip,
        )
        .await
        .unwrap();
        assert_eq!(status, 202);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = build_client(Duration::from_secs(1), None).unwrap();
        let err = post_json(
            &client,
            &format!("http://{addr}/"),
            &HeaderMap::new(),
            b"{}".to_vec(),
            policy(1),
            Compression::None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TraceError::ExportFailed { attempts: 2, .. }));
    }
}
