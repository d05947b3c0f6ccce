//! JSON bodies posted to the collector.

use loomtrace_core::model::judge::JudgeResult;
use loomtrace_core::model::span::{Attributes, Span};
use loomtrace_core::time::rfc3339_nanos;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub timestamp: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: i64,
    pub status: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<WireEvent>,
}

impl From<&Span> for WireSpan {
    fn from(span: &Span) -> Self {
        let end = span.end_time().unwrap_or_else(|| span.start_time());
        Self {
            trace_id: span.trace_id().to_string(),
            span_id: span.span_id().to_string(),
            parent_span_id: span.parent_id().map(str::to_string),
            name: span.name().to_string(),
            start_time: rfc3339_nanos(&span.start_time()),
            end_time: rfc3339_nanos(&end),
            duration_ms: span.duration_ms(),
            status: span.status().code.as_str().to_string(),
            attributes: span.attributes().clone(),
            events: span
                .events()
                .iter()
                .map(|e| WireEvent {
                    timestamp: rfc3339_nanos(&e.timestamp),
                    name: e.name.clone(),
                    attributes: e.attributes.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanExportPayload {
    pub spans: Vec<WireSpan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerdictExportPayload {
    pub verdicts: Vec<JudgeResult>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use loomtrace_core::model::span::StatusCode;
    use serde_json::json;

    use super::*;

    #[test]
    fn root_span_omits_parent_and_events() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let mut span = Span::new("llm.completion", "t1", "s1", None).started_at(start);
        span.set_attribute("llm.model", "claude");
        span.set_status(StatusCode::Ok, None);
        span.seal_at(start + Duration::milliseconds(250));

        let value = serde_json::to_value(SpanExportPayload {
            spans: vec![WireSpan::from(&span)],
        })
        .unwrap();
        let wire = &value["spans"][0];
        assert_eq!(wire["start_time"], "2026-02-01T00:00:00.000000000Z");
        assert_eq!(wire["end_time"], "2026-02-01T00:00:00.250000000Z");
        assert_eq!(wire["duration_ms"], 250);
        assert_eq!(wire["status"], "ok");
        assert_eq!(wire["attributes"]["llm.model"], "claude");
        assert!(wire.get("parent_span_id").is_none());
        assert!(wire.get("events").is_none());
    }

    #[test]
    fn child_span_carries_parent_and_events() {
        let mut span = Span::new("tool.execute", "t1", "s2", Some("s1".into()));
        span.add_event("retry", Attributes::new());
        span.add_event("done", [("n".to_string(), json!(2))].into_iter().collect());
        span.seal();

        let wire = serde_json::to_value(WireSpan::from(&span)).unwrap();
        assert_eq!(wire["parent_span_id"], "s1");
        assert_eq!(wire["status"], "unset");
        assert!(wire["events"][0].get("attributes").is_none());
        assert_eq!(wire["events"][1]["attributes"]["n"], 2);
    }
}
