use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::conventions::{ATTR_ERROR, ATTR_ERROR_MESSAGE, ATTR_ERROR_TYPE, EVENT_EXCEPTION};

pub type AttrValue = serde_json::Value;
pub type Attributes = HashMap<String, AttrValue>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub attributes: Attributes,
}

/// One timed unit of work.
///
/// Identifiers and the start time are fixed when the span is created. The span
/// stays mutable until a tracer seals it in `end_span`, which stamps the end
/// time and computes the duration exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    trace_id: String,
    span_id: String,
    parent_id: Option<String>,
    name: String,
    attributes: Attributes,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    events: Vec<SpanEvent>,
    status: SpanStatus,
}

impl Span {
    pub fn new(
        name: impl Into<String>,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: parent_id.filter(|p| !p.is_empty()),
            name: name.into(),
            attributes: Attributes::new(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            events: Vec::new(),
            status: SpanStatus::default(),
        }
    }

    /// Overrides the start time; used when replaying spans recorded elsewhere.
    pub fn started_at(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = start;
        self
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration.map(|d| d.num_milliseconds()).unwrap_or(0)
    }

    pub fn is_sealed(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<SpanEvent> {
        &mut self.events
    }

    pub fn status(&self) -> &SpanStatus {
        &self.status
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Attributes) {
        self.events.push(SpanEvent {
            timestamp: Utc::now(),
            name: name.into(),
            attributes,
        });
    }

    pub fn set_status(&mut self, code: StatusCode, message: Option<String>) {
        self.status = SpanStatus { code, message };
    }

    /// Marks the span as failed and records the error's message and type.
    pub fn record_error<E>(&mut self, err: &E)
    where
        E: std::error::Error + ?Sized,
    {
        let message = err.to_string();
        let kind = std::any::type_name::<E>();
        self.set_status(StatusCode::Error, Some(message.clone()));
        self.set_attribute(ATTR_ERROR, true);
        self.set_attribute(ATTR_ERROR_MESSAGE, message.clone());
        self.set_attribute(ATTR_ERROR_TYPE, kind);

        let mut attrs = Attributes::new();
        attrs.insert(ATTR_ERROR_MESSAGE.to_string(), message.into());
        attrs.insert(ATTR_ERROR_TYPE.to_string(), kind.into());
        self.add_event(EVENT_EXCEPTION, attrs);
    }

    /// Stamps the end time now. See [`Span::seal_at`].
    pub fn seal(&mut self) {
        self.seal_at(Utc::now());
    }

    /// Stamps `end` and computes the duration. A span is sealed once; later
    /// calls leave the first end time in place. An end earlier than the start
    /// (wall clock stepped back) is clamped to the start.
    pub fn seal_at(&mut self, end: DateTime<Utc>) {
        if self.end_time.is_some() {
            return;
        }
        let end = end.max(self.start_time);
        self.end_time = Some(end);
        self.duration = Some(end - self.start_time);
    }

    pub fn attributes_json(&self) -> String {
        serde_json::to_string(&self.attributes).unwrap_or_else(|_| "{}".to_string())
    }
}
