use std::collections::HashMap;

use futures::future::{self, BoxFuture};

use crate::conventions::{
    ATTR_METRIC_LABEL_PREFIX, ATTR_METRIC_NAME, ATTR_METRIC_VALUE, ATTR_SPAN_KIND,
    EVENT_SPAN_PREFIX, KIND_EVENT, KIND_METRIC, METRIC_SPAN_PREFIX,
};
use crate::error::Result;
use crate::ids::{new_span_id, new_trace_id};
use crate::model::span::{AttrValue, Attributes, Span};

/// The boundary the agent runtime instruments against.
///
/// There is no ambient "current span": callers pass the parent explicitly to
/// [`Tracer::start_span`] and own the returned span until they hand it back to
/// [`Tracer::end_span`]. All implementations are safe to share across tasks.
pub trait Tracer: Send + Sync {
    /// Creates a span with fresh ids. When `parent` is given the new span joins
    /// its trace and records it as parent, overriding any parent in `opts`.
    fn start_span(&self, name: &str, parent: Option<&Span>, opts: SpanOptions) -> Span;

    /// Seals the span and hands it to the backend.
    fn end_span(&self, span: Span);

    /// Records a point-in-time metric.
    fn record_metric(&self, name: &str, value: f64, labels: &HashMap<String, String>);

    /// Attaches an event to `target`, or records a short-lived event span when
    /// there is no span to attach to.
    fn record_event(&self, target: Option<&mut Span>, name: &str, attributes: Attributes);

    /// Forces pending export or aggregation and resolves once it completed.
    fn flush(&self) -> BoxFuture<'_, Result<()>>;

    /// Stops background work and releases the backend. Idempotent.
    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

/// Identifies a parent span that is not available as a [`Span`] value, e.g.
/// one received from another component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    attributes: Attributes,
    kind: Option<String>,
    parent: Option<ParentRef>,
}

impl SpanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Builds a span the way every tracer variant does: fresh ids, options
/// applied, then linkage to `parent` if one was passed.
pub fn build_span(name: &str, parent: Option<&Span>, opts: SpanOptions) -> Span {
    let (trace_id, parent_id) = match (parent, opts.parent) {
        (Some(parent), _) => (
            parent.trace_id().to_string(),
            Some(parent.span_id().to_string()),
        ),
        (None, Some(explicit)) => (explicit.trace_id, Some(explicit.span_id)),
        (None, None) => (new_trace_id(), None),
    };

    let mut span = Span::new(name, trace_id, new_span_id(), parent_id);
    span.attributes_mut().extend(opts.attributes);
    if let Some(kind) = opts.kind {
        span.set_attribute(ATTR_SPAN_KIND, kind);
    }
    span
}

/// The span `record_metric` emits: `metric.<name>` carrying the value and labels.
pub fn metric_span(name: &str, value: f64, labels: &HashMap<String, String>) -> Span {
    let mut span = build_span(
        &format!("{METRIC_SPAN_PREFIX}{name}"),
        None,
        SpanOptions::new().kind(KIND_METRIC),
    );
    span.set_attribute(ATTR_METRIC_NAME, name);
    span.set_attribute(ATTR_METRIC_VALUE, value);
    for (k, v) in labels {
        span.set_attribute(format!("{ATTR_METRIC_LABEL_PREFIX}{k}"), v.clone());
    }
    span
}

/// The span `record_event` emits when there is no span to attach to.
pub fn event_span(name: &str, attributes: Attributes) -> Span {
    build_span(
        &format!("{EVENT_SPAN_PREFIX}{name}"),
        None,
        SpanOptions::new().kind(KIND_EVENT).attributes(attributes),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn root_span_has_no_parent() {
        let span = build_span("root", None, SpanOptions::new());
        assert!(span.is_root());
        assert!(!span.trace_id().is_empty());
        assert!(!span.span_id().is_empty());
    }

    #[test]
    fn child_inherits_trace_and_links_parent() {
        let parent = build_span("parent", None, SpanOptions::new());
        let child = build_span("child", Some(&parent), SpanOptions::new());
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_eq!(child.parent_id(), Some(parent.span_id()));
        assert_ne!(child.span_id(), parent.span_id());
    }

    #[test]
    fn explicit_parent_applies_without_handle() {
        let opts = SpanOptions::new().parent(ParentRef {
            trace_id: "t-remote".into(),
            span_id: "s-remote".into(),
        });
        let span = build_span("op", None, opts);
        assert_eq!(span.trace_id(), "t-remote");
        assert_eq!(span.parent_id(), Some("s-remote"));
    }

    #[test]
    fn parent_handle_wins_over_explicit_parent() {
        let parent = build_span("parent", None, SpanOptions::new());
        let opts = SpanOptions::new().parent(ParentRef {
            trace_id: "t-remote".into(),
            span_id: "s-remote".into(),
        });
        let span = build_span("op", Some(&parent), opts);
        assert_eq!(span.trace_id(), parent.trace_id());
        assert_eq!(span.parent_id(), Some(parent.span_id()));
    }

    #[test]
    fn options_seed_attributes_and_kind() {
        let span = build_span(
            "op",
            None,
            SpanOptions::new().attribute("tool.name", "grep").kind("tool"),
        );
        assert_eq!(span.attribute("tool.name"), Some(&json!("grep")));
        assert_eq!(span.attribute(ATTR_SPAN_KIND), Some(&json!("tool")));
    }

    #[test]
    fn metric_span_carries_value_and_labels() {
        let labels = HashMap::from([("model".to_string(), "claude".to_string())]);
        let span = metric_span("latency_ms", 12.5, &labels);
        assert_eq!(span.name(), "metric.latency_ms");
        assert_eq!(span.attribute(ATTR_METRIC_VALUE), Some(&json!(12.5)));
        assert_eq!(span.attribute("metric.label.model"), Some(&json!("claude")));
        assert_eq!(span.attribute(ATTR_SPAN_KIND), Some(&json!(KIND_METRIC)));
    }

    #[test]
    fn event_span_is_tagged() {
        let attrs = Attributes::from([("k".to_string(), json!("v"))]);
        let span = event_span("cache_miss", attrs);
        assert_eq!(span.name(), "event.cache_miss");
        assert_eq!(span.attribute("k"), Some(&json!("v")));
        assert_eq!(span.attribute(ATTR_SPAN_KIND), Some(&json!(KIND_EVENT)));
    }
}
