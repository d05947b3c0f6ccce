use std::collections::HashMap;

use futures::future::{self, BoxFuture};

use crate::error::Result;
use crate::model::span::{Attributes, Span};
use crate::tracer::{SpanOptions, Tracer, build_span};

/// Produces well-formed spans and discards them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl NoopTracer {
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for NoopTracer {
    fn start_span(&self, name: &str, parent: Option<&Span>, opts: SpanOptions) -> Span {
        build_span(name, parent, opts)
    }

    fn end_span(&self, mut span: Span) {
        span.seal();
    }

    fn record_metric(&self, _name: &str, _value: f64, _labels: &HashMap<String, String>) {}

    fn record_event(&self, target: Option<&mut Span>, name: &str, attributes: Attributes) {
        if let Some(span) = target {
            span.add_event(name, attributes);
        }
    }

    fn flush(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(future::ready(Ok(())))
    }
}
