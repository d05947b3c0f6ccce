use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex};

use loomtrace_core::conventions::{ATTR_ERROR, ATTR_ERROR_MESSAGE};
use loomtrace_core::model::span::{Attributes, Span, StatusCode};
use loomtrace_core::tracer::{SpanOptions, Tracer};
use tracing::field::{Field, Visit};
use tracing::span::Record;
use tracing::{Event, Id, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Targets whose spans and events are never mirrored; exporting them would
/// feed the exporter its own logs.
const INTERNAL_TARGETS: &[&str] = &[
    "loomtrace_core",
    "loomtrace_store",
    "loomtrace_export",
    "loomtrace::embedded",
    "loomtrace::select",
    "loomtrace::telemetry",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
];

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|prefix| target.starts_with(prefix))
}

pub fn init_cli_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .try_init();
}

/// Logs to stderr like [`init_cli_tracing`] and mirrors `info`-and-above
/// spans into `tracer`.
pub fn init_bridged_tracing(tracer: Arc<dyn Tracer>) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .with_filter(EnvFilter::from_default_env());

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(TracerLayer::new(tracer).with_filter(LevelFilter::INFO))
        .try_init();
}

/// A [`Layer`] that turns `tracing` spans into spans on a [`Tracer`].
///
/// Parent linkage follows the subscriber's span tree. Span fields become
/// attributes, events inside a span become span events, and an `ERROR`
/// event marks its span as failed. Events outside any span are ignored.
pub struct TracerLayer {
    tracer: Arc<dyn Tracer>,
    spans: Mutex<HashMap<u64, Span>>,
}

impl TracerLayer {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            spans: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> Layer<S> for TracerLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if is_internal(attrs.metadata().target()) {
            return;
        }
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        let parent_id = attrs
            .parent()
            .map(Id::into_u64)
            .or_else(|| ctx.lookup_current().map(|s| s.id().into_u64()));

        let Ok(mut spans) = self.spans.lock() else {
            return;
        };
        let parent = parent_id.and_then(|pid| spans.get(&pid));
        let span = self.tracer.start_span(
            attrs.metadata().name(),
            parent,
            SpanOptions::new().attributes(visitor.fields),
        );
        spans.insert(id.into_u64(), span);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        if let Ok(mut spans) = self.spans.lock()
            && let Some(span) = spans.get_mut(&id.into_u64())
        {
            span.attributes_mut().extend(visitor.fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_internal(meta.target()) {
            return;
        }
        let Some(target) = event
            .parent()
            .map(Id::into_u64)
            .or_else(|| ctx.lookup_current().map(|s| s.id().into_u64()))
        else {
            return;
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let name = visitor
            .message
            .take()
            .unwrap_or_else(|| meta.name().to_string());
        let mut attributes = visitor.fields;
        attributes.insert("level".to_string(), meta.level().as_str().into());

        let Ok(mut spans) = self.spans.lock() else {
            return;
        };
        let Some(span) = spans.get_mut(&target) else {
            return;
        };
        if *meta.level() == Level::ERROR {
            span.set_status(StatusCode::Error, Some(name.clone()));
            span.set_attribute(ATTR_ERROR, true);
            span.set_attribute(ATTR_ERROR_MESSAGE, name.clone());
        }
        span.add_event(name, attributes);
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let Some(span) = self
            .spans
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&id.into_u64()))
        else {
            return;
        };
        self.tracer.end_span(span);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Attributes,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field, rendered.into());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, value.into());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}
