//! In-process tracing for LLM agents: pick a backend with
//! [`select::select_tracer`], instrument through [`Tracer`], and optionally
//! bridge existing `tracing` spans with [`telemetry::TracerLayer`].

pub mod embedded;
pub mod select;
pub mod telemetry;

pub use embedded::{EmbeddedConfig, EmbeddedTracer};
pub use loomtrace_core::{NoopTracer, Span, SpanOptions, TraceError, Tracer};
pub use loomtrace_export::{HttpExportConfig, HttpTracer, JudgeExporter, JudgeExporterConfig};
pub use select::{AutoSelectConfig, Backend, Selection, resolve_backend, select_tracer};
