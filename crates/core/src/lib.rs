pub mod config;
pub mod conventions;
pub mod error;
pub mod ids;
pub mod model;
pub mod noop;
pub mod time;
pub mod tracer;

pub use error::{Result, TraceError};
pub use model::span::{AttrValue, Attributes, Span, SpanEvent, SpanStatus, StatusCode};
pub use noop::NoopTracer;
pub use tracer::{ParentRef, SpanOptions, Tracer};
pub use config::{Compression, StorageType, TracerMode, TracerSettings};
