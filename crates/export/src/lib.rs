//! Shipping spans and judge verdicts to a remote collector.

pub mod delivery;
pub mod http;
pub mod judge;
pub mod payload;
pub mod privacy;

pub use delivery::RetryPolicy;
pub use http::{HttpExportConfig, HttpTracer};
pub use judge::{JudgeExporter, JudgeExporterConfig};
pub use privacy::{PrivacyConfig, Redactor};
