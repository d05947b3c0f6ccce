use uuid::Uuid;

use crate::error::{Result, TraceError};

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_span_id() -> String {
    Uuid::new_v4().to_string()
}

/// Rejects ids that cannot be used as storage keys.
pub fn validate_id(kind: &str, input: &str) -> Result<()> {
    if input.trim().is_empty() {
        return Err(TraceError::InvalidArgument(format!("{kind} cannot be empty")));
    }
    Ok(())
}
