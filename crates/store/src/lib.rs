//! Storage backends for eval runs and their derived metrics.
//!
//! Both backends implement [`Storage`] with identical semantics: ids are
//! validated, duplicate ids are rejected rather than overwritten, and every
//! call after [`Storage::close`] fails with [`TraceError::Closed`].

pub mod db;
pub mod memory;
pub mod query;
pub mod schema;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::ids::validate_id;
use loomtrace_core::model::eval::{Eval, EvalMetrics, EvalRun, EvalStatus};

pub use db::DbStorage;
pub use loomtrace_core::config::StorageType;
pub use memory::MemoryStorage;

pub const DEFAULT_MAX_RUNS: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub evals: usize,
    pub runs: usize,
    pub metrics: usize,
}

pub trait Storage: Send + Sync {
    fn create_eval(&self, eval: &Eval) -> Result<()>;
    fn get_eval(&self, id: &str) -> Result<Option<Eval>>;
    fn list_evals(&self) -> Result<Vec<Eval>>;
    fn update_eval_status(&self, id: &str, status: EvalStatus) -> Result<()>;

    fn create_eval_run(&self, run: &EvalRun) -> Result<()>;
    /// Runs of one eval ordered by timestamp, oldest first.
    fn list_eval_runs(&self, eval_id: &str) -> Result<Vec<EvalRun>>;
    fn count_runs(&self) -> Result<usize>;

    /// Recomputes the aggregate from the current run set. An eval without
    /// runs yields zeroed metrics.
    fn calculate_eval_metrics(&self, eval_id: &str) -> Result<EvalMetrics>;
    fn upsert_eval_metrics(&self, metrics: &EvalMetrics) -> Result<()>;
    fn get_eval_metrics(&self, eval_id: &str) -> Result<Option<EvalMetrics>>;

    fn stats(&self) -> Result<StorageStats>;
    /// Releases the backend. Idempotent.
    fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    pub path: Option<PathBuf>,
    pub max_runs: usize,
}

impl StorageConfig {
    pub fn memory(max_runs: usize) -> Self {
        Self {
            storage_type: StorageType::Memory,
            path: None,
            max_runs,
        }
    }

    pub fn persisted(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            path: Some(path.into()),
            max_runs: DEFAULT_MAX_RUNS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::memory(DEFAULT_MAX_RUNS)
    }
}

pub fn open_storage(cfg: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match cfg.storage_type {
        StorageType::Memory => Ok(Arc::new(MemoryStorage::new(cfg.max_runs))),
        StorageType::Sqlite => {
            let path = cfg
                .path
                .as_ref()
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| {
                    TraceError::Config("persisted storage requires a database path".to_string())
                })?;
            Ok(Arc::new(DbStorage::open(path)?))
        }
    }
}

pub(crate) fn validate_eval(eval: &Eval) -> Result<()> {
    validate_id("eval id", &eval.id)?;
    if eval.name.trim().is_empty() {
        return Err(TraceError::InvalidArgument(
            "eval name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_run(run: &EvalRun) -> Result<()> {
    validate_id("run id", &run.id)?;
    validate_id("run eval id", &run.eval_id)
}

/// Fills creation timestamps the caller left unset.
pub(crate) fn stamp_eval(eval: &Eval) -> Eval {
    let mut eval = eval.clone();
    let now = Utc::now();
    if eval.created_at == DateTime::<Utc>::UNIX_EPOCH {
        eval.created_at = now;
    }
    if eval.updated_at == DateTime::<Utc>::UNIX_EPOCH {
        eval.updated_at = eval.created_at;
    }
    eval
}
