use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl EvalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvalStatus {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(TraceError::Parse(format!("unknown eval status: {s}"))),
        }
    }
}

/// A named session grouping many runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eval {
    pub id: String,
    pub name: String,
    pub suite: String,
    pub status: EvalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Eval {
    pub fn new(id: impl Into<String>, name: impl Into<String>, suite: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            suite: suite.into(),
            status: EvalStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One completed span, projected into the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRun {
    pub id: String,
    pub eval_id: String,
    pub query: String,
    pub model: String,
    /// The originating span attributes as a JSON object.
    pub configuration_json: String,
    pub response: String,
    pub execution_time_ms: i64,
    pub token_count: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EvalRun {
    pub fn new(
        id: impl Into<String>,
        eval_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            eval_id: eval_id.into(),
            query: String::new(),
            model: String::new(),
            configuration_json: "{}".to_string(),
            response: String::new(),
            execution_time_ms: 0,
            token_count: 0,
            success: true,
            error_message: None,
            session_id: None,
            timestamp,
        }
    }
}

/// Aggregate over the runs of one eval. Always recomputable from the run set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub eval_id: String,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub total_tokens: i64,
    pub avg_tokens_per_run: f64,
    pub total_cost: f64,
    pub first_run_timestamp: Option<DateTime<Utc>>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl EvalMetrics {
    pub fn empty(eval_id: impl Into<String>) -> Self {
        Self {
            eval_id: eval_id.into(),
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            success_rate: 0.0,
            avg_execution_time_ms: 0.0,
            total_tokens: 0,
            avg_tokens_per_run: 0.0,
            total_cost: 0.0,
            first_run_timestamp: None,
            last_run_timestamp: None,
            updated_at: Utc::now(),
        }
    }

    pub fn from_runs<'a, I>(eval_id: &str, runs: I) -> Self
    where
        I: IntoIterator<Item = &'a EvalRun>,
    {
        let mut metrics = Self::empty(eval_id);
        let mut total_exec_ms: i64 = 0;

        for run in runs {
            metrics.total_runs += 1;
            if run.success {
                metrics.successful_runs += 1;
            } else {
                metrics.failed_runs += 1;
            }
            total_exec_ms += run.execution_time_ms;
            metrics.total_tokens += run.token_count;
            metrics.first_run_timestamp = Some(match metrics.first_run_timestamp {
                Some(first) => first.min(run.timestamp),
                None => run.timestamp,
            });
            metrics.last_run_timestamp = Some(match metrics.last_run_timestamp {
                Some(last) => last.max(run.timestamp),
                None => run.timestamp,
            });
        }

        if metrics.total_runs > 0 {
            let n = metrics.total_runs as f64;
            metrics.success_rate = metrics.successful_runs as f64 / n;
            metrics.avg_execution_time_ms = total_exec_ms as f64 / n;
            metrics.avg_tokens_per_run = metrics.total_tokens as f64 / n;
        }
        metrics
    }
}
