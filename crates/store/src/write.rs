use chrono::Utc;
use duckdb::params;
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::model::eval::{Eval, EvalMetrics, EvalRun, EvalStatus};

use crate::DbStorage;

impl DbStorage {
    pub(crate) fn insert_eval(&self, eval: &Eval) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO evals (id, name, suite, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    eval.id,
                    eval.name,
                    eval.suite,
                    eval.status.as_str(),
                    eval.created_at.to_rfc3339(),
                    eval.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| TraceError::Store(format!("insert eval {} failed: {e}", eval.id)))?;
            Ok(())
        })
    }

    pub(crate) fn set_eval_status(&self, id: &str, status: EvalStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE evals SET status = ?, updated_at = ? WHERE id = ?",
                    params![status.as_str(), Utc::now().to_rfc3339(), id],
                )
                .map_err(|e| TraceError::Store(format!("update eval status failed: {e}")))?;
            if changed == 0 {
                return Err(TraceError::NotFound(format!("eval {id}")));
            }
            Ok(())
        })
    }

    pub(crate) fn insert_runs(&self, runs: &[EvalRun]) -> Result<()> {
        if runs.is_empty() {
            return Ok(());
        }

        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| TraceError::Store(format!("begin tx failed: {e}")))?;

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO eval_runs
                         (id, eval_id, query, model, configuration_json, response,
                          execution_time_ms, token_count, success, error_message, session_id, ts)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .map_err(|e| TraceError::Store(format!("prepare insert runs failed: {e}")))?;

                for run in runs {
                    stmt.execute(params![
                        run.id,
                        run.eval_id,
                        run.query,
                        run.model,
                        run.configuration_json,
                        run.response,
                        run.execution_time_ms,
                        run.token_count,
                        run.success,
                        run.error_message,
                        run.session_id,
                        run.timestamp.to_rfc3339(),
                    ])
                    .map_err(|e| TraceError::Store(format!("insert run {} failed: {e}", run.id)))?;
                }
            }

            tx.commit()
                .map_err(|e| TraceError::Store(format!("commit runs failed: {e}")))
        })
    }

    pub(crate) fn replace_metrics(&self, m: &EvalMetrics) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO eval_metrics
                 (eval_id, total_runs, successful_runs, failed_runs, success_rate,
                  avg_execution_time_ms, total_tokens, avg_tokens_per_run, total_cost,
                  first_run_ts, last_run_ts, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    m.eval_id,
                    m.total_runs,
                    m.successful_runs,
                    m.failed_runs,
                    m.success_rate,
                    m.avg_execution_time_ms,
                    m.total_tokens,
                    m.avg_tokens_per_run,
                    m.total_cost,
                    m.first_run_timestamp.map(|ts| ts.to_rfc3339()),
                    m.last_run_timestamp.map(|ts| ts.to_rfc3339()),
                    m.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| TraceError::Store(format!("upsert metrics failed: {e}")))?;
            Ok(())
        })
    }
}
