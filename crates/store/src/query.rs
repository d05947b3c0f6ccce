use chrono::{NaiveDateTime, Utc};
use duckdb::{Row, params};
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::model::eval::{Eval, EvalMetrics, EvalRun, EvalStatus};

use crate::db::{naive_to_utc, scalar_usize};
use crate::{
    DbStorage, Storage, StorageStats, stamp_eval, validate_eval, validate_run,
};

const EVAL_COLUMNS: &str = "id, name, suite, status, created_at, updated_at";
const RUN_COLUMNS: &str = "id, eval_id, query, model, configuration_json, response, \
     execution_time_ms, token_count, success, error_message, session_id, ts";
const METRIC_COLUMNS: &str = "eval_id, total_runs, successful_runs, failed_runs, success_rate, \
     avg_execution_time_ms, total_tokens, avg_tokens_per_run, total_cost, \
     first_run_ts, last_run_ts, updated_at";

impl DbStorage {
    pub(crate) fn fetch_eval(&self, id: &str) -> Result<Option<Eval>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {EVAL_COLUMNS} FROM evals WHERE id = ?");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| TraceError::Store(format!("prepare eval query failed: {e}")))?;
            let mut rows = stmt
                .query_map(params![id], read_eval_row)
                .map_err(|e| TraceError::Store(format!("query eval failed: {e}")))?;
            match rows.next() {
                Some(row) => row
                    .map_err(|e| TraceError::Store(format!("read eval row failed: {e}")))
                    .and_then(|(eval, status)| finish_eval(eval, &status))
                    .map(Some),
                None => Ok(None),
            }
        })
    }

    pub(crate) fn fetch_evals(&self) -> Result<Vec<Eval>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {EVAL_COLUMNS} FROM evals ORDER BY created_at, id");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| TraceError::Store(format!("prepare evals query failed: {e}")))?;
            let rows = stmt
                .query_map([], read_eval_row)
                .map_err(|e| TraceError::Store(format!("query evals failed: {e}")))?;
            rows.map(|row| {
                row.map_err(|e| TraceError::Store(format!("read eval row failed: {e}")))
                    .and_then(|(eval, status)| finish_eval(eval, &status))
            })
            .collect()
        })
    }

    pub(crate) fn fetch_runs(&self, eval_id: &str) -> Result<Vec<EvalRun>> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {RUN_COLUMNS} FROM eval_runs WHERE eval_id = ? ORDER BY ts, id");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| TraceError::Store(format!("prepare runs query failed: {e}")))?;
            let rows = stmt
                .query_map(params![eval_id], |row| {
                    Ok(EvalRun {
                        id: row.get(0)?,
                        eval_id: row.get(1)?,
                        query: row.get(2)?,
                        model: row.get(3)?,
                        configuration_json: row.get(4)?,
                        response: row.get(5)?,
                        execution_time_ms: row.get(6)?,
                        token_count: row.get(7)?,
                        success: row.get(8)?,
                        error_message: row.get(9)?,
                        session_id: row.get(10)?,
                        timestamp: naive_to_utc(row.get::<_, NaiveDateTime>(11)?),
                    })
                })
                .map_err(|e| TraceError::Store(format!("query runs failed: {e}")))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| TraceError::Store(format!("read run row failed: {e}")))
        })
    }

    /// Same aggregate as [`EvalMetrics::from_runs`], computed in SQL.
    pub(crate) fn aggregate_metrics(&self, eval_id: &str) -> Result<EvalMetrics> {
        self.with_conn(|conn| {
            let (total, successful, exec_ms, tokens, first, last) = conn
                .query_row(
                    "SELECT
                       COUNT(*)::BIGINT,
                       (COUNT(*) FILTER (WHERE success))::BIGINT,
                       COALESCE(SUM(execution_time_ms), 0)::BIGINT,
                       COALESCE(SUM(token_count), 0)::BIGINT,
                       MIN(ts),
                       MAX(ts)
                     FROM eval_runs WHERE eval_id = ?",
                    params![eval_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Option<NaiveDateTime>>(4)?,
                            row.get::<_, Option<NaiveDateTime>>(5)?,
                        ))
                    },
                )
                .map_err(|e| TraceError::Store(format!("metrics query failed: {e}")))?;

            let mut m = EvalMetrics::empty(eval_id);
            m.total_runs = total;
            m.successful_runs = successful;
            m.failed_runs = total - successful;
            m.total_tokens = tokens;
            m.first_run_timestamp = first.map(naive_to_utc);
            m.last_run_timestamp = last.map(naive_to_utc);
            if total > 0 {
                let n = total as f64;
                m.success_rate = successful as f64 / n;
                m.avg_execution_time_ms = exec_ms as f64 / n;
                m.avg_tokens_per_run = tokens as f64 / n;
            }
            m.updated_at = Utc::now();
            Ok(m)
        })
    }

    pub(crate) fn fetch_metrics(&self, eval_id: &str) -> Result<Option<EvalMetrics>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {METRIC_COLUMNS} FROM eval_metrics WHERE eval_id = ?");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| TraceError::Store(format!("prepare metrics query failed: {e}")))?;
            let mut rows = stmt
                .query_map(params![eval_id], |row| {
                    Ok(EvalMetrics {
                        eval_id: row.get(0)?,
                        total_runs: row.get(1)?,
                        successful_runs: row.get(2)?,
                        failed_runs: row.get(3)?,
                        success_rate: row.get(4)?,
                        avg_execution_time_ms: row.get(5)?,
                        total_tokens: row.get(6)?,
                        avg_tokens_per_run: row.get(7)?,
                        total_cost: row.get(8)?,
                        first_run_timestamp: row
                            .get::<_, Option<NaiveDateTime>>(9)?
                            .map(naive_to_utc),
                        last_run_timestamp: row
                            .get::<_, Option<NaiveDateTime>>(10)?
                            .map(naive_to_utc),
                        updated_at: naive_to_utc(row.get::<_, NaiveDateTime>(11)?),
                    })
                })
                .map_err(|e| TraceError::Store(format!("query metrics failed: {e}")))?;
            rows.next()
                .transpose()
                .map_err(|e| TraceError::Store(format!("read metrics row failed: {e}")))
        })
    }

    pub(crate) fn counts(&self) -> Result<StorageStats> {
        self.with_conn(|conn| {
            Ok(StorageStats {
                evals: scalar_usize(conn, "SELECT COUNT(*) FROM evals")?,
                runs: scalar_usize(conn, "SELECT COUNT(*) FROM eval_runs")?,
                metrics: scalar_usize(conn, "SELECT COUNT(*) FROM eval_metrics")?,
            })
        })
    }
}

fn read_eval_row(row: &Row<'_>) -> duckdb::Result<(Eval, String)> {
    Ok((
        Eval {
            id: row.get(0)?,
            name: row.get(1)?,
            suite: row.get(2)?,
            status: EvalStatus::Running,
            created_at: naive_to_utc(row.get::<_, NaiveDateTime>(4)?),
            updated_at: naive_to_utc(row.get::<_, NaiveDateTime>(5)?),
        },
        row.get(3)?,
    ))
}

fn finish_eval(mut eval: Eval, status: &str) -> Result<Eval> {
    eval.status = status.parse()?;
    Ok(eval)
}

impl Storage for DbStorage {
    fn create_eval(&self, eval: &Eval) -> Result<()> {
        validate_eval(eval)?;
        self.insert_eval(&stamp_eval(eval))
    }

    fn get_eval(&self, id: &str) -> Result<Option<Eval>> {
        self.fetch_eval(id)
    }

    fn list_evals(&self) -> Result<Vec<Eval>> {
        self.fetch_evals()
    }

    fn update_eval_status(&self, id: &str, status: EvalStatus) -> Result<()> {
        self.set_eval_status(id, status)
    }

    fn create_eval_run(&self, run: &EvalRun) -> Result<()> {
        validate_run(run)?;
        self.insert_runs(std::slice::from_ref(run))
    }

    fn list_eval_runs(&self, eval_id: &str) -> Result<Vec<EvalRun>> {
        self.fetch_runs(eval_id)
    }

    fn count_runs(&self) -> Result<usize> {
        self.with_conn(|conn| scalar_usize(conn, "SELECT COUNT(*) FROM eval_runs"))
    }

    fn calculate_eval_metrics(&self, eval_id: &str) -> Result<EvalMetrics> {
        self.aggregate_metrics(eval_id)
    }

    fn upsert_eval_metrics(&self, metrics: &EvalMetrics) -> Result<()> {
        loomtrace_core::ids::validate_id("metrics eval id", &metrics.eval_id)?;
        self.replace_metrics(metrics)
    }

    fn get_eval_metrics(&self, eval_id: &str) -> Result<Option<EvalMetrics>> {
        self.fetch_metrics(eval_id)
    }

    fn stats(&self) -> Result<StorageStats> {
        self.counts()
    }

    fn close(&self) -> Result<()> {
        self.close_conn()
    }
}
