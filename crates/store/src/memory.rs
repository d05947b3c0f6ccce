use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::model::eval::{Eval, EvalMetrics, EvalRun, EvalStatus};
use tracing::debug;

use crate::{DEFAULT_MAX_RUNS, Storage, StorageStats, stamp_eval, validate_eval, validate_run};

/// Eviction order: timestamp first, then insertion sequence.
type RunKey = (DateTime<Utc>, u64);

#[derive(Default)]
struct State {
    evals: HashMap<String, Eval>,
    runs: HashMap<String, (RunKey, EvalRun)>,
    by_time: BTreeMap<RunKey, String>,
    metrics: HashMap<String, EvalMetrics>,
    next_seq: u64,
    closed: bool,
}

/// Bounded in-process store. Once more than `max_runs` runs are held, the
/// runs with the oldest timestamps are evicted.
pub struct MemoryStorage {
    state: RwLock<State>,
    max_runs: usize,
}

impl MemoryStorage {
    pub fn new(max_runs: usize) -> Self {
        let max_runs = if max_runs == 0 {
            DEFAULT_MAX_RUNS
        } else {
            max_runs
        };
        Self {
            state: RwLock::new(State::default()),
            max_runs,
        }
    }

    pub fn max_runs(&self) -> usize {
        self.max_runs
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        let guard = self
            .state
            .read()
            .map_err(|_| TraceError::Internal("memory storage lock poisoned".to_string()))?;
        if guard.closed {
            return Err(TraceError::Closed("memory storage"));
        }
        Ok(guard)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        let guard = self
            .state
            .write()
            .map_err(|_| TraceError::Internal("memory storage lock poisoned".to_string()))?;
        if guard.closed {
            return Err(TraceError::Closed("memory storage"));
        }
        Ok(guard)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RUNS)
    }
}

impl Storage for MemoryStorage {
    fn create_eval(&self, eval: &Eval) -> Result<()> {
        validate_eval(eval)?;
        let mut state = self.write()?;
        if state.evals.contains_key(&eval.id) {
            return Err(TraceError::Store(format!("eval {} already exists", eval.id)));
        }
        state.evals.insert(eval.id.clone(), stamp_eval(eval));
        Ok(())
    }

    fn get_eval(&self, id: &str) -> Result<Option<Eval>> {
        Ok(self.read()?.evals.get(id).cloned())
    }

    fn list_evals(&self) -> Result<Vec<Eval>> {
        let mut evals = self.read()?.evals.values().cloned().collect::<Vec<_>>();
        evals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(evals)
    }

    fn update_eval_status(&self, id: &str, status: EvalStatus) -> Result<()> {
        let mut state = self.write()?;
        let eval = state
            .evals
            .get_mut(id)
            .ok_or_else(|| TraceError::NotFound(format!("eval {id}")))?;
        eval.status = status;
        eval.updated_at = Utc::now();
        Ok(())
    }

    fn create_eval_run(&self, run: &EvalRun) -> Result<()> {
        validate_run(run)?;
        let mut state = self.write()?;
        if state.runs.contains_key(&run.id) {
            return Err(TraceError::Store(format!("eval run {} already exists", run.id)));
        }

        let key = (run.timestamp, state.next_seq);
        state.next_seq += 1;
        state.by_time.insert(key, run.id.clone());
        state.runs.insert(run.id.clone(), (key, run.clone()));

        while state.runs.len() > self.max_runs {
            let Some((_, oldest)) = state.by_time.pop_first() else {
                break;
            };
            state.runs.remove(&oldest);
            debug!(run_id = %oldest, max_runs = self.max_runs, "evicted oldest eval run");
        }
        Ok(())
    }

    fn list_eval_runs(&self, eval_id: &str) -> Result<Vec<EvalRun>> {
        let state = self.read()?;
        Ok(state
            .by_time
            .values()
            .filter_map(|id| state.runs.get(id))
            .filter(|(_, run)| run.eval_id == eval_id)
            .map(|(_, run)| run.clone())
            .collect())
    }

    fn count_runs(&self) -> Result<usize> {
        Ok(self.read()?.runs.len())
    }

    fn calculate_eval_metrics(&self, eval_id: &str) -> Result<EvalMetrics> {
        let state = self.read()?;
        let runs = state
            .runs
            .values()
            .map(|(_, run)| run)
            .filter(|run| run.eval_id == eval_id);
        Ok(EvalMetrics::from_runs(eval_id, runs))
    }

    fn upsert_eval_metrics(&self, metrics: &EvalMetrics) -> Result<()> {
        loomtrace_core::ids::validate_id("metrics eval id", &metrics.eval_id)?;
        self.write()?
            .metrics
            .insert(metrics.eval_id.clone(), metrics.clone());
        Ok(())
    }

    fn get_eval_metrics(&self, eval_id: &str) -> Result<Option<EvalMetrics>> {
        Ok(self.read()?.metrics.get(eval_id).cloned())
    }

    fn stats(&self) -> Result<StorageStats> {
        let state = self.read()?;
        Ok(StorageStats {
            evals: state.evals.len(),
            runs: state.runs.len(),
            metrics: state.metrics.len(),
        })
    }

    fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| TraceError::Internal("memory storage lock poisoned".to_string()))?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.evals.clear();
        state.runs.clear();
        state.by_time.clear();
        state.metrics.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{Duration, TimeZone};

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn run_at(id: &str, offset_secs: i64) -> EvalRun {
        EvalRun::new(id, "eval-1", base() + Duration::seconds(offset_secs))
    }

    #[test]
    fn evicts_oldest_by_timestamp_not_insertion() {
        let storage = MemoryStorage::new(10);
        // Timestamps inserted out of order: run-i has offset (i * 7) % 15.
        for i in 0..15 {
            storage
                .create_eval_run(&run_at(&format!("run-{i}"), (i * 7) % 15))
                .unwrap();
        }
        assert_eq!(storage.count_runs().unwrap(), 10);

        let runs = storage.list_eval_runs("eval-1").unwrap();
        let oldest_kept = runs.first().unwrap().timestamp;
        assert_eq!(oldest_kept, base() + Duration::seconds(5));
        // offset 0 is run-0, offset 14 is run-2.
        assert!(runs.iter().all(|r| r.id != "run-0"));
        assert!(runs.iter().any(|r| r.id == "run-2"));
    }

    #[test]
    fn eviction_ties_break_by_insertion_order() {
        let storage = MemoryStorage::new(2);
        storage.create_eval_run(&run_at("first", 0)).unwrap();
        storage.create_eval_run(&run_at("second", 0)).unwrap();
        storage.create_eval_run(&run_at("third", 0)).unwrap();
        let ids = storage
            .list_eval_runs("eval-1")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["second", "third"]);
    }

    #[test]
    fn zero_capacity_uses_default() {
        assert_eq!(MemoryStorage::new(0).max_runs(), DEFAULT_MAX_RUNS);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let storage = MemoryStorage::default();
        storage.create_eval(&Eval::new("eval-1", "name", "suite")).unwrap();
        assert!(matches!(
            storage.create_eval(&Eval::new("eval-1", "other", "suite")),
            Err(TraceError::Store(_))
        ));

        storage.create_eval_run(&run_at("run-1", 0)).unwrap();
        let mut dup = run_at("run-1", 5);
        dup.query = "changed".into();
        assert!(matches!(
            storage.create_eval_run(&dup),
            Err(TraceError::Store(_))
        ));
        let runs = storage.list_eval_runs("eval-1").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].query, "");
    }

    #[test]
    fn update_status_on_missing_eval_is_not_found() {
        let storage = MemoryStorage::default();
        assert!(matches!(
            storage.update_eval_status("missing", EvalStatus::Completed),
            Err(TraceError::NotFound(_))
        ));

        storage.create_eval(&Eval::new("eval-1", "name", "suite")).unwrap();
        storage
            .update_eval_status("eval-1", EvalStatus::Completed)
            .unwrap();
        assert_eq!(
            storage.get_eval("eval-1").unwrap().unwrap().status,
            EvalStatus::Completed
        );
    }

    #[test]
    fn metrics_cover_only_the_requested_eval() {
        let storage = MemoryStorage::default();
        let mut a = run_at("a", 0);
        a.execution_time_ms = 100;
        a.token_count = 10;
        let mut b = run_at("b", 1);
        b.eval_id = "eval-2".into();
        b.execution_time_ms = 900;
        storage.create_eval_run(&a).unwrap();
        storage.create_eval_run(&b).unwrap();

        let m = storage.calculate_eval_metrics("eval-1").unwrap();
        assert_eq!(m.total_runs, 1);
        assert_eq!(m.avg_execution_time_ms, 100.0);

        let empty = storage.calculate_eval_metrics("eval-none").unwrap();
        assert_eq!(empty.total_runs, 0);

        storage.upsert_eval_metrics(&m).unwrap();
        storage.upsert_eval_metrics(&m).unwrap();
        assert_eq!(storage.stats().unwrap().metrics, 1);
        assert_eq!(
            storage.get_eval_metrics("eval-1").unwrap().unwrap().total_runs,
            1
        );
    }

    #[test]
    fn calls_after_close_fail_and_close_is_idempotent() {
        let storage = MemoryStorage::default();
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(matches!(
            storage.create_eval_run(&run_at("run-1", 0)),
            Err(TraceError::Closed(_))
        ));
        assert!(matches!(storage.count_runs(), Err(TraceError::Closed(_))));
    }

    #[test]
    fn concurrent_writers_respect_capacity() {
        let storage = Arc::new(MemoryStorage::new(50));
        let handles = (0..4)
            .map(|t| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for i in 0..100 {
                        storage
                            .create_eval_run(&run_at(&format!("run-{t}-{i}"), i))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(storage.count_runs().unwrap(), 50);
    }
}
