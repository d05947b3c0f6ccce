pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS evals (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  suite TEXT NOT NULL,
  status TEXT NOT NULL,
  created_at TIMESTAMP NOT NULL,
  updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS eval_runs (
  id TEXT PRIMARY KEY,
  eval_id TEXT NOT NULL,
  query TEXT NOT NULL,
  model TEXT NOT NULL,
  configuration_json TEXT NOT NULL,
  response TEXT NOT NULL,
  execution_time_ms BIGINT NOT NULL,
  token_count BIGINT NOT NULL,
  success BOOLEAN NOT NULL,
  error_message TEXT,
  session_id TEXT,
  ts TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS eval_metrics (
  eval_id TEXT PRIMARY KEY,
  total_runs BIGINT NOT NULL,
  successful_runs BIGINT NOT NULL,
  failed_runs BIGINT NOT NULL,
  success_rate DOUBLE NOT NULL,
  avg_execution_time_ms DOUBLE NOT NULL,
  total_tokens BIGINT NOT NULL,
  avg_tokens_per_run DOUBLE NOT NULL,
  total_cost DOUBLE NOT NULL,
  first_run_ts TIMESTAMP,
  last_run_ts TIMESTAMP,
  updated_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_eval_runs_eval_ts ON eval_runs(eval_id, ts);
CREATE INDEX IF NOT EXISTS idx_eval_runs_session ON eval_runs(session_id);
"#;
