mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use loomtrace::select::select_from_env;
use loomtrace::telemetry::{init_bridged_tracing, init_cli_tracing};
use loomtrace_core::model::eval::Eval;
use loomtrace_store::{DbStorage, Storage};
use serde_json::json;
use tracing::{info, info_span};

use crate::output::{print_evals_human, print_metrics_human, print_probe_human, print_runs_human};

#[derive(Parser, Debug)]
#[command(name = "loomtrace")]
#[command(about = "Inspect and probe loom agent tracing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Select a tracer from the environment and emit sample spans")]
    Probe {
        #[arg(long, default_value_t = 3, help = "Conversations to emit")]
        spans: usize,
    },
    #[command(about = "List evals in a persisted store")]
    Evals {
        #[arg(long)]
        db: PathBuf,
    },
    #[command(about = "List runs of one eval, newest last")]
    Runs {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        eval: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Show aggregate metrics of one eval")]
    Metrics {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        eval: String,
        #[arg(long, help = "Recompute from runs and store the result")]
        recompute: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe { spans } => run_probe(spans, cli.json).await,
        Commands::Evals { db } => {
            init_cli_tracing();
            let store = open_db(&db)?;
            let evals = store
                .list_evals()?
                .into_iter()
                .map(|eval| {
                    let metrics = store.get_eval_metrics(&eval.id)?;
                    Ok((eval, metrics))
                })
                .collect::<loomtrace_core::Result<Vec<(Eval, _)>>>()?;
            if cli.json {
                let rows: Vec<_> = evals
                    .iter()
                    .map(|(eval, metrics)| json!({ "eval": eval, "metrics": metrics }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_evals_human(&evals);
            }
            Ok(())
        }
        Commands::Runs { db, eval, limit } => {
            init_cli_tracing();
            let store = open_db(&db)?;
            let runs = store
                .list_eval_runs(&eval)
                .with_context(|| format!("failed to list runs of {eval}"))?;
            let shown = latest(&runs, limit);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(shown)?);
            } else {
                print_runs_human(shown, runs.len());
            }
            Ok(())
        }
        Commands::Metrics {
            db,
            eval,
            recompute,
        } => {
            init_cli_tracing();
            let store = open_db(&db)?;
            let metrics = if recompute {
                let metrics = store.calculate_eval_metrics(&eval)?;
                store.upsert_eval_metrics(&metrics)?;
                metrics
            } else {
                store
                    .get_eval_metrics(&eval)?
                    .with_context(|| format!("no metrics stored for {eval}; pass --recompute"))?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                print_metrics_human(&metrics);
            }
            store.close()?;
            Ok(())
        }
    }
}

async fn run_probe(conversations: usize, json: bool) -> anyhow::Result<()> {
    let (tracer, selection) = select_from_env().context("failed to select a tracer")?;
    init_bridged_tracing(Arc::clone(&tracer));

    for i in 0..conversations {
        let root = info_span!(
            "agent.conversation",
            session.id = "probe",
            query = %format!("probe question {i}"),
            response = tracing::field::Empty
        );
        let _root = root.enter();
        {
            let llm = info_span!(
                "llm.completion",
                llm.model = "probe-model",
                llm.tokens.total = 42_u64
            );
            let _llm = llm.enter();
            info!(turn = i, "completion finished");
        }
        root.record("response", "probe answer");
    }

    tracer.flush().await.context("flush failed")?;
    tracer.close().await.context("close failed")?;

    let emitted = conversations * 2;
    if json {
        let out = json!({
            "backend": selection.backend.to_string(),
            "reason": selection.reason,
            "spans": emitted,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_probe_human(&selection, emitted);
    }
    Ok(())
}

fn open_db(path: &Path) -> anyhow::Result<DbStorage> {
    anyhow::ensure!(path.exists(), "database {} does not exist", path.display());
    DbStorage::open(path).with_context(|| format!("failed to open {}", path.display()))
}

fn latest<T>(items: &[T], limit: usize) -> &[T] {
    &items[items.len().saturating_sub(limit)..]
}
