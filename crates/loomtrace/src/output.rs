use std::io::IsTerminal;

use chrono::SecondsFormat;
use loomtrace::select::Selection;
use loomtrace_core::model::eval::{Eval, EvalMetrics, EvalRun, EvalStatus};
use owo_colors::OwoColorize;

fn color_enabled() -> bool {
    std::io::stdout().is_terminal()
}

fn status_label(status: EvalStatus, color: bool) -> String {
    let text = status.as_str();
    if !color {
        return text.to_string();
    }
    match status {
        EvalStatus::Running => text.yellow().to_string(),
        EvalStatus::Completed => text.green().to_string(),
        EvalStatus::Failed => text.red().to_string(),
    }
}

fn outcome_label(success: bool, color: bool) -> String {
    match (success, color) {
        (true, true) => "ok".green().to_string(),
        (false, true) => "fail".red().to_string(),
        (true, false) => "ok".to_string(),
        (false, false) => "fail".to_string(),
    }
}

pub fn print_probe_human(selection: &Selection, spans: usize) {
    let backend = selection.backend.to_string();
    let backend = if color_enabled() {
        backend.cyan().to_string()
    } else {
        backend
    };
    println!("backend={backend} reason=\"{}\"", selection.reason);
    println!("-- {spans} spans emitted --");
}

pub fn print_evals_human(evals: &[(Eval, Option<EvalMetrics>)]) {
    let color = color_enabled();
    for (eval, metrics) in evals {
        let summary = match metrics {
            Some(m) => format!(
                "runs={} success_rate={:.3} avg_ms={:.1} tokens={}",
                m.total_runs, m.success_rate, m.avg_execution_time_ms, m.total_tokens
            ),
            None => "runs=- (metrics not computed)".to_string(),
        };
        println!(
            "eval={} status={} suite={} name=\"{}\" {}",
            eval.id,
            status_label(eval.status, color),
            eval.suite,
            eval.name,
            summary
        );
    }
    println!("-- {} evals --", evals.len());
}

pub fn print_runs_human(runs: &[EvalRun], total: usize) {
    let color = color_enabled();
    for run in runs {
        let ts = run.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let model = if run.model.is_empty() { "-" } else { &run.model };
        print!(
            "{ts} run={} {} {}ms tokens={} model={model}",
            run.id,
            outcome_label(run.success, color),
            run.execution_time_ms,
            run.token_count
        );
        if let Some(err) = &run.error_message {
            print!(" error=\"{err}\"");
        }
        println!();
    }
    println!("-- {} runs ({} total) --", runs.len(), total);
}

pub fn print_metrics_human(m: &EvalMetrics) {
    println!("eval={}", m.eval_id);
    println!(
        "runs={} successful={} failed={} success_rate={:.3}",
        m.total_runs, m.successful_runs, m.failed_runs, m.success_rate
    );
    println!(
        "avg_execution_time_ms={:.1} total_tokens={} avg_tokens_per_run={:.2}",
        m.avg_execution_time_ms, m.total_tokens, m.avg_tokens_per_run
    );
    if let (Some(first), Some(last)) = (m.first_run_timestamp, m.last_run_timestamp) {
        println!(
            "first={} last={}",
            first.to_rfc3339_opts(SecondsFormat::Millis, true),
            last.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}
