//! cp command - Copy objects between local paths and object storage
//!
//! Plans the whole transfer first, so unsupported combinations fail before
//! any data moves, then runs the plan with bounded concurrency.

use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use xfer_core::{
    CancellationToken, IfExists, PlanOptions, TaskReport, TransferExecutor, TransferPlan,
    TransferPlanner, TransferReport, TransferRoute, parse_locator,
};

use crate::commands::AppContext;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, TransferProgress};

/// Copy an object or a prefix to another location
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source locator (s3://bucket/key, s3://bucket/prefix/, file:///path or a local path)
    pub source: String,

    /// Destination locator; end with '/' to copy into a prefix
    pub destination: String,

    /// Number of objects transferred at once [default: config, else 4]
    #[arg(short = 'P', long)]
    pub parallel: Option<usize>,

    /// What to do when a destination object exists: overwrite, skip or error
    #[arg(long, value_name = "MODE")]
    pub if_exists: Option<IfExists>,

    /// Only copy objects whose key below the source prefix matches this glob
    #[arg(long, value_name = "GLOB")]
    pub include: Option<String>,

    /// Show the plan without transferring anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct PlanOutput<'a> {
    dry_run: bool,
    #[serde(flatten)]
    plan: &'a TransferPlan,
}

#[derive(Debug, Serialize)]
struct CpOutput<'a> {
    source: String,
    destination: String,
    tasks: usize,
    succeeded: usize,
    skipped: usize,
    failed: usize,
    cancelled: usize,
    bytes: u64,
    interrupted: bool,
    entries: &'a [TaskReport],
}

impl<'a> CpOutput<'a> {
    fn new(plan: &TransferPlan, report: &'a TransferReport) -> Self {
        Self {
            source: plan.source().to_string(),
            destination: plan.destination().to_string(),
            tasks: report.len(),
            succeeded: report.succeeded(),
            skipped: report.skipped(),
            failed: report.failed(),
            cancelled: report.cancelled_tasks(),
            bytes: report.total_bytes(),
            interrupted: report.was_cancelled(),
            entries: report.entries(),
        }
    }
}

/// Execute the cp command
pub async fn execute(args: CpArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let source = match parse_locator(&args.source) {
        Ok(l) => l,
        Err(e) => {
            formatter.error(&format!("Invalid source: {e}"));
            return ExitCode::UsageError;
        }
    };
    let destination = match parse_locator(&args.destination) {
        Ok(l) => l,
        Err(e) => {
            formatter.error(&format!("Invalid destination: {e}"));
            return ExitCode::UsageError;
        }
    };

    let ctx = match AppContext::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::UsageError;
        }
    };
    let settings = &ctx.config().transfer;

    let mut options = PlanOptions::new(args.if_exists.unwrap_or(settings.if_exists));
    if let Some(pattern) = &args.include {
        options = match options.with_include(pattern) {
            Ok(o) => o,
            Err(e) => {
                formatter.error(&e.to_string());
                return ExitCode::UsageError;
            }
        };
    }

    let src = match ctx.connect(source).await {
        Ok(ep) => ep,
        Err(e) => {
            formatter.error(&format!("Source: {e}"));
            return ExitCode::from(&e);
        }
    };
    let dst = match ctx.connect(destination).await {
        Ok(ep) => ep,
        Err(e) => {
            formatter.error(&format!("Destination: {e}"));
            return ExitCode::from(&e);
        }
    };

    let planner = TransferPlanner::default().with_retry(settings.retry.clone());
    let plan = match planner.plan(&src, &dst, &options).await {
        Ok(plan) => plan,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    if args.dry_run {
        print_plan(&formatter, &plan);
        return ExitCode::Success;
    }

    let concurrency = args.parallel.unwrap_or(settings.concurrency);
    let progress = TransferProgress::new(plan.len(), formatter.show_progress());
    let on_task = progress.clone();

    let token = CancellationToken::new();
    let executor = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .with_config(settings.executor_config())
        .with_cancellation(token.clone())
        .with_progress(Arc::new(move |report: &TaskReport| on_task.task_done(report)));

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transfer");
            token.cancel();
        }
    });

    let report = executor.execute(&plan, concurrency).await;
    interrupt.abort();
    progress.finish(if report.was_cancelled() { "Cancelled" } else { "Done" });

    print_report(&formatter, &plan, &report);

    if report.was_cancelled() {
        ExitCode::Interrupted
    } else if report.is_success() {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    }
}

fn print_plan(formatter: &Formatter, plan: &TransferPlan) {
    if formatter.is_json() {
        formatter.json(&PlanOutput {
            dry_run: true,
            plan,
        });
        return;
    }

    formatter.println("Dry run mode - no changes will be made:");
    formatter.println("");
    for task in plan.tasks() {
        formatter.println(&format!(
            "  + {} -> {} ({})",
            formatter.style_locator(&task.source().to_string()),
            formatter.style_locator(&task.destination().to_string()),
            formatter.style_size(task.expected_size()),
        ));
    }
    formatter.println("");
    formatter.println(&format!(
        "Would copy {} object(s), {} total{}",
        plan.len(),
        formatter.style_size(plan.total_bytes()),
        if plan.is_resumable() { ", resumable" } else { "" },
    ));
}

fn print_report(formatter: &Formatter, plan: &TransferPlan, report: &TransferReport) {
    if formatter.is_json() {
        formatter.json(&CpOutput::new(plan, report));
        return;
    }

    for entry in report.entries() {
        let mut line = format!(
            "{} {} -> {}",
            formatter.style_state(entry.state),
            entry.source,
            formatter.style_locator(&entry.destination.to_string()),
        );
        if let Some(error) = &entry.error {
            line.push_str(&format!(" ({error})"));
        } else if entry.attempts > 1 {
            line.push_str(&format!(" ({} attempts)", entry.attempts));
        }
        if entry.state.is_failure() {
            formatter.error(&line);
        } else {
            formatter.println(&line);
        }
    }

    formatter.println("");
    let summary = format!(
        "{} copied ({}), {} skipped, {} failed, {} cancelled",
        report.succeeded(),
        formatter.style_size(report.total_bytes()),
        report.skipped(),
        report.failed(),
        report.cancelled_tasks(),
    );
    if report.is_success() {
        formatter.success(&format!("Transfer complete: {summary}"));
    } else if report.was_cancelled() {
        formatter.warning(&format!("Transfer interrupted: {summary}"));
    } else {
        formatter.warning(&format!("Transfer finished with errors: {summary}"));
    }
}
