//! Adjustment request commands: submit, status, cancel, retry.

use std::path::Path;

use anyhow::Context;
use console::style;

use super::helpers::{build_runtime, status_style};
use crate::config::{Config, Settings};
use crate::models::AdjustmentRequest;
use crate::orchestrator::{worker_id, SubmitAdjustment};
use crate::repository::CancelOutcome;

fn print_request(request: &AdjustmentRequest) {
    println!("{}", style(&request.id).bold());
    println!("  Saved recipe: {}", request.saved_recipe_id);
    println!("  Status:       {}", status_style(request.status.as_str()));
    println!("  Attempts:     {}", request.attempt_count);
    if let Some(ref provider) = request.provider_used {
        println!("  Provider:     {}", provider);
    }
    if let Some(ref variation) = request.output_variant_id {
        println!("  Variation:    {}", variation);
    }
    if let Some(kind) = request.error_kind {
        println!("  Error:        {} ({})", kind.user_message(), style(kind.as_str()).dim());
    }
    if let Some(ms) = request.processing_time_ms {
        println!("  Took:         {} ms", ms);
    }
}

/// Submit an adjustment described by a JSON file.
pub async fn cmd_submit(
    settings: &Settings,
    config: &Config,
    file: &Path,
    wait: bool,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let input: SubmitAdjustment = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid adjustment request", file.display()))?;

    let runtime = build_runtime(settings, config).await?;
    let request = runtime.orchestrator.submit(input).await?;
    println!(
        "{} Accepted adjustment {}",
        style("✓").green(),
        style(&request.id).bold()
    );

    if !wait {
        println!("  Run `recipe-adjust worker --once` or `recipe-adjust serve` to process it");
        return Ok(());
    }

    println!("{} Processing...", style("→").cyan());
    let worker = worker_id(0);
    let finished = match runtime.orchestrator.run(&request.id, &worker).await? {
        Some(done) => done,
        None => runtime.orchestrator.get_status(&request.id).await?,
    };
    runtime
        .orchestrator
        .flush_outbox(runtime.orchestrator.outbox_batch())
        .await?;

    print_request(&finished);
    if let Some(ref variation_id) = finished.output_variant_id {
        let diff = runtime
            .orchestrator
            .diff_against_original(&finished.saved_recipe_id, variation_id)
            .await?;
        println!(
            "  Version {}: {}",
            diff.variation.version_number, diff.variation.adjustment_summary
        );
        println!("  {} change(s) from the original", diff.changes.len());
    }
    Ok(())
}

/// Show a request and its status history.
pub async fn cmd_status(settings: &Settings, config: &Config, request_id: &str) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    let request = runtime.orchestrator.get_status(request_id).await?;
    print_request(&request);

    let history = runtime.orchestrator.history(request_id).await?;
    if !history.is_empty() {
        println!("\n  {}", style("History").bold());
        for transition in history {
            let from = transition
                .from_status
                .map(|s| s.as_str())
                .unwrap_or("-");
            println!(
                "    {}  {} -> {}",
                transition.at.format("%Y-%m-%d %H:%M:%S"),
                from,
                status_style(transition.to_status.as_str())
            );
        }
    }
    Ok(())
}

pub async fn cmd_cancel(settings: &Settings, config: &Config, request_id: &str) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    let (outcome, request) = runtime.orchestrator.cancel(request_id).await?;
    match outcome {
        CancelOutcome::CancelledImmediately => {
            println!("{} Cancelled {}", style("✓").green(), request.id);
        }
        CancelOutcome::Scheduled => {
            println!(
                "{} Cancellation scheduled; {} stops at its next stage ({})",
                style("→").cyan(),
                request.id,
                request.status
            );
        }
        CancelOutcome::AlreadyTerminal => {
            println!(
                "{} {} already finished as {}",
                style("!").yellow(),
                request.id,
                status_style(request.status.as_str())
            );
        }
    }
    Ok(())
}

pub async fn cmd_retry(settings: &Settings, config: &Config, request_id: &str) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    match runtime.orchestrator.retry(request_id).await {
        Ok(request) => {
            println!(
                "{} Retrying {} as {}",
                style("✓").green(),
                request_id,
                style(&request.id).bold()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", style("✗").red(), e);
            Err(e.into())
        }
    }
}
