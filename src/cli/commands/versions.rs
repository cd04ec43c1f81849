//! Variation history commands.

use console::style;
use serde_json::Value;

use super::helpers::build_runtime;
use crate::config::{Config, Settings};
use crate::models::{ChangeRecord, ChangeType};

pub async fn cmd_versions(
    settings: &Settings,
    config: &Config,
    saved_recipe_id: &str,
) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    let versions = runtime.orchestrator.versions(saved_recipe_id).await?;

    if versions.is_empty() {
        println!("{} No variations for {}", style("!").yellow(), saved_recipe_id);
        return Ok(());
    }

    println!("{}", style(format!("Variations of {}", saved_recipe_id)).bold());
    for v in versions {
        let marker = if v.is_active {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {} v{:<3} {}  {}  {}",
            marker,
            v.version_number,
            style(&v.id).dim(),
            v.created_at.format("%Y-%m-%d %H:%M"),
            v.adjustment_summary
        );
    }
    Ok(())
}

fn render(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn print_change(change: &ChangeRecord) {
    match change.change_type {
        ChangeType::Added => println!(
            "  {} {} {}",
            style("+").green(),
            change.field_path,
            render(&change.after_value)
        ),
        ChangeType::Removed => println!(
            "  {} {} {}",
            style("-").red(),
            change.field_path,
            render(&change.before_value)
        ),
        ChangeType::Modified => println!(
            "  {} {}: {} -> {}",
            style("~").yellow(),
            change.field_path,
            render(&change.before_value),
            render(&change.after_value)
        ),
    }
}

pub async fn cmd_diff(
    settings: &Settings,
    config: &Config,
    saved_recipe_id: &str,
    version_id: &str,
) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    let diff = runtime
        .orchestrator
        .diff_against_original(saved_recipe_id, version_id)
        .await?;

    println!(
        "{} v{}: {}",
        style("Diff").bold(),
        diff.variation.version_number,
        diff.variation.adjustment_summary
    );
    if diff.changes.is_empty() {
        println!("  (identical to the original)");
    }
    for change in &diff.changes {
        print_change(change);
    }
    Ok(())
}

pub async fn cmd_rollback(
    settings: &Settings,
    config: &Config,
    saved_recipe_id: &str,
    version_id: &str,
) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    let variation = runtime.orchestrator.rollback(saved_recipe_id, version_id).await?;
    println!(
        "{} Version {} of {} is active",
        style("✓").green(),
        variation.version_number,
        saved_recipe_id
    );
    Ok(())
}
