//! Shared setup for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use console::style;

use crate::collaborators::{completion_sink, Collaborators};
use crate::config::{Config, Settings};
use crate::gateway::ProviderGateway;
use crate::orchestrator::AdjustmentOrchestrator;
use crate::pipeline::GenerationSettings;
use crate::repository::DbContext;

/// Open the database, failing with a hint when `init` has not been run.
pub async fn open_db(settings: &Settings) -> anyhow::Result<DbContext> {
    if !settings.database_exists() {
        anyhow::bail!(
            "No database at {}. Run `recipe-adjust init` first.",
            settings.database_path().display()
        );
    }
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;
    Ok(ctx)
}

/// Everything a command needs to work with adjustments.
pub struct Runtime {
    pub orchestrator: Arc<AdjustmentOrchestrator>,
    pub providers: Vec<String>,
}

pub async fn build_runtime(settings: &Settings, config: &Config) -> anyhow::Result<Runtime> {
    let db = open_db(settings).await?;

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let fixtures = config.fixtures_path(&base_dir);
    let collaborators = Collaborators::from_config(&config.collaborators, fixtures.as_deref())
        .context("Failed to set up collaborators")?;
    let sink = completion_sink(&config.collaborators)?;

    let gateway = ProviderGateway::from_config(&config.providers)
        .context("Failed to set up the primary provider")?;
    let providers = gateway.provider_names();

    let orchestrator = AdjustmentOrchestrator::new(
        &db,
        collaborators,
        Arc::new(gateway),
        sink,
        &config.pipeline,
        GenerationSettings::from_config(&config.providers),
    );

    Ok(Runtime {
        orchestrator: Arc::new(orchestrator),
        providers,
    })
}

/// Parse a bind address that can be:
/// - Just a port: "8080" -> 127.0.0.1:8080
/// - Just a host: "0.0.0.0" -> 0.0.0.0:8080
/// - Host and port: "0.0.0.0:8080" -> 0.0.0.0:8080
pub fn parse_bind_address(bind: &str) -> String {
    if let Ok(port) = bind.parse::<u16>() {
        return format!("127.0.0.1:{}", port);
    }
    if let Some((_, port)) = bind.rsplit_once(':') {
        if port.parse::<u16>().is_ok() {
            return bind.to_string();
        }
    }
    format!("{}:8080", bind)
}

pub fn status_style(status: &str) -> console::StyledObject<&str> {
    match status {
        "completed" => style(status).green(),
        "failed" => style(status).red(),
        "pending" => style(status).dim(),
        _ => style(status).cyan(),
    }
}
