//! Initialize command.

use console::style;

use crate::config::{Config, Settings};

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    match config.source_path {
        Some(ref path) => println!("  {} Using config {}", style("✓").green(), path.display()),
        None => {
            println!(
                "{} No recipe-adjust.toml found, using defaults",
                style("!").yellow()
            );
            println!("  Providers: {} (primary) with fallbacks", config.providers.primary.name());
        }
    }

    println!(
        "{} Initialized recipe-adjust in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
