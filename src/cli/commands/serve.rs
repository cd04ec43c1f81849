//! Server and worker commands.

use console::style;
use tokio::sync::watch;

use super::helpers::{build_runtime, parse_bind_address};
use crate::config::{Config, Settings};
use crate::orchestrator::{join_workers, worker_id, WorkerPool};
use crate::server::{self, AppState};

/// Flip the shutdown channel on Ctrl+C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Start the HTTP API and the worker pool in one process.
pub async fn cmd_serve(
    settings: &Settings,
    config: &Config,
    bind: Option<&str>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;
    let bind = parse_bind_address(bind.unwrap_or(&config.server.bind));
    let workers = workers.unwrap_or(config.pipeline.workers);

    println!(
        "{} Starting recipe-adjust at http://{} ({} workers, providers: {})",
        style("→").cyan(),
        bind,
        workers,
        runtime.providers.join(" -> ")
    );
    println!("  Press Ctrl+C to stop");

    let shutdown = shutdown_on_ctrl_c();
    let pool = WorkerPool::new(
        runtime.orchestrator.clone(),
        workers,
        config.pipeline.poll_interval(),
    );
    let handles = pool.spawn(shutdown.clone());

    let state = AppState::new(runtime.orchestrator, runtime.providers);
    let served = server::serve(state, &bind, shutdown).await;

    join_workers(handles).await;
    served
}

/// Run workers only.
pub async fn cmd_worker(
    settings: &Settings,
    config: &Config,
    workers: Option<usize>,
    once: bool,
) -> anyhow::Result<()> {
    let runtime = build_runtime(settings, config).await?;

    if once {
        let ran = runtime.orchestrator.drain(&worker_id(0)).await?;
        let delivered = runtime
            .orchestrator
            .flush_outbox(runtime.orchestrator.outbox_batch())
            .await?;
        println!(
            "{} Processed {} adjustment(s), delivered {} event(s)",
            style("✓").green(),
            ran,
            delivered
        );
        return Ok(());
    }

    let workers = workers.unwrap_or(config.pipeline.workers);
    println!(
        "{} Running {} worker(s) (providers: {})",
        style("→").cyan(),
        workers,
        runtime.providers.join(" -> ")
    );
    println!("  Press Ctrl+C to stop");

    WorkerPool::new(runtime.orchestrator, workers, config.pipeline.poll_interval())
        .run(shutdown_on_ctrl_c())
        .await;
    Ok(())
}
