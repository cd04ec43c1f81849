//! Worker pool: N claim loops plus an outbox flusher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::AdjustmentOrchestrator;

/// Stable id for worker `index` of this process.
pub fn worker_id(index: usize) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}-{}", host, std::process::id(), index)
}

pub struct WorkerPool {
    orchestrator: Arc<AdjustmentOrchestrator>,
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<AdjustmentOrchestrator>, workers: usize, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            workers: workers.max(1),
            poll_interval,
        }
    }

    /// Start the workers and the flusher. They stop once `shutdown` turns true.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    self.orchestrator.clone(),
                    worker_id(index),
                    self.poll_interval,
                    shutdown.clone(),
                ))
            })
            .collect();
        handles.push(tokio::spawn(outbox_loop(
            self.orchestrator.clone(),
            self.poll_interval,
            shutdown,
        )));
        info!(workers = self.workers, "Worker pool started");
        handles
    }

    /// Run until `shutdown` turns true, then wait for in-flight work.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        join(self.spawn(shutdown)).await;
        info!("Worker pool stopped");
    }
}

/// Wait for every task, logging the ones that panicked.
pub async fn join(handles: Vec<JoinHandle<()>>) {
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            warn!("Worker task ended abnormally: {}", e);
        }
    }
}

async fn worker_loop(
    orchestrator: Arc<AdjustmentOrchestrator>,
    worker_id: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let wake = orchestrator.wake_handle();
    debug!(worker_id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match orchestrator.run_next(&worker_id).await {
            Ok(Some(request)) => {
                debug!(worker_id, request_id = %request.id, status = %request.status, "Worker finished request");
                // There may be more queued work; look again right away.
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!(worker_id, "Worker iteration failed: {}", e),
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(worker_id, "Worker stopped");
}

async fn outbox_loop(
    orchestrator: Arc<AdjustmentOrchestrator>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = orchestrator.flush_outbox(orchestrator.outbox_batch()).await {
            warn!("Outbox flush failed: {}", e);
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_distinct_per_index() {
        let a = worker_id(0);
        let b = worker_id(1);
        assert_ne!(a, b);
        assert!(a.ends_with("-0"));
        assert!(a.contains(&std::process::id().to_string()));
    }
}
