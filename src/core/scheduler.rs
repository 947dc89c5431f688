//! Fixed-interval background refresh.

use crate::core::updater::{RatesUpdater, UpdateMethod, UpdateReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs one update cycle per interval on a single tokio task.
///
/// Cycles never overlap: the worker waits for each to finish before sleeping,
/// and the updater serializes cycles against on-demand calls.
pub struct RatesScheduler {
    updater: Arc<RatesUpdater>,
    interval: Duration,
    grace: Duration,
    worker: Mutex<Option<Worker>>,
}

impl RatesScheduler {
    pub fn new(updater: Arc<RatesUpdater>, interval: Duration, grace: Duration) -> Self {
        Self {
            updater,
            interval,
            grace,
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker. Returns false if it is already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if let Some(existing) = worker.as_ref()
            && !existing.handle.is_finished()
        {
            warn!("Rate scheduler is already running");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.updater),
            self.interval,
            stop_rx,
        ));
        *worker = Some(Worker { stop_tx, handle });
        info!(
            "Rate scheduler started, interval {}s",
            self.interval.as_secs_f64()
        );
        true
    }

    /// Signals the worker and waits up to the grace period for the in-flight
    /// cycle; the task is aborted if it does not finish in time.
    pub async fn stop(&self) {
        let Some(mut worker) = self.worker.lock().await.take() else {
            debug!("Rate scheduler is not running");
            return;
        };

        let _ = worker.stop_tx.send(true);
        match tokio::time::timeout(self.grace, &mut worker.handle).await {
            Ok(_) => info!("Rate scheduler stopped"),
            Err(_) => {
                warn!(
                    "Rate scheduler did not stop within {}s, aborting",
                    self.grace.as_secs_f64()
                );
                worker.handle.abort();
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Runs a single automatic cycle in the caller's task.
    pub async fn run_once(&self) -> UpdateReport {
        self.updater.run_cycle(None, UpdateMethod::Automatic).await
    }
}

async fn run_worker(
    updater: Arc<RatesUpdater>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let report = updater.run_cycle(None, UpdateMethod::Automatic).await;
        if !report.success {
            warn!("Scheduled update had errors: {}", report.errors.join("; "));
        }

        let sender_gone = tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            changed = stop_rx.changed() => changed.is_err(),
        };
        if sender_gone {
            break;
        }
    }
    debug!("Rate scheduler worker exited");
}
