//! Per-service health watch worker.
//!
//! A [`HealthWatch`] runs in its own task: every `probe_interval` it probes
//! its service once and publishes the result. It accepts a single control
//! message, stop, after which it closes its publisher and exits. Probes are
//! strictly sequential; a stop is only observed between probes.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::checker::StatusChecker;
use crate::store::ResultPublisher;

/// One service being actively probed.
pub struct HealthWatch {
    service: String,
    checker: StatusChecker,
    publisher: Box<dyn ResultPublisher>,
    interval: Duration,
}

/// The reconciler's handle on a running [`HealthWatch`].
pub struct WatchHandle {
    uri: String,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Probe URI the worker was started with.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the worker to stop and hand back its task for joining.
    ///
    /// Consumes the handle, so a worker can be stopped at most once.
    pub fn stop(self) -> JoinHandle<()> {
        // The worker may already be gone; nothing left to signal then.
        let _ = self.stop_tx.send(());
        self.task
    }
}

impl HealthWatch {
    pub fn new(
        service: &str,
        checker: StatusChecker,
        publisher: Box<dyn ResultPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            service: service.to_string(),
            checker,
            publisher,
            interval,
        }
    }

    /// Start the worker task.
    pub fn spawn(self) -> WatchHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let uri = self.checker.uri().to_string();
        let task = tokio::spawn(self.run(stop_rx));
        WatchHandle { uri, stop_tx, task }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        debug!(service = %self.service, uri = %self.checker.uri(), "health watch starting");

        loop {
            tokio::select! {
                biased;
                // A dropped sender counts as a stop.
                _ = &mut stop => break,
                _ = tokio::time::sleep(self.interval) => self.check_and_publish().await,
            }
        }

        self.publisher.close();
        debug!(service = %self.service, "health watch stopped");
    }

    async fn check_and_publish(&mut self) {
        let result = match self.checker.check().await {
            Ok(result) => result,
            Err(e) => {
                warn!(service = %self.service, error = %e, "health check failed");
                return;
            }
        };

        if let Err(e) = self.publisher.publish(&result) {
            warn!(service = %self.service, error = %e, "failed to publish health result");
        }
    }
}
