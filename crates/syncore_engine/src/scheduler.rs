//! Background triggers: periodic full syncs and reconnect delivery.

use crate::connectivity::ConnectivityMonitor;
use crate::events::SyncOutcome;
use crate::orchestrator::WeakOrchestrator;
use crate::remote::Remote;
use std::time::Duration;
use syncore_storage::KeyValueStore;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to the running background tasks.
pub(crate) struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the periodic sync loop and the connectivity watcher.
    pub(crate) fn spawn<S, R, C>(
        handle: &Handle,
        orchestrator: WeakOrchestrator<S, R, C>,
        period: Duration,
        connectivity: watch::Receiver<bool>,
    ) -> Self
    where
        S: KeyValueStore + 'static,
        R: Remote + 'static,
        C: ConnectivityMonitor + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let initially_connected = *connectivity.borrow();
        let periodic = handle.spawn(periodic_loop(
            orchestrator.clone(),
            period,
            shutdown_rx.clone(),
        ));
        let reconnect = handle.spawn(connectivity_loop(
            orchestrator,
            connectivity,
            initially_connected,
            shutdown_rx,
        ));
        Self {
            shutdown,
            tasks: vec![periodic, reconnect],
        }
    }

    /// Signals the loops to exit and waits for them.
    ///
    /// A run that is already in progress finishes first.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "sync scheduler task ended abnormally");
            }
        }
    }
}

async fn periodic_loop<S, R, C>(
    orchestrator: WeakOrchestrator<S, R, C>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: KeyValueStore + 'static,
    R: Remote + 'static,
    C: ConnectivityMonitor + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                match orchestrator.perform_sync().await {
                    Ok(SyncOutcome::Completed(report)) => {
                        debug!(synced_at = report.synced_at, "periodic sync completed");
                    }
                    Ok(SyncOutcome::AlreadyRunning) => {
                        debug!("periodic sync skipped, run in progress");
                    }
                    Err(e) => warn!(error = %e, "periodic sync failed"),
                }
            }
        }
    }
    debug!("periodic sync loop exited");
}

async fn connectivity_loop<S, R, C>(
    orchestrator: WeakOrchestrator<S, R, C>,
    mut connectivity: watch::Receiver<bool>,
    mut was_connected: bool,
    mut shutdown: watch::Receiver<bool>,
) where
    S: KeyValueStore + 'static,
    R: Remote + 'static,
    C: ConnectivityMonitor + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    debug!("connectivity monitor closed");
                    break;
                }
                let connected = *connectivity.borrow_and_update();
                let came_online = connected && !was_connected;
                was_connected = connected;
                if !came_online {
                    continue;
                }

                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                if orchestrator.queue_len() == 0 {
                    continue;
                }
                info!(queued = orchestrator.queue_len(), "connectivity restored, delivering queue");
                if let Err(e) = orchestrator.process_sync_queue().await {
                    warn!(error = %e, "queue delivery after reconnect failed");
                }
            }
        }
    }
    debug!("connectivity watcher exited");
}
