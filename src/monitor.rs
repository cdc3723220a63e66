//! Connectivity monitor: turns platform signals into debounced sync triggers
//! and keeps an observable `SyncStatus` in line with the store.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connectivity::{ConnectivitySignal, SignalSource};
use crate::error::SyncError;
use crate::sync::{SyncEngine, SyncEvent};

/// Snapshot for whatever presents sync state to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    debounce: Duration,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    status_rx: watch::Receiver<SyncStatus>,
    running: Option<Running>,
}

impl ConnectivityMonitor {
    pub fn new(engine: Arc<SyncEngine>, debounce: Duration) -> Self {
        let initial = SyncStatus {
            online: engine.connectivity().is_online(),
            ..Default::default()
        };
        let (status_tx, status_rx) = watch::channel(initial);
        Self {
            engine,
            debounce,
            status_tx: Arc::new(status_tx),
            status_rx,
            running: None,
        }
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Subscribes to `source` and starts reacting to signals. The subscription
    /// is held until `dispose`. Calling it again while running is a no-op.
    pub async fn initialize(&mut self, source: &dyn SignalSource) {
        if self.running.is_some() {
            return;
        }
        let signals = source.subscribe();
        let events = self.engine.subscribe();
        refresh_pending(&self.engine, &self.status_tx).await;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let worker = Worker {
            engine: Arc::clone(&self.engine),
            debounce: self.debounce,
            status: Arc::clone(&self.status_tx),
        };
        let task = tokio::spawn(worker.run(signals, events, shutdown_rx));
        self.running = Some(Running { shutdown, task });
        info!("connectivity monitor started");
    }

    /// Stops the monitor and releases the signal subscription.
    pub async fn dispose(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(err) = running.task.await {
            warn!(?err, "connectivity monitor task ended abnormally");
        }
        info!("connectivity monitor stopped");
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

struct Worker {
    engine: Arc<SyncEngine>,
    debounce: Duration,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl Worker {
    async fn run(
        self,
        mut signals: broadcast::Receiver<ConnectivitySignal>,
        mut events: broadcast::Receiver<SyncEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            let debounce_elapsed = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = debounce_elapsed => {
                    deadline = None;
                    self.spawn_sync();
                }
                signal = signals.recv() => match signal {
                    Ok(signal) => {
                        if let Some(next) = self.on_signal(signal).await {
                            deadline = next;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity signals dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("signal source closed");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => self.on_sync_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync events dropped");
                        refresh_pending(&self.engine, &self.status).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Returns `Some(new_deadline)` when the debounce timer changes.
    async fn on_signal(&self, signal: ConnectivitySignal) -> Option<Option<Instant>> {
        match signal {
            ConnectivitySignal::Online => {
                let was_online = self.engine.connectivity().set_online(true);
                self.status.send_modify(|s| s.online = true);
                if was_online {
                    // Repeated online signal: keep whatever window is running.
                    return None;
                }
                info!(debounce_ms = self.debounce.as_millis() as u64, "back online");
                Some(Some(Instant::now() + self.debounce))
            }
            ConnectivitySignal::Offline => {
                self.engine.connectivity().set_online(false);
                self.status.send_modify(|s| {
                    s.online = false;
                    s.syncing = false;
                });
                info!("went offline");
                Some(None)
            }
            ConnectivitySignal::BackgroundSyncCompleted { at } => {
                self.status.send_modify(|s| {
                    s.last_sync_at = Some(at);
                    s.last_error = None;
                });
                refresh_pending(&self.engine, &self.status).await;
                None
            }
            ConnectivitySignal::BackgroundSyncFailed { error } => {
                warn!(error = %error, "background sync failed");
                self.status.send_modify(|s| s.last_error = Some(error));
                None
            }
        }
    }

    fn on_sync_event(&self, event: SyncEvent) {
        let online = self.engine.connectivity().is_online();
        match event {
            SyncEvent::Started => {
                if online {
                    self.status.send_modify(|s| s.syncing = true);
                }
            }
            SyncEvent::Completed(report) => self.status.send_modify(|s| {
                s.syncing = false;
                s.pending = report.remaining;
                s.last_sync_at = Some(report.finished_at);
                s.last_error = None;
            }),
            SyncEvent::Failed { error } => self.status.send_modify(|s| {
                s.syncing = false;
                s.last_error = Some(error);
            }),
        }
    }

    fn spawn_sync(&self) {
        if !self.engine.connectivity().is_online() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            match engine.trigger_sync().await {
                Ok(_) | Err(SyncError::Offline) => {}
                // Already reported through the engine's Failed event.
                Err(err) => debug!(?err, "triggered sync failed"),
            }
        });
    }
}

async fn refresh_pending(engine: &SyncEngine, status: &watch::Sender<SyncStatus>) {
    match engine.store().count_remaining().await {
        Ok(pending) => status.send_modify(|s| s.pending = pending),
        Err(err) => {
            // Degrade to an empty queue view rather than failing the monitor.
            warn!(?err, "could not read pending count");
            status.send_modify(|s| s.pending = 0);
        }
    }
}
