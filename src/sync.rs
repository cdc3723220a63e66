//! Sync engine: drains the action queue to the remote endpoint, one pass at a time.
use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::connectivity::Connectivity;
use crate::error::{DeliveryError, StoreError, SyncError};
use crate::model::{ActionStatus, SyncReport};
use crate::remote::Delivery;
use crate::store::ActionStore;

type PassResult = Result<SyncReport, SyncError>;
type PassHandle = Shared<BoxFuture<'static, PassResult>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    Completed(SyncReport),
    Failed { error: String },
}

pub struct SyncEngine {
    store: Arc<ActionStore>,
    delivery: Arc<dyn Delivery>,
    connectivity: Connectivity,
    delivery_timeout: Duration,
    current: Mutex<Option<PassHandle>>,
    running: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("delivery_timeout", &self.delivery_timeout)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<ActionStore>,
        delivery: Arc<dyn Delivery>,
        connectivity: Connectivity,
        delivery_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            delivery,
            connectivity,
            delivery_timeout,
            current: Mutex::new(None),
            running: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn store(&self) -> &Arc<ActionStore> {
        &self.store
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs a drain pass, or joins the one already running.
    ///
    /// The pass runs on its own task, so dropping the returned future does not
    /// stop a delivery midway.
    pub async fn trigger_sync(self: &Arc<Self>) -> PassResult {
        if !self.connectivity.is_online() {
            debug!("sync requested while offline");
            return Err(SyncError::Offline);
        }

        let pass = {
            let mut current = self.current.lock().await;
            match current.as_ref() {
                Some(pass) => {
                    debug!("sync pass already running; joining it");
                    pass.clone()
                }
                None => {
                    let pass = self.spawn_pass();
                    *current = Some(pass.clone());
                    pass
                }
            }
        };
        pass.await
    }

    fn spawn_pass(self: &Arc<Self>) -> PassHandle {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.running.store(true, Ordering::SeqCst);
            let result = AssertUnwindSafe(engine.drain_pass())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(SyncError::Unexpected("sync pass panicked".into())));
            engine.running.store(false, Ordering::SeqCst);
            engine.current.lock().await.take();

            let event = match &result {
                Ok(report) => SyncEvent::Completed(report.clone()),
                Err(err) => {
                    error!(?err, "sync pass aborted");
                    SyncEvent::Failed {
                        error: err.to_string(),
                    }
                }
            };
            let _ = engine.events.send(event);
            result
        });
        handle
            .map(|joined| {
                joined.unwrap_or_else(|err| Err(SyncError::Unexpected(err.to_string())))
            })
            .boxed()
            .shared()
    }

    #[instrument(skip_all)]
    async fn drain_pass(&self) -> PassResult {
        let _ = self.events.send(SyncEvent::Started);
        let pending = self.store.list_pending().await?;
        info!(count = pending.len(), "sync pass started");

        let mut attempted = 0;
        let mut delivered = 0;
        let mut failed = 0;
        let mut interrupted = false;

        for action in pending {
            if !self.connectivity.is_online() {
                info!(id = %action.id, "connectivity lost; stopping sync pass");
                interrupted = true;
                break;
            }

            match self.store.mark_in_flight(&action.id).await {
                Ok(()) => {}
                Err(err @ (StoreError::NotFound { .. } | StoreError::InvalidTransition { .. })) => {
                    warn!(?err, id = %action.id, "skipping action no longer deliverable");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            attempted += 1;

            let outcome = match tokio::time::timeout(
                self.delivery_timeout,
                self.delivery.deliver(&action),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
            };

            match outcome {
                Ok(()) => {
                    self.store.mark_completed(&action.id).await?;
                    delivered += 1;
                    info!(id = %action.id, kind = %action.kind, "action delivered");
                }
                Err(err) => {
                    let status = self.store.mark_failed(&action.id, &err.to_string()).await?;
                    let parked = status == ActionStatus::Failed;
                    failed += 1;
                    warn!(
                        ?err,
                        id = %action.id,
                        kind = %action.kind,
                        attempt = action.attempts + 1,
                        parked,
                        "action delivery failed"
                    );
                }
            }
        }

        let remaining = self.store.count_remaining().await?;
        info!(attempted, delivered, failed, remaining, interrupted, "sync pass finished");
        Ok(SyncReport {
            attempted,
            delivered,
            failed,
            remaining,
            interrupted,
            finished_at: Utc::now(),
        })
    }
}
