//! Connectivity state and the signal subscription the monitor consumes.
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared "are we online" flag. The monitor writes it, the sync engine reads it.
#[derive(Debug, Clone)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        self.0.swap(online, Ordering::SeqCst)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivitySignal {
    Online,
    Offline,
    /// A sync run outside this process finished.
    BackgroundSyncCompleted { at: DateTime<Utc> },
    /// A sync run outside this process failed.
    BackgroundSyncFailed { error: String },
}

/// Platform source of connectivity signals. Dropping the receiver returned by
/// `subscribe` unregisters the subscriber.
pub trait SignalSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ConnectivitySignal>;
}

/// In-process signal source backed by a broadcast channel. Producers (the HTTP
/// probe, tests, an IPC bridge) call `publish`.
#[derive(Debug, Clone)]
pub struct ChannelSignalSource {
    tx: broadcast::Sender<ConnectivitySignal>,
}

impl ChannelSignalSource {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that received the signal.
    pub fn publish(&self, signal: ConnectivitySignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }
}

impl Default for ChannelSignalSource {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SignalSource for ChannelSignalSource {
    fn subscribe(&self) -> broadcast::Receiver<ConnectivitySignal> {
        self.tx.subscribe()
    }
}
