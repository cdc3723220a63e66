//! Periodic health probe that publishes online/offline transitions.
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connectivity::{ChannelSignalSource, ConnectivitySignal};
use crate::remote::RemoteClient;

pub struct HttpProbe {
    client: RemoteClient,
    source: ChannelSignalSource,
    interval: Duration,
}

pub struct ProbeHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

impl HttpProbe {
    pub fn new(client: RemoteClient, source: ChannelSignalSource, interval: Duration) -> Self {
        Self {
            client,
            source,
            interval,
        }
    }

    /// Probes immediately, then every `interval`. Only transitions are
    /// published; the first result is always published.
    pub fn spawn(self) -> ProbeHandle {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut last: Option<bool> = None;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let online = self.client.probe(self.interval).await;
                        if last != Some(online) {
                            info!(online, "connectivity changed");
                            let signal = if online {
                                ConnectivitySignal::Online
                            } else {
                                ConnectivitySignal::Offline
                            };
                            let delivered = self.source.publish(signal);
                            debug!(delivered, "connectivity signal published");
                            last = Some(online);
                        }
                    }
                }
            }
        });
        ProbeHandle { shutdown, task }
    }
}
