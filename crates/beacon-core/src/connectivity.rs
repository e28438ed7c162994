//! Online/offline detection with flap suppression.
//!
//! Platform code (or a reachability check) reports raw observations with
//! [`ConnectivityMonitor::report`]. Dependents only see the debounced value:
//! going offline is immediate, coming back online has to hold for the
//! debounce window first.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::remote::RemoteAuthority;

pub struct ConnectivityMonitor {
    raw: watch::Sender<bool>,
    stable: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Spawn the debounce task. Must be called inside a tokio runtime.
    pub fn start(initially_online: bool, debounce: Duration) -> Self {
        let (raw, raw_rx) = watch::channel(initially_online);
        let (stable_tx, stable) = watch::channel(initially_online);
        let task = tokio::spawn(debounce_loop(raw_rx, stable_tx, debounce));
        Self { raw, stable, task }
    }

    /// Record a raw observation from the platform
    pub fn report(&self, online: bool) {
        self.raw.send_replace(online);
    }

    /// Ping the remote and record the result
    pub async fn check_reachability<R: RemoteAuthority>(&self, remote: &R) -> bool {
        let online = match remote.ping().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("Reachability check failed: {error}");
                false
            }
        };
        self.report(online);
        online
    }

    /// Debounced state
    pub fn is_online(&self) -> bool {
        *self.stable.borrow()
    }

    /// Stream of debounced transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stable.clone()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    mut raw: watch::Receiver<bool>,
    stable: watch::Sender<bool>,
    debounce: Duration,
) {
    let publish = |online: bool| {
        let changed = stable.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    };

    while raw.changed().await.is_ok() {
        if !*raw.borrow_and_update() {
            publish(false);
            continue;
        }

        loop {
            match tokio::time::timeout(debounce, raw.changed()).await {
                Err(_) => {
                    publish(true);
                    break;
                }
                Ok(Err(_)) => return,
                Ok(Ok(())) => {
                    if !*raw.borrow_and_update() {
                        publish(false);
                        break;
                    }
                }
            }
        }
    }
}
