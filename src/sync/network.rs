use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::remote::RemoteStore;

/// Online/offline flag shared by the host and the sync worker.
#[derive(Clone)]
pub struct NetworkMonitor {
    online: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        NetworkMonitor {
            online: Arc::new(online),
        }
    }

    /// Returns true when the flag changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(target: "barangay_desk", event = "network_changed", online);
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Check the remote store every `interval` and drive the flag from the
    /// result. Stops when `shutdown` flips to true or its sender is dropped.
    pub fn spawn_health_check(
        &self,
        remote: Arc<dyn RemoteStore>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match remote.health_check().await {
                            Ok(()) => {
                                monitor.set_online(true);
                            }
                            Err(err) => {
                                if monitor.is_online() {
                                    tracing::warn!(
                                        target: "barangay_desk",
                                        event = "health_check_failed",
                                        error = %err
                                    );
                                }
                                monitor.set_online(false);
                            }
                        }
                    }
                }
            }
            tracing::debug!(target: "barangay_desk", event = "health_check_stopped");
        })
    }
}
