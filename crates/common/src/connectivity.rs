//! Online/offline state.
//!
//! The monitor holds the current status in a watch channel. Platforms that
//! push state changes call [`ConnectivityMonitor::set_online`] directly; for
//! everything else [`ConnectivityMonitor::spawn_probe`] polls a
//! [`ConnectivityProbe`] at a fixed interval. Listeners get a
//! [`Subscription`] that stops delivery when unsubscribed or dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityStatus {
    pub online: bool,
}

/// Shared connectivity state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<ConnectivityStatus>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityStatus { online });
        Self { tx: Arc::new(tx) }
    }

    pub fn current_status(&self) -> ConnectivityStatus {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_status().online
    }

    /// Record a new state. Returns `true` if this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|status| {
            if status.online == online {
                false
            } else {
                status.online = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Raw receiver for callers that want to await changes themselves.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.tx.subscribe()
    }

    /// Invoke `handler` on every transition.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ConnectivityStatus) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                handler(status);
            }
        });
        Subscription { task: Some(task) }
    }

    /// Invoke `handler` on every transition to online.
    pub fn on_reconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + 'static,
    {
        self.on_change(move |status| {
            if status.online {
                handler();
            }
        })
    }

    /// Poll `probe` every `interval` and feed the result into the monitor.
    pub fn spawn_probe<P>(&self, probe: P, interval: Duration) -> Subscription
    where
        P: ConnectivityProbe + 'static,
    {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe.check().await;
                debug!(online, "connectivity probe");
                monitor.set_online(online);
            }
        });
        Subscription { task: Some(task) }
    }
}

/// Handle for a listener or probe task. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.abort();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}

/// A check that decides whether the backend is reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Treats any HTTP response from `url` as online.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(self.url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.url, error = %e, "probe failed");
                false
            }
        }
    }
}
