//! Notifier - broadcasts notifications to attached clients.

use buildit_core::notification::{AttachedClient, Notification, NotificationError};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Clients that failed and were detached.
    pub failed: usize,
}

/// Publish/subscribe hub for UI clients.
///
/// The client map is only touched under its lock for structural changes and
/// to take a snapshot; sends happen on the snapshot with the lock released.
pub struct Notifier {
    clients: Mutex<HashMap<String, Arc<dyn AttachedClient>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a client. A client with the same session id is replaced.
    pub fn attach_client(&self, client: Arc<dyn AttachedClient>) {
        let session_id = client.session_id().to_string();
        let previous = self.clients.lock().insert(session_id.clone(), client);
        if previous.is_some() {
            warn!(session = %session_id, "Replaced attached client with the same session id");
        } else {
            debug!(session = %session_id, "Attached notification client");
        }
    }

    /// Detach a client by session id. Detaching an absent client is a no-op.
    pub fn detach_client(&self, session_id: &str) -> bool {
        let removed = self.clients.lock().remove(session_id).is_some();
        if removed {
            debug!(session = %session_id, "Detached notification client");
        }
        removed
    }

    pub fn attached_clients_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn attached_client(&self, session_id: &str) -> Option<Arc<dyn AttachedClient>> {
        self.clients.lock().get(session_id).cloned()
    }

    /// Send a message to every enabled client.
    pub async fn send_message(&self, message: &Notification) -> DeliveryReport {
        let targets = self.snapshot(|client| client.is_enabled());
        self.deliver(targets, message).await
    }

    /// Send a message to the enabled clients subscribed to `topic`/`qualifier`.
    pub async fn send_to_subscribers(
        &self,
        message: &Notification,
        topic: &str,
        qualifier: &str,
    ) -> DeliveryReport {
        let targets =
            self.snapshot(|client| client.is_enabled() && client.is_subscribed(topic, qualifier));
        self.deliver(targets, message).await
    }

    /// Remove every client whose enabled flag has gone false.
    ///
    /// Backstop for clients that died without ever failing a send.
    pub fn clean_up(&self) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, client| client.is_enabled());
        let removed = before - clients.len();
        drop(clients);

        if removed > 0 {
            info!(removed, "Removed disabled notification clients");
        }
        removed
    }

    /// Run [`clean_up`](Self::clean_up) every `interval` until the returned
    /// handle is stopped or dropped, or the notifier itself is dropped.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let cancel = CancellationToken::new();
        let notifier = Arc::downgrade(self);
        let task = tokio::spawn(cleanup_loop(notifier, interval, cancel.clone()));
        info!(interval_secs = interval.as_secs(), "Started notifier cleanup");

        CleanupHandle {
            cancel,
            task: Some(task),
        }
    }

    fn snapshot(&self, keep: impl Fn(&dyn AttachedClient) -> bool) -> Vec<Arc<dyn AttachedClient>> {
        self.clients
            .lock()
            .values()
            .filter(|client| keep(client.as_ref()))
            .cloned()
            .collect()
    }

    async fn deliver(
        &self,
        targets: Vec<Arc<dyn AttachedClient>>,
        message: &Notification,
    ) -> DeliveryReport {
        let sends = targets.into_iter().map(|client| async move {
            let result = client.send_message(message).await;
            (client, result)
        });

        let mut report = DeliveryReport::default();
        for (client, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.on_send_failed(&client, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn on_send_failed(&self, client: &Arc<dyn AttachedClient>, cause: NotificationError) {
        error!(
            session = %client.session_id(),
            error = %cause,
            "Notification client failed, detaching it"
        );

        // Only evict this instance; the session may have reconnected meanwhile.
        let mut clients = self.clients.lock();
        if clients
            .get(client.session_id())
            .is_some_and(|current| Arc::ptr_eq(current, client))
        {
            clients.remove(client.session_id());
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

async fn cleanup_loop(notifier: Weak<Notifier>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(notifier) = notifier.upgrade() else {
                    break;
                };
                notifier.clean_up();
            }
        }
    }
    debug!("Notifier cleanup stopped");
}

/// Owns the periodic cleanup task started by [`Notifier::start_cleanup`].
pub struct CleanupHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Stop the cleanup task and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
