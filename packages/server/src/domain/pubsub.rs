//! Pub/sub port.
//!
//! Channels are named `room:<type>:<room_id>`; payloads are UTF-8 JSON
//! frames. Delivery is at-most-once and per-channel ordered.

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use super::PubSubError;

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError>;

    /// Subscribe to a channel. The subscription is active when this returns.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError>;
}

/// Receiving end of a channel subscription.
///
/// Dropping or closing the subscription unsubscribes.
pub struct Subscription {
    channel: String,
    receiver: mpsc::Receiver<String>,
    // background reader of networked backends
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            forwarder: None,
        }
    }

    /// Subscription fed by a background task, aborted on close
    pub fn with_forwarder(
        channel: impl Into<String>,
        receiver: mpsc::Receiver<String>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            forwarder: Some(forwarder),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.receiver.close();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
