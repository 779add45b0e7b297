//! プロセス内 PubSub 実装
//!
//! チャンネルごとに購読者の mpsc sender を保持し、publish で全購読者に
//! `try_send` する。Redis と同じく at-most-once で、購読者のバッファが
//! 溢れた場合はその購読者へのペイロードを捨てる。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::domain::{PubSub, PubSubError, Subscription};

use super::SUBSCRIPTION_BUFFER;

/// インメモリ PubSub
#[derive(Debug, Default)]
pub struct InMemoryPubSub {
    /// Key: channel, Value: 購読者の sender
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// チャンネルの有効な購読者数
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(channel)
            .map(|subscribers| subscribers.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        let mut channels = self.channels.lock().await;
        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(());
        };

        subscribers.retain(|subscriber| !subscriber.is_closed());
        for subscriber in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.try_send(payload.to_string()) {
                tracing::warn!("Subscriber buffer full on '{}', payload dropped", channel);
            }
        }
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.channels
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        tracing::debug!("Subscribed to '{}'", channel);
        Ok(Subscription::new(channel, rx))
    }
}
