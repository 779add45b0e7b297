//! Redis PubSub 実装
//!
//! 購読ごとに専用の pub/sub 接続を張り、バックグラウンドタスクが
//! メッセージストリームを `Subscription` の mpsc に転送する。

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use crate::{
    domain::{PubSub, PubSubError, Subscription},
    infrastructure::redis_call::redis_call,
};

use super::SUBSCRIPTION_BUFFER;

impl From<redis::RedisError> for PubSubError {
    fn from(err: redis::RedisError) -> Self {
        PubSubError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RedisPubSub {
    client: redis::Client,
}

impl RedisPubSub {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn open(url: &str) -> Result<Self, PubSubError> {
        Ok(Self::new(redis::Client::open(url)?))
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        let receivers: i64 = redis_call::<_, PubSubError, _>(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.publish(channel, payload).await
        })
        .await?;
        tracing::debug!("Published to '{}' ({} receivers)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        // the message stream itself is unbounded; only the handshake is timed
        let pubsub = redis_call::<_, PubSubError, _>(async {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(channel).await?;
            Ok::<_, redis::RedisError>(pubsub)
        })
        .await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable payload on '{}': {}", name, e);
                        continue;
                    }
                };
                match tx.try_send(payload) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Subscriber buffer full on '{}', payload dropped", name);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            tracing::debug!("Redis subscription to '{}' ended", name);
        });

        Ok(Subscription::with_forwarder(channel, rx, forwarder))
    }
}
