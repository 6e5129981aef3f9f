//! Redis pub/sub backed event bus.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::{BusLink, BusMessage, EventBus, TopicControl};
use crate::error::RelayError;

pub struct RedisBus {
    client: redis::Client,
    publisher: OnceCell<ConnectionManager>,
}

impl RedisBus {
    /// Validates the URL only. Connections are opened on first use so a relay
    /// can start while Redis is still coming up.
    pub fn new(redis_url: &str) -> Result<Self, RelayError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            publisher: OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, RelayError> {
        let conn = self
            .publisher
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        let mut conn = self.publisher().await?;
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<BusLink, RelayError> {
        let pubsub = self.client.get_async_pubsub().await?;
        let (sink, stream) = pubsub.split();

        let messages = stream
            .filter_map(|msg| async move {
                let topic = msg.get_channel_name().to_string();
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(BusMessage { topic, payload }),
                    Err(err) => {
                        tracing::warn!(?err, %topic, "dropping non-text bus payload");
                        None
                    }
                }
            })
            .boxed();

        Ok(BusLink {
            control: Box::new(RedisTopics { sink }),
            messages,
        })
    }
}

struct RedisTopics {
    sink: PubSubSink,
}

#[async_trait]
impl TopicControl for RedisTopics {
    async fn subscribe(&mut self, topic: &str) -> Result<(), RelayError> {
        self.sink.subscribe(topic).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), RelayError> {
        self.sink.unsubscribe(topic).await?;
        Ok(())
    }
}
