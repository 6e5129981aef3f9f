//! Cluster-wide publish/subscribe transport.
//!
//! A bus hands out two things: a shared publish path ([`EventBus::publish`])
//! and, per [`EventBus::connect`], one subscription link made of a topic
//! control handle and the stream of inbound messages. When the stream ends
//! the link is dead and every subscription made through it is gone.

pub mod memory;
pub mod redis_bus;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RelayError;

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// A live subscription link.
pub struct BusLink {
    pub control: Box<dyn TopicControl>,
    pub messages: BoxStream<'static, BusMessage>,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError>;

    /// Open a new subscription link with no topics subscribed.
    async fn connect(&self) -> Result<BusLink, RelayError>;
}

/// Subscription management for one [`BusLink`].
#[async_trait]
pub trait TopicControl: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<(), RelayError>;
    async fn unsubscribe(&mut self, topic: &str) -> Result<(), RelayError>;
}
