//! In-process event bus for tests and single-node deployments.
//!
//! All links share one `tokio::sync::broadcast` channel and filter by their
//! own topic set. [`MemoryBus::sever`] kills every live link, which is how
//! tests simulate a dropped bus connection.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use super::{BusLink, BusMessage, EventBus, TopicControl};
use crate::error::RelayError;

/// Capacity of the shared channel. Links that fall behind skip messages.
const BUS_CAPACITY: usize = 4096;

type TopicSet = Arc<Mutex<HashSet<String>>>;

pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    generation: watch::Sender<u64>,
    links: Mutex<Vec<Weak<Mutex<HashSet<String>>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            sender,
            generation,
            links: Mutex::new(Vec::new()),
        }
    }

    /// Drop every live link. Their message streams end immediately.
    pub fn sever(&self) {
        self.generation.send_modify(|g| *g += 1);
        self.links.lock().clear();
    }

    /// Number of live links currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut links = self.links.lock();
        links.retain(|link| link.strong_count() > 0);
        links
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|topics| topics.lock().contains(topic))
            .count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        // No live links is not an error.
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn connect(&self) -> Result<BusLink, RelayError> {
        let topics: TopicSet = Arc::new(Mutex::new(HashSet::new()));
        self.links.lock().push(Arc::downgrade(&topics));

        let receiver = self.sender.subscribe();
        let severed = self.generation.subscribe();
        let filter = topics.clone();

        let messages = stream::unfold(
            (receiver, severed, filter),
            |(mut receiver, mut severed, filter)| async move {
                loop {
                    tokio::select! {
                        _ = severed.changed() => return None,
                        result = receiver.recv() => match result {
                            Ok(msg) => {
                                let wanted = filter.lock().contains(&msg.topic);
                                if wanted {
                                    return Some((msg, (receiver, severed, filter)));
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "memory bus link lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        },
                    }
                }
            },
        )
        .boxed();

        Ok(BusLink {
            control: Box::new(MemoryTopics { topics }),
            messages,
        })
    }
}

struct MemoryTopics {
    topics: TopicSet,
}

#[async_trait]
impl TopicControl for MemoryTopics {
    async fn subscribe(&mut self, topic: &str) -> Result<(), RelayError> {
        self.topics.lock().insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), RelayError> {
        self.topics.lock().remove(topic);
        Ok(())
    }
}
