//! Bridge between local room activity and the cluster-wide event bus.
//!
//! Exactly one listener task per process consumes the bus. It is always
//! subscribed to [`CONTROL_TOPIC`] plus `room:{id}` for every room with a
//! local member, and it dispatches inbound envelopes strictly in arrival
//! order: `system_kick` becomes a registry kick, everything else a local
//! broadcast (including echoes of this process's own publishes).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use relay_common::topic::{self, CONTROL_TOPIC};
use relay_common::{Envelope, RoomId};
use tokio::sync::{watch, Mutex, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time;

use super::registry::MembershipRegistry;
use crate::bus::{BusMessage, EventBus, TopicControl};
use crate::error::RelayError;

/// Close reason used when a kick envelope carries none.
pub const DEFAULT_KICK_REASON: &str = "You have been blocked from this room.";

/// Reconnect backoff for the bus listener.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

type RoomGates = Arc<DashMap<RoomId, Arc<Mutex<()>>>>;

/// Exclusive access to one room's join/leave transitions.
///
/// Dropping the gate releases it and forgets the room's lock when nobody
/// else is waiting on it.
pub struct RoomGate {
    room_id: RoomId,
    guard: Option<OwnedMutexGuard<()>>,
    gates: RoomGates,
}

impl Drop for RoomGate {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.gates
            .remove_if(&self.room_id, |_, gate| Arc::strong_count(gate) == 1);
    }
}

pub struct BusBridge {
    bus: Arc<dyn EventBus>,
    registry: Arc<MembershipRegistry>,
    backoff: Backoff,
    /// Topic control of the current bus link; `None` while disconnected.
    control: Mutex<Option<Box<dyn TopicControl>>>,
    /// Rooms whose topic should be subscribed.
    subscribed: parking_lot::Mutex<HashSet<RoomId>>,
    gates: RoomGates,
    shutdown: watch::Sender<bool>,
    /// Asks the listener to drop its link and attach a fresh one.
    relink: Notify,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BusBridge {
    pub fn new(bus: Arc<dyn EventBus>, registry: Arc<MembershipRegistry>, backoff: Backoff) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bus,
            registry,
            backoff,
            control: Mutex::new(None),
            subscribed: parking_lot::Mutex::new(HashSet::new()),
            gates: Arc::new(DashMap::new()),
            shutdown,
            relink: Notify::new(),
            listener: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the listener task. Calling it again while it runs does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let bridge = self.clone();
        let shutdown = self.shutdown.subscribe();
        *listener = Some(tokio::spawn(async move { bridge.listen(shutdown).await }));
    }

    /// Stop the listener, drop the bus link and forget every subscription.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(err) = listener.await {
                tracing::error!(?err, "event bus listener panicked");
            }
        }
        self.control.lock().await.take();
        self.subscribed.lock().clear();
        tracing::info!("event bus bridge stopped");
    }

    /// Serialize and publish an envelope on the room's topic.
    pub async fn publish(&self, room_id: RoomId, envelope: &Envelope) -> Result<(), RelayError> {
        let payload = serde_json::to_string(envelope)?;
        self.bus.publish(&topic::room_topic(room_id), payload).await
    }

    /// Serialize join/leave transitions of one room. Hold the gate across a
    /// registry change and the matching `subscribe`/`unsubscribe`.
    pub async fn lock_room(&self, room_id: RoomId) -> RoomGate {
        let gate = self.gates.entry(room_id).or_default().clone();
        let guard = gate.lock_owned().await;
        RoomGate {
            room_id,
            guard: Some(guard),
            gates: self.gates.clone(),
        }
    }

    /// Subscribe to the room's topic unless already subscribed.
    pub async fn subscribe(&self, room_id: RoomId) {
        let newly_wanted = self.subscribed.lock().insert(room_id);
        if !newly_wanted {
            return;
        }
        let topic = topic::room_topic(room_id);
        let mut control = self.control.lock().await;
        let Some(link) = control.as_mut() else {
            tracing::debug!(%topic, "bus link down; subscribing on reconnect");
            return;
        };
        let subscribed = link.subscribe(&topic).await;
        match subscribed {
            Ok(()) => tracing::debug!(%topic, "subscribed"),
            Err(err) => {
                // The link cannot be trusted to hear this room; replace it so
                // the reconnect resubscribes everything.
                tracing::warn!(%err, %topic, "subscribe failed; relinking");
                control.take();
                self.relink.notify_one();
            }
        }
    }

    /// Unsubscribe from the room's topic if currently subscribed.
    pub async fn unsubscribe(&self, room_id: RoomId) {
        let was_wanted = self.subscribed.lock().remove(&room_id);
        if !was_wanted {
            return;
        }
        let topic = topic::room_topic(room_id);
        let mut control = self.control.lock().await;
        if let Some(control) = control.as_mut() {
            match control.unsubscribe(&topic).await {
                Ok(()) => tracing::debug!(%topic, "unsubscribed"),
                Err(err) => tracing::warn!(%err, %topic, "unsubscribe failed"),
            }
        }
    }

    pub fn is_subscribed(&self, room_id: RoomId) -> bool {
        self.subscribed.lock().contains(&room_id)
    }

    /// Whether the listener currently holds a live bus link.
    pub async fn is_connected(&self) -> bool {
        self.control.lock().await.is_some()
    }

    /// Route one inbound bus message to the registry.
    pub fn dispatch(&self, message: BusMessage) {
        let Some(room_id) = topic::parse_room_topic(&message.topic) else {
            tracing::debug!(topic = %message.topic, "ignoring control message");
            return;
        };

        let envelope: Envelope = match serde_json::from_str(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, room_id, "dropping malformed bus payload");
                return;
            }
        };

        match envelope {
            Envelope::SystemKick { user_id, reason } => {
                let reason = reason.as_deref().unwrap_or(DEFAULT_KICK_REASON);
                if !self.registry.kick(room_id, user_id, reason) {
                    tracing::debug!(room_id, user_id, "kick target not connected here");
                }
            }
            _ => {
                self.registry
                    .broadcast(room_id, &Utf8Bytes::from(message.payload), None);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Listener loop
    // -----------------------------------------------------------------------

    async fn listen(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut delay = self.backoff.initial;

        loop {
            let stopped = *shutdown.borrow();
            if stopped {
                break;
            }

            match self.attach().await {
                Ok(mut messages) => {
                    delay = self.backoff.initial;
                    tracing::info!("event bus listener connected");

                    let stopping = loop {
                        tokio::select! {
                            _ = shutdown.changed() => break true,
                            _ = self.relink.notified() => break false,
                            next = messages.next() => match next {
                                Some(message) => self.dispatch(message),
                                None => break false,
                            },
                        }
                    };

                    self.control.lock().await.take();
                    if stopping {
                        break;
                    }
                    tracing::warn!("event bus connection lost");
                }
                Err(err) => {
                    tracing::warn!(%err, "event bus connect failed");
                }
            }

            tracing::info!(retry_in_ms = delay.as_millis() as u64, "reconnecting to event bus");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = time::sleep(delay) => {}
            }
            delay = self.backoff.next(delay);
        }

        tracing::debug!("event bus listener exiting");
    }

    /// Open a bus link, subscribe the control topic and every wanted room,
    /// and install its control handle.
    async fn attach(&self) -> Result<BoxStream<'static, BusMessage>, RelayError> {
        let mut link = self.bus.connect().await?;

        let mut control = self.control.lock().await;
        link.control.subscribe(CONTROL_TOPIC).await?;
        let rooms: Vec<RoomId> = self.subscribed.lock().iter().copied().collect();
        for room_id in rooms {
            link.control.subscribe(&topic::room_topic(room_id)).await?;
        }
        *control = Some(link.control);

        Ok(link.messages)
    }
}
