// ---------------------------------------------------------------------------
// In-memory Directory Service (tests / single-node development)
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_common::{RoomId, UserId};

use super::{DirectoryService, JoinDecision};
use crate::error::RelayError;

/// A call received by [`MemoryDirectory`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    ValidateJoin { user_id: UserId, room_id: RoomId },
    UserJoined { user_id: UserId, room_id: RoomId },
    UserLeft { user_id: UserId, room_id: RoomId },
    StoreMessage { user_id: UserId, room_id: RoomId, content: String },
}

#[derive(Default)]
struct State {
    bans: HashMap<(RoomId, UserId), String>,
    participants: HashMap<RoomId, i64>,
    messages: HashMap<RoomId, Vec<(UserId, String)>>,
    calls: Vec<DirectoryCall>,
}

/// Directory Service kept entirely in process memory.
///
/// Every room exists and every user may join unless banned. Availability and
/// latency can be toggled to exercise the relay's failure handling.
pub struct MemoryDirectory {
    state: Mutex<State>,
    available: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn ban(&self, room_id: RoomId, user_id: UserId, reason: &str) {
        self.state
            .lock()
            .bans
            .insert((room_id, user_id), reason.to_string());
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Durable participant counter for a room (never negative).
    pub fn participants(&self, room_id: RoomId) -> i64 {
        self.state
            .lock()
            .participants
            .get(&room_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn messages(&self, room_id: RoomId) -> Vec<(UserId, String)> {
        self.state
            .lock()
            .messages
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&DirectoryCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    async fn enter(&self, call: DirectoryCall) -> Result<(), RelayError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(RelayError::UpstreamUnavailable(
                "directory is offline".to_string(),
            ));
        }
        self.state.lock().calls.push(call);
        Ok(())
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn validate_join(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<JoinDecision, RelayError> {
        self.enter(DirectoryCall::ValidateJoin { user_id, room_id })
            .await?;
        let state = self.state.lock();
        Ok(match state.bans.get(&(room_id, user_id)) {
            Some(reason) => JoinDecision::deny(format!("Banned: {reason}")),
            None => JoinDecision::allow(),
        })
    }

    async fn user_joined(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError> {
        self.enter(DirectoryCall::UserJoined { user_id, room_id })
            .await?;
        *self.state.lock().participants.entry(room_id).or_insert(0) += 1;
        Ok(())
    }

    async fn user_left(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError> {
        self.enter(DirectoryCall::UserLeft { user_id, room_id })
            .await?;
        let mut state = self.state.lock();
        let count = state.participants.entry(room_id).or_insert(0);
        *count = (*count - 1).max(0);
        Ok(())
    }

    async fn store_message(
        &self,
        user_id: UserId,
        room_id: RoomId,
        content: &str,
    ) -> Result<bool, RelayError> {
        self.enter(DirectoryCall::StoreMessage {
            user_id,
            room_id,
            content: content.to_string(),
        })
        .await?;
        let mut state = self.state.lock();
        if state.bans.contains_key(&(room_id, user_id)) {
            return Ok(false);
        }
        state
            .messages
            .entry(room_id)
            .or_default()
            .push((user_id, content.to_string()));
        Ok(true)
    }
}
