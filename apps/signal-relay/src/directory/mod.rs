//! Client side of the Directory Service: join authorization, roster counters
//! and message history.

pub mod http;
pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_common::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::RelayError;

/// Reason surfaced to a client whose join could not be checked at all.
pub const UNAVAILABLE_REASON: &str = "Internal Error";

/// Outcome of a `ValidateJoin` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDecision {
    pub allowed: bool,
    #[serde(default)]
    pub reason: String,
}

impl JoinDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// The four RPCs the relay consumes.
///
/// Implemented over HTTP in production and by an in-memory directory in
/// tests and single-node development.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn validate_join(&self, user_id: UserId, room_id: RoomId)
        -> Result<JoinDecision, RelayError>;
    async fn user_joined(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError>;
    async fn user_left(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError>;
    /// Returns whether the message was stored.
    async fn store_message(
        &self,
        user_id: UserId,
        room_id: RoomId,
        content: &str,
    ) -> Result<bool, RelayError>;
}

/// Applies timeouts and the best-effort policy on top of a [`DirectoryService`].
///
/// `validate_join` fails closed; every other call only logs failures.
#[derive(Clone)]
pub struct DirectoryClient {
    service: Arc<dyn DirectoryService>,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(service: Arc<dyn DirectoryService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn validate_join(&self, user_id: UserId, room_id: RoomId) -> JoinDecision {
        match self
            .call("ValidateJoin", self.service.validate_join(user_id, room_id))
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(%err, user_id, room_id, "join validation failed");
                JoinDecision::deny(UNAVAILABLE_REASON)
            }
        }
    }

    pub async fn notify_joined(&self, user_id: UserId, room_id: RoomId) {
        if let Err(err) = self
            .call("UserJoined", self.service.user_joined(user_id, room_id))
            .await
        {
            tracing::warn!(%err, user_id, room_id, "failed to report join");
        }
    }

    pub async fn notify_left(&self, user_id: UserId, room_id: RoomId) {
        if let Err(err) = self
            .call("UserLeft", self.service.user_left(user_id, room_id))
            .await
        {
            tracing::warn!(%err, user_id, room_id, "failed to report leave");
        }
    }

    /// Store a chat message on a detached task. The caller never waits for it.
    pub fn persist_message(&self, user_id: UserId, room_id: RoomId, content: String) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            match client
                .call(
                    "StoreMessage",
                    client.service.store_message(user_id, room_id, &content),
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => tracing::warn!(user_id, room_id, "directory refused to store message"),
                Err(err) => tracing::warn!(%err, user_id, room_id, "failed to store message"),
            }
        })
    }

    async fn call<T>(
        &self,
        method: &'static str,
        fut: impl Future<Output = Result<T, RelayError>>,
    ) -> Result<T, RelayError> {
        time::timeout(self.timeout, fut).await.map_err(|_| {
            RelayError::UpstreamUnavailable(format!(
                "{method} timed out after {}ms",
                self.timeout.as_millis()
            ))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{DirectoryCall, MemoryDirectory};
    use super::*;

    fn client(directory: &Arc<MemoryDirectory>, timeout: Duration) -> DirectoryClient {
        DirectoryClient::new(directory.clone(), timeout)
    }

    #[tokio::test]
    async fn validate_join_passes_decision_through() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.ban(5, 2, "spam");
        let client = client(&directory, Duration::from_secs(1));

        assert!(client.validate_join(1, 5).await.allowed);

        let denied = client.validate_join(2, 5).await;
        assert!(!denied.allowed);
        assert_eq!(denied.reason, "Banned: spam");
    }

    #[tokio::test]
    async fn validate_join_fails_closed_when_unavailable() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_available(false);
        let client = client(&directory, Duration::from_secs(1));

        let decision = client.validate_join(1, 5).await;
        assert_eq!(decision, JoinDecision::deny(UNAVAILABLE_REASON));
    }

    #[tokio::test]
    async fn validate_join_fails_closed_on_timeout() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_latency(Duration::from_millis(500));
        let client = client(&directory, Duration::from_millis(20));

        let decision = client.validate_join(1, 5).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, UNAVAILABLE_REASON);
    }

    #[tokio::test]
    async fn notifications_tolerate_failures() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_available(false);
        let client = client(&directory, Duration::from_secs(1));

        // Neither call panics nor propagates the error.
        client.notify_joined(1, 5).await;
        client.notify_left(1, 5).await;
        assert_eq!(directory.participants(5), 0);
    }

    #[tokio::test]
    async fn persist_message_runs_detached() {
        let directory = Arc::new(MemoryDirectory::new());
        let client = client(&directory, Duration::from_secs(1));

        client
            .persist_message(1, 5, "hello".to_string())
            .await
            .unwrap();

        assert_eq!(directory.messages(5), vec![(1, "hello".to_string())]);
        assert_eq!(
            directory.count_calls(|c| matches!(c, DirectoryCall::StoreMessage { .. })),
            1
        );
    }

    #[tokio::test]
    async fn counters_follow_join_and_leave() {
        let directory = Arc::new(MemoryDirectory::new());
        let client = client(&directory, Duration::from_secs(1));

        client.notify_joined(1, 5).await;
        client.notify_joined(2, 5).await;
        assert_eq!(directory.participants(5), 2);

        client.notify_left(1, 5).await;
        client.notify_left(2, 5).await;
        client.notify_left(2, 5).await;
        assert_eq!(directory.participants(5), 0);
    }
}
