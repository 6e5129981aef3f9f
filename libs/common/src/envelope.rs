//! The tagged message unit exchanged with clients and over the event bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::UserId;

/// One relayed event. Serialized as a JSON object with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Chat {
        user_id: UserId,
        content: String,
    },
    Offer(Signal),
    Answer(Signal),
    Candidate(Signal),
    UserJoined {
        user_id: UserId,
    },
    UserLeft {
        user_id: UserId,
    },
    ExistingUsers {
        ids: Vec<UserId>,
    },
    /// Moderation control event. Consumed by relays, never sent to clients.
    SystemKick {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// WebRTC signaling payload (offer, answer or ICE candidate).
///
/// `data` is opaque to the relay; `target_id` is a hint clients use to
/// filter signaling addressed to someone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub user_id: UserId,
    #[serde(default)]
    pub target_id: Option<UserId>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// The wire `type` tag of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Chat { .. } => "chat",
            Envelope::Offer(_) => "offer",
            Envelope::Answer(_) => "answer",
            Envelope::Candidate(_) => "candidate",
            Envelope::UserJoined { .. } => "user_joined",
            Envelope::UserLeft { .. } => "user_left",
            Envelope::ExistingUsers { .. } => "existing_users",
            Envelope::SystemKick { .. } => "system_kick",
        }
    }

    /// The user the envelope is about. `existing_users` has none.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Envelope::Chat { user_id, .. }
            | Envelope::UserJoined { user_id }
            | Envelope::UserLeft { user_id }
            | Envelope::SystemKick { user_id, .. } => Some(*user_id),
            Envelope::Offer(signal) | Envelope::Answer(signal) | Envelope::Candidate(signal) => {
                Some(signal.user_id)
            }
            Envelope::ExistingUsers { .. } => None,
        }
    }
}
