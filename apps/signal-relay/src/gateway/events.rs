//! Client → relay frames.
//!
//! Relay → client traffic uses [`relay_common::Envelope`] directly.

use relay_common::{Envelope, Signal, UserId};
use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client → Server frame
// ---------------------------------------------------------------------------

/// A frame received from a client. The sender is never taken from the frame;
/// the gateway stamps the connection's own user id.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        content: String,
    },
    Offer(SignalFrame),
    Answer(SignalFrame),
    Candidate(SignalFrame),
    /// Any other `type`, including relay-only kinds. Ignored.
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Signaling payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SignalFrame {
    #[serde(default)]
    pub target_id: Option<UserId>,
    #[serde(default)]
    pub data: Value,
}

impl SignalFrame {
    fn stamp(self, user_id: UserId) -> Signal {
        Signal {
            user_id,
            target_id: self.target_id,
            data: self.data,
        }
    }
}

impl ClientFrame {
    /// The envelope to publish for this frame, sent on behalf of `user_id`.
    /// `None` for frames the relay does not forward.
    pub fn into_envelope(self, user_id: UserId) -> Option<Envelope> {
        match self {
            ClientFrame::Chat { content } => Some(Envelope::Chat { user_id, content }),
            ClientFrame::Offer(frame) => Some(Envelope::Offer(frame.stamp(user_id))),
            ClientFrame::Answer(frame) => Some(Envelope::Answer(frame.stamp(user_id))),
            ClientFrame::Candidate(frame) => Some(Envelope::Candidate(frame.stamp(user_id))),
            ClientFrame::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> ClientFrame {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn chat_is_stamped_with_sender() {
        let env = parse(r#"{"type":"chat","content":"hi"}"#).into_envelope(4);
        assert_eq!(
            env,
            Some(Envelope::Chat {
                user_id: 4,
                content: "hi".to_string()
            })
        );
    }

    #[test]
    fn forged_sender_is_ignored() {
        let env = parse(r#"{"type":"offer","user_id":99,"target_id":2,"data":{"sdp":"x"}}"#)
            .into_envelope(1)
            .unwrap();
        assert_eq!(
            env,
            Envelope::Offer(Signal {
                user_id: 1,
                target_id: Some(2),
                data: json!({ "sdp": "x" }),
            })
        );
    }

    #[test]
    fn signal_fields_are_optional() {
        let env = parse(r#"{"type":"candidate"}"#).into_envelope(1).unwrap();
        assert_eq!(
            env,
            Envelope::Candidate(Signal {
                user_id: 1,
                target_id: None,
                data: Value::Null,
            })
        );
    }

    #[test]
    fn relay_only_kinds_are_not_forwarded() {
        assert!(parse(r#"{"type":"system_kick","user_id":2}"#)
            .into_envelope(1)
            .is_none());
        assert!(parse(r#"{"type":"user_joined","user_id":2}"#)
            .into_envelope(1)
            .is_none());
    }

    #[test]
    fn chat_without_content_is_malformed() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"chat"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"content":"no type"}"#).is_err());
    }
}
