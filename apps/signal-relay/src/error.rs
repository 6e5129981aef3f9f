use relay_common::ConnectionId;

/// Failure taxonomy of the relay.
///
/// None of these are fatal to the process. They surface to users only as a
/// closed connection with a reason, or not at all.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The Directory Service refused the join.
    #[error("join denied: {0}")]
    AuthorizationDenied(String),

    /// A Directory Service call failed or timed out.
    #[error("directory service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The event bus connection failed.
    #[error("event bus transport error: {0}")]
    BusTransport(String),

    /// A client frame or bus payload could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A payload could not be queued for one local connection.
    #[error("delivery to {connection_id} failed (queue overflow: {overflow})")]
    PeerDelivery {
        connection_id: ConnectionId,
        overflow: bool,
    },
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        Self::BusTransport(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}
