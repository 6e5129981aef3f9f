use ulid::Ulid;

/// Room identifier assigned by the Directory Service.
pub type RoomId = i64;

/// User identifier assigned by the Directory Service at registration time.
pub type UserId = i64;

/// Process-local identifier of one client connection (`conn_` prefixed ULID).
pub type ConnectionId = String;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = relay_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const CONNECTION: &str = "conn";
}

/// Generate a fresh connection id.
pub fn connection_id() -> ConnectionId {
    prefixed_ulid(prefix::CONNECTION)
}
