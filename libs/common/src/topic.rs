//! Event bus topic naming.

use crate::id::RoomId;

/// Process-wide control topic every relay subscribes to unconditionally.
pub const CONTROL_TOPIC: &str = "global_control";

const ROOM_PREFIX: &str = "room:";

/// Topic carrying all events of one room.
pub fn room_topic(room_id: RoomId) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

/// Extract the room id from a `room:{id}` topic. Any other topic yields `None`.
pub fn parse_room_topic(topic: &str) -> Option<RoomId> {
    topic.strip_prefix(ROOM_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_topic_format() {
        assert_eq!(room_topic(5), "room:5");
        assert_eq!(parse_room_topic("room:5"), Some(5));
    }

    #[test]
    fn parse_rejects_other_topics() {
        assert_eq!(parse_room_topic(CONTROL_TOPIC), None);
        assert_eq!(parse_room_topic("room:"), None);
        assert_eq!(parse_room_topic("room:abc"), None);
        assert_eq!(parse_room_topic("lobby:5"), None);
    }
}
