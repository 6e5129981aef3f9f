//! Signaling gateway: client connections, room membership and the event bus
//! bridge that ties relay processes together.

pub mod bridge;
pub mod events;
pub mod registry;
pub mod server;
pub mod session;
