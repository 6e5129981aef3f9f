pub mod envelope;
pub mod id;
pub mod topic;

pub use envelope::{Envelope, Signal};
pub use id::{ConnectionId, RoomId, UserId};
