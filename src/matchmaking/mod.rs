//! Room-based pairing of connections into matches

pub mod rooms;
pub mod service;

pub use service::{JoinError, RoomService, RoomStatus};
