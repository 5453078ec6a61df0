//! Game simulation modules

pub mod combat;
pub mod deck;
pub mod economy;
pub mod field;
pub mod geometry;
pub mod r#match;
pub mod navmesh;
pub mod physics;
pub mod simulation;
pub mod snapshot;

pub use r#match::{GameMatch, MatchEngine, MatchError, MatchHandle, MatchRegistry, PlayerState};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}

/// Everything a match task receives from the outside
#[derive(Debug)]
pub enum MatchCommand {
    /// Seat a player. `outbound` carries every message for that connection
    Join {
        user_id: Uuid,
        display_name: String,
        outbound: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Result<(), MatchError>>,
    },
    Input(PlayerInput),
    /// Connection dropped without a `leave_match`
    Disconnect { user_id: Uuid },
}
