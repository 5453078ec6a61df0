//! Room service - pairs connections by room name and owns match lifecycles

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::game::{GameMatch, MatchError, MatchHandle, MatchRegistry};
use crate::ws::protocol::ServerMsg;

use super::rooms::OpenRooms;

/// Why a connection could not be seated
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Room name must not be empty")]
    EmptyRoomName,

    #[error("Match vanished before the join completed")]
    MatchGone,

    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Public status of a room that is waiting for an opponent
#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    pub room: String,
    pub match_id: Uuid,
    pub players: usize,
    pub waiting_secs: u64,
}

/// Room service
#[derive(Clone)]
pub struct RoomService {
    rooms: Arc<Mutex<OpenRooms>>,
    registry: Arc<MatchRegistry>,
    match_config: MatchConfig,
}

impl RoomService {
    pub fn new(registry: Arc<MatchRegistry>, match_config: MatchConfig) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(OpenRooms::new())),
            registry,
            match_config,
        }
    }

    /// Seat a connection in `room`. The first player creates the match, the
    /// second fills it and takes the room name out of the directory.
    pub async fn join(
        &self,
        room: &str,
        user_id: Uuid,
        display_name: String,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> Result<MatchHandle, JoinError> {
        if room.is_empty() {
            return Err(JoinError::EmptyRoomName);
        }

        let handle = {
            let mut rooms = self.rooms.lock();
            let match_id = match rooms.take_seat(room) {
                Some(id) => id,
                None => {
                    let id = self.create_match(room);
                    rooms.open(room, id);
                    rooms.take_seat(room).unwrap_or(id)
                }
            };
            self.registry.get(&match_id)
        };
        let handle = handle.ok_or(JoinError::MatchGone)?;

        handle.join(user_id, display_name, outbound).await?;

        info!(
            room = %room,
            match_id = %handle.id,
            user_id = %user_id,
            "Connection seated"
        );
        Ok(handle)
    }

    /// Spawn a match task for `room` and register it
    fn create_match(&self, room: &str) -> Uuid {
        let match_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let (game_match, handle) = GameMatch::new(match_id, room.to_string(), seed, self.match_config);
        self.registry.insert(handle);

        info!(match_id = %match_id, room = %room, seed, "Created new match");

        let registry = self.registry.clone();
        let rooms = self.rooms.clone();
        let room = room.to_string();
        tokio::spawn(async move {
            game_match.run().await;

            // Cleanup after match ends
            registry.remove(&match_id);
            rooms.lock().close(&room, match_id);

            info!(match_id = %match_id, "Match removed from registry");
        });

        match_id
    }

    /// Status of a room that is still open
    pub fn room_status(&self, room: &str) -> Option<RoomStatus> {
        let rooms = self.rooms.lock();
        let open = rooms.get(room)?;
        let players = self
            .registry
            .get(&open.match_id)
            .map(|h| h.player_count())
            .unwrap_or(0);
        Some(RoomStatus {
            room: room.to_string(),
            match_id: open.match_id,
            players,
            waiting_secs: open.wait_time().as_secs(),
        })
    }

    pub fn open_rooms(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerInput;
    use crate::ws::protocol::ClientMsg;
    use tokio_test::assert_ok;

    fn service() -> RoomService {
        RoomService::new(Arc::new(MatchRegistry::new()), MatchConfig::default())
    }

    #[tokio::test]
    async fn test_two_joins_share_a_match() {
        let service = service();
        let (tx_a, _rx_a) = mpsc::channel(1024);
        let (tx_b, _rx_b) = mpsc::channel(1024);
        let (tx_c, _rx_c) = mpsc::channel(1024);

        let a = assert_ok!(service.join("cr", Uuid::new_v4(), "a".into(), tx_a).await);
        assert_eq!(service.room_status("cr").map(|s| s.match_id), Some(a.id));

        let b = assert_ok!(service.join("cr", Uuid::new_v4(), "b".into(), tx_b).await);
        assert_eq!(a.id, b.id);
        assert_eq!(b.player_count(), 2);
        assert!(service.room_status("cr").is_none());

        // Room is private now, the name opens a new match
        let c = assert_ok!(service.join("cr", Uuid::new_v4(), "c".into(), tx_c).await);
        assert_ne!(c.id, a.id);
        assert_eq!(service.registry().active_matches(), 2);
        assert_eq!(service.open_rooms(), 1);
    }

    #[tokio::test]
    async fn test_room_names_are_separate() {
        let service = service();
        let (tx_a, _rx_a) = mpsc::channel(1024);
        let (tx_b, _rx_b) = mpsc::channel(1024);
        let a = service.join("one", Uuid::new_v4(), "a".into(), tx_a).await.unwrap();
        let b = service.join("two", Uuid::new_v4(), "b".into(), tx_b).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(matches!(
            service.join("", Uuid::new_v4(), "c".into(), mpsc::channel(1).0).await,
            Err(JoinError::EmptyRoomName)
        ));
    }

    #[tokio::test]
    async fn test_lone_player_leaving_frees_room() {
        let service = service();
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1024);
        let handle = service.join("cr", user, "a".into(), tx).await.unwrap();

        handle
            .send_input(PlayerInput {
                user_id: user,
                msg: ClientMsg::LeaveMatch,
                received_at: 0,
            })
            .await;
        // Outbound closes once the match task is gone
        while rx.recv().await.is_some() {}

        for _ in 0..100 {
            if service.registry().active_matches() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(service.registry().active_matches(), 0);
        assert!(service.room_status("cr").is_none());
    }
}
