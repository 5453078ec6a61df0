//! Directory of rooms still waiting for an opponent

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::game::r#match::MAX_PLAYERS;

/// A match that can still take players
#[derive(Debug, Clone)]
pub struct OpenRoom {
    pub match_id: Uuid,
    /// Seats handed out so far, including joins still in flight
    pub seats_taken: usize,
    pub opened_at: Instant,
}

impl OpenRoom {
    pub fn new(match_id: Uuid) -> Self {
        Self {
            match_id,
            seats_taken: 0,
            opened_at: Instant::now(),
        }
    }

    /// How long the first player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Open rooms by name. A room leaves the directory once its last seat is
/// handed out, after which the name creates a fresh match.
#[derive(Debug, Default)]
pub struct OpenRooms {
    rooms: HashMap<String, OpenRoom>,
}

impl OpenRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&OpenRoom> {
        self.rooms.get(name)
    }

    pub fn open(&mut self, name: &str, match_id: Uuid) {
        self.rooms.insert(name.to_string(), OpenRoom::new(match_id));
    }

    /// Reserve a seat in the room. Returns the match id, closing the room
    /// when that was the last seat.
    pub fn take_seat(&mut self, name: &str) -> Option<Uuid> {
        let room = self.rooms.get_mut(name)?;
        room.seats_taken += 1;
        let match_id = room.match_id;
        if room.seats_taken >= MAX_PLAYERS {
            self.rooms.remove(name);
        }
        Some(match_id)
    }

    /// Drop the room if it still points at `match_id`
    pub fn close(&mut self, name: &str, match_id: Uuid) -> bool {
        if self.rooms.get(name).map(|r| r.match_id) == Some(match_id) {
            self.rooms.remove(name);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
