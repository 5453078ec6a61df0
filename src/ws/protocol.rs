//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Playable cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardId {
    MeleeFighter,
    RangedFighter,
    Flying,
}

/// Everything that can exist on the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Main structure, losing it loses the match
    BigTower,
    SmallTower,
    MeleeFighter,
    RangedFighter,
    Flying,
}

/// Replicated entity activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Spawning,
    Moving,
    Attacking,
    Standing,
    Idle,
}

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Waiting for the second player
    #[default]
    Waiting,
    /// Countdown before start
    Starting,
    /// Round in progress
    Playing,
    /// Result shown, connections close at `next_state_at`
    Done,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Play a card from the hand onto a tile
    PlayCard {
        /// Correlation id echoed back in the result
        request_id: u32,
        card: CardId,
        tile_x: i32,
        tile_y: i32,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of room join
    MatchJoined {
        match_id: Uuid,
        room: String,
        /// All players in the match at join time
        players: Vec<PlayerInfo>,
    },

    /// Per-connection state delta, sent once per tick
    StateDiff(StateDiff),

    /// Initial hand, sent when the countdown starts
    CardHand {
        cards: Vec<CardId>,
        next_card: CardId,
    },

    /// Answer to a `PlayCard` request
    PlayCardResult {
        request_id: u32,
        /// Next card in the deck if the play succeeded
        next_card: Option<CardId>,
    },

    /// Match has ended, no winner means a draw
    GameOver {
        winner: Option<Uuid>,
    },

    /// Cosmetic projectile from a ranged attack
    Projectile {
        attacker_id: u32,
        victim_id: u32,
    },

    /// Whole seconds left in the round
    TimeLeft {
        seconds: u32,
    },

    /// Player left the match
    PlayerLeft {
        user_id: Uuid,
        reason: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player info for lobby/join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Replicated match state as seen by one connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateTree {
    pub phase: MatchPhase,
    pub tick: u64,
    pub next_state_at: u64,
    pub round_deadline_tick: u64,
    pub players: BTreeMap<Uuid, PlayerView>,
    pub entities: BTreeMap<u32, EntityView>,
}

/// Public player data, plus the secret part for the owning connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<PlayerSecret>,
}

/// Fields only the owning player may see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSecret {
    pub mana: u8,
    /// The last tick mana regenerated on
    pub mana_regen_last_tick: u64,
    pub hand: Vec<CardId>,
    pub next_card: CardId,
    pub is_flipped: bool,
}

/// Replicated entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: u32,
    pub owner: Uuid,
    pub kind: EntityKind,
    /// Position in tiles
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub state: EntityState,
}

/// Changes between two state trees
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MatchPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_deadline_tick: Option<u64>,
    /// Added or changed players
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub players: BTreeMap<Uuid, PlayerView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players_removed: Vec<Uuid>,
    /// Added or changed entities, in id order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities_removed: Vec<u32>,
}

/// Decode a text frame from a client.
///
/// Anything that does not match the schema exactly (missing fields,
/// fractional numbers, unknown cards) is an error and gets dropped by the
/// caller without a response.
pub fn decode_client_msg(text: &str) -> Result<ClientMsg, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_play_card() {
        let msg = decode_client_msg(
            r#"{"type":"play_card","request_id":7,"card":"ranged_fighter","tile_x":3,"tile_y":20}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMsg::PlayCard {
                request_id: 7,
                card: CardId::RangedFighter,
                tile_x: 3,
                tile_y: 20,
            }
        );
    }

    #[test]
    fn test_malformed_play_card_is_rejected() {
        // Fractional tile
        assert!(decode_client_msg(
            r#"{"type":"play_card","request_id":1,"card":"flying","tile_x":3.5,"tile_y":20}"#
        )
        .is_err());
        // Missing field
        assert!(decode_client_msg(r#"{"type":"play_card","request_id":1,"card":"flying","tile_x":3}"#).is_err());
        // Unknown card
        assert!(decode_client_msg(
            r#"{"type":"play_card","request_id":1,"card":"dragon","tile_x":3,"tile_y":20}"#
        )
        .is_err());
        // String id
        assert!(decode_client_msg(
            r#"{"type":"play_card","request_id":"1","card":"flying","tile_x":3,"tile_y":20}"#
        )
        .is_err());
    }

    #[test]
    fn test_play_card_result_wire_format() {
        let msg = ServerMsg::PlayCardResult {
            request_id: 4,
            next_card: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "play_card_result");
        assert_eq!(json["request_id"], 4);
        assert!(json["next_card"].is_null());
    }

    #[test]
    fn test_state_diff_omits_secret_when_absent() {
        let mut diff = StateDiff {
            tick: 3,
            ..StateDiff::default()
        };
        diff.players.insert(
            Uuid::nil(),
            PlayerView {
                name: "opponent".to_string(),
                secret: None,
            },
        );
        let text = serde_json::to_string(&ServerMsg::StateDiff(diff.clone())).unwrap();
        assert!(!text.contains("secret"));
        assert!(!text.contains("mana"));

        let back: ServerMsg = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ServerMsg::StateDiff(diff));
    }
}
