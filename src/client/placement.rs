//! Drag-and-drop placement preview

use crate::game::deck::CardStats;
use crate::game::field::{is_water_tile, mirror, tile_at, tile_center, FIELD_HEIGHT, FIELD_WIDTH};
use crate::game::geometry::{Rect, Vec2};
use crate::ws::protocol::{CardId, ClientMsg};

use super::card_hand::CardHand;

/// Neighbours tried when the pointer is over water, horizontal first
const WATER_NUDGE: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Where a dragged card would land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Valid { tile_x: i32, tile_y: i32 },
    InvalidPosition,
    /// Pointer is still over the hand, below the field
    BelowPlayLine,
}

/// Local refusal shown to the player without contacting the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocalRejection {
    #[error("Not enough mana")]
    NotEnoughMana,

    #[error("Invalid position")]
    InvalidPosition,
}

/// Result of letting go of a dragged card
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    /// Request sent; the preview stays as placed until the result arrives
    Sent(ClientMsg),
    Rejected(LocalRejection),
    /// Dropped back onto the hand
    Cancelled,
}

/// Classify a pointer position given in the player's own view, where their
/// side is at the bottom and `y >= FIELD_HEIGHT` is the hand area.
pub fn classify(pointer: Vec2, is_flipped: bool, enemy_zones: &[Rect]) -> Placement {
    if pointer.y >= FIELD_HEIGHT as f32 {
        return Placement::BelowPlayLine;
    }
    let p = if is_flipped { mirror(pointer) } else { pointer };
    let (x, y) = tile_at(p);
    let x = x.clamp(0, FIELD_WIDTH as i32 - 1);
    let y = y.clamp(0, FIELD_HEIGHT as i32 - 1);

    let Some((x, y)) = nudge_out_of_water(x, y) else {
        return Placement::InvalidPosition;
    };
    if enemy_zones.iter().any(|zone| zone.contains(tile_center(x, y))) {
        return Placement::InvalidPosition;
    }
    Placement::Valid { tile_x: x, tile_y: y }
}

fn nudge_out_of_water(x: i32, y: i32) -> Option<(i32, i32)> {
    if !is_water_tile(x, y) {
        return Some((x, y));
    }
    WATER_NUDGE
        .iter()
        .map(|(dx, dy)| (x + dx, y + dy))
        .find(|&(nx, ny)| {
            nx >= 0 && ny >= 0 && nx < FIELD_WIDTH as i32 && ny < FIELD_HEIGHT as i32 && !is_water_tile(nx, ny)
        })
}

/// Non-authoritative stand-in for a card being dragged or awaiting its result
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementPreview {
    pub hand_index: usize,
    pub card: CardId,
    pub placement: Placement,
    /// Sent to the server, no longer draggable
    pub placed: bool,
    pub request_id: Option<u32>,
}

impl PlacementPreview {
    pub fn new(hand_index: usize, card: CardId) -> Self {
        Self {
            hand_index,
            card,
            placement: Placement::BelowPlayLine,
            placed: false,
            request_id: None,
        }
    }

    pub fn drag(&mut self, pointer: Vec2, is_flipped: bool, enemy_zones: &[Rect]) {
        if !self.placed {
            self.placement = classify(pointer, is_flipped, enemy_zones);
        }
    }

    /// Finish the drag with `mana` available
    pub fn release(&mut self, mana: f32, hand: &mut CardHand) -> ReleaseOutcome {
        let (tile_x, tile_y) = match self.placement {
            Placement::BelowPlayLine => return ReleaseOutcome::Cancelled,
            Placement::InvalidPosition => return ReleaseOutcome::Rejected(LocalRejection::InvalidPosition),
            Placement::Valid { tile_x, tile_y } => (tile_x, tile_y),
        };
        if mana < CardStats::for_card(self.card).mana_cost as f32 {
            return ReleaseOutcome::Rejected(LocalRejection::NotEnoughMana);
        }
        match hand.play_card(self.hand_index, tile_x, tile_y) {
            Some(msg) => {
                if let ClientMsg::PlayCard { request_id, .. } = msg {
                    self.request_id = Some(request_id);
                }
                self.placed = true;
                ReleaseOutcome::Sent(msg)
            }
            None => ReleaseOutcome::Rejected(LocalRejection::InvalidPosition),
        }
    }

    /// Where the dummy entity is drawn, in field coordinates
    pub fn position(&self) -> Option<Vec2> {
        match self.placement {
            Placement::Valid { tile_x, tile_y } => Some(tile_center(tile_x, tile_y)),
            _ => None,
        }
    }
}
