//! Client copy of the hand and in-flight play requests

use tracing::warn;

use crate::game::deck::CardStats;
use crate::ws::protocol::{CardId, ClientMsg};

/// A play request waiting for its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPlay {
    pub request_id: u32,
    pub hand_index: usize,
    pub card: CardId,
    pub cost: u8,
}

/// Local hand state.
///
/// Results are cached on arrival and only applied by
/// [`CardHand::on_after_diff`], after the state diff they logically follow.
#[derive(Debug, Clone, Default)]
pub struct CardHand {
    cards: Vec<CardId>,
    next_card: Option<CardId>,
    next_request_id: u32,
    pending: Vec<PendingPlay>,
    results: Vec<(u32, Option<CardId>)>,
}

impl CardHand {
    pub fn new() -> Self {
        Self {
            next_request_id: 1,
            ..Self::default()
        }
    }

    pub fn cards(&self) -> &[CardId] {
        &self.cards
    }

    pub fn next_card(&self) -> Option<CardId> {
        self.next_card
    }

    pub fn pending(&self) -> &[PendingPlay] {
        &self.pending
    }

    pub fn on_card_hand(&mut self, cards: Vec<CardId>, next_card: CardId) {
        self.cards = cards;
        self.next_card = Some(next_card);
    }

    /// Record a play of the card at `hand_index` and build the request.
    /// `None` for an empty slot.
    pub fn play_card(&mut self, hand_index: usize, tile_x: i32, tile_y: i32) -> Option<ClientMsg> {
        let card = *self.cards.get(hand_index)?;
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.push(PendingPlay {
            request_id,
            hand_index,
            card,
            cost: CardStats::for_card(card).mana_cost,
        });
        Some(ClientMsg::PlayCard {
            request_id,
            card,
            tile_x,
            tile_y,
        })
    }

    pub fn on_play_card_result(&mut self, request_id: u32, next_card: Option<CardId>) {
        self.results.push((request_id, next_card));
    }

    /// Apply cached results now that the matching diff has arrived.
    /// Returns the resolved requests with whether each succeeded.
    pub fn on_after_diff(&mut self) -> Vec<(PendingPlay, bool)> {
        let mut resolved = Vec::with_capacity(self.results.len());
        for (request_id, next_card) in std::mem::take(&mut self.results) {
            let Some(index) = self.pending.iter().position(|p| p.request_id == request_id) else {
                warn!(request_id, "Play card result without a pending request");
                continue;
            };
            let request = self.pending.remove(index);
            if let Some(next) = next_card {
                if let (Some(slot), Some(current_next)) = (self.cards.get_mut(request.hand_index), self.next_card) {
                    *slot = current_next;
                }
                self.next_card = Some(next);
            }
            resolved.push((request, next_card.is_some()));
        }
        resolved
    }

    /// Mana committed to requests the server has not answered yet
    pub fn pending_mana(&self) -> u8 {
        self.pending.iter().map(|p| p.cost).sum()
    }
}
