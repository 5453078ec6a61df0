//! Card table and per-player deck rotation

use rand::Rng;

use crate::ws::protocol::{CardId, EntityKind};

/// Cards held in hand at all times
pub const HAND_SIZE: usize = 4;

/// Every player plays the same deck
pub const STARTER_DECK: [CardId; 14] = [
    CardId::MeleeFighter,
    CardId::MeleeFighter,
    CardId::MeleeFighter,
    CardId::MeleeFighter,
    CardId::MeleeFighter,
    CardId::RangedFighter,
    CardId::RangedFighter,
    CardId::RangedFighter,
    CardId::RangedFighter,
    CardId::RangedFighter,
    CardId::Flying,
    CardId::Flying,
    CardId::Flying,
    CardId::Flying,
];

/// Static card data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardStats {
    pub mana_cost: u8,
    pub spawns: EntityKind,
}

impl CardStats {
    pub fn for_card(card: CardId) -> Self {
        match card {
            CardId::MeleeFighter => Self {
                mana_cost: 3,
                spawns: EntityKind::MeleeFighter,
            },
            CardId::RangedFighter => Self {
                mana_cost: 4,
                spawns: EntityKind::RangedFighter,
            },
            CardId::Flying => Self {
                mana_cost: 5,
                spawns: EntityKind::Flying,
            },
        }
    }
}

/// Shuffled draw pile with a fixed-size hand.
///
/// Played cards go back into the pile at the cursor, so the combined
/// contents of hand and pile never change.
#[derive(Debug, Clone)]
pub struct PlayerDeck {
    pile: Vec<CardId>,
    cursor: usize,
    hand: Vec<CardId>,
}

impl PlayerDeck {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_cards(&STARTER_DECK, rng)
    }

    /// Deck over `cards`, which must hold more than a hand's worth so the
    /// pile is never empty.
    pub(crate) fn from_cards<R: Rng + ?Sized>(cards: &[CardId], rng: &mut R) -> Self {
        debug_assert!(
            cards.len() > HAND_SIZE,
            "deck of {} cards leaves no draw pile",
            cards.len()
        );
        let mut pile = cards.to_vec();
        // Fisher-Yates
        for i in (1..pile.len()).rev() {
            let j = rng.gen_range(0..=i);
            pile.swap(i, j);
        }
        let hand: Vec<CardId> = pile.drain(..HAND_SIZE.min(pile.len())).collect();
        Self {
            pile,
            cursor: 0,
            hand,
        }
    }

    pub fn hand(&self) -> &[CardId] {
        &self.hand
    }

    pub fn has_card(&self, card: CardId) -> bool {
        self.hand.contains(&card)
    }

    /// Card that replaces the next played one
    pub fn next_card(&self) -> CardId {
        self.pile[self.cursor]
    }

    /// Play `card` from the hand. Returns the hand slot it occupied, or
    /// `None` if the hand does not hold it.
    pub fn use_card(&mut self, card: CardId) -> Option<usize> {
        let slot = self.hand.iter().position(|c| *c == card)?;
        self.hand[slot] = self.pile[self.cursor];
        self.pile[self.cursor] = card;
        self.cursor = (self.cursor + 1) % self.pile.len();
        Some(slot)
    }

    /// Hand and pile combined
    pub fn all_cards(&self) -> impl Iterator<Item = CardId> + '_ {
        self.hand.iter().chain(self.pile.iter()).copied()
    }
}
