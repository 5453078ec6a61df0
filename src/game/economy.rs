//! Mana and card placement rules

use super::field::{is_water_tile, tile_center, tile_in_bounds};
use super::geometry::Rect;
use crate::ws::protocol::CardId;

pub const MANA_START: u8 = 5;
pub const MANA_MAX: u8 = 10;
/// Ticks per mana point (2.8 s)
pub const MANA_REGEN_TICKS: u64 = 56;

/// Why a play request was refused.
///
/// The client only ever sees an empty result; the reason is for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayCardRejection {
    #[error("match is not in progress")]
    NotPlaying,

    #[error("player is not part of this match")]
    UnknownPlayer,

    #[error("card {0:?} is not in hand")]
    CardNotInHand(CardId),

    #[error("tile ({x}, {y}) is outside the field")]
    OutOfBounds { x: i32, y: i32 },

    #[error("tile ({x}, {y}) is water")]
    Water { x: i32, y: i32 },

    #[error("tile ({x}, {y}) is inside an enemy influence zone")]
    InfluenceZone { x: i32, y: i32 },

    #[error("not enough mana: have {have}, need {need}")]
    NotEnoughMana { have: u8, need: u8 },
}

/// Mana counter with its regeneration timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManaPool {
    mana: u8,
    regen_last_tick: u64,
}

impl Default for ManaPool {
    fn default() -> Self {
        Self {
            mana: MANA_START,
            regen_last_tick: 0,
        }
    }
}

impl ManaPool {
    pub fn with_mana(mana: u8) -> Self {
        Self {
            mana: mana.min(MANA_MAX),
            ..Self::default()
        }
    }

    pub fn mana(&self) -> u8 {
        self.mana
    }

    pub fn regen_last_tick(&self) -> u64 {
        self.regen_last_tick
    }

    /// Restart the regen period at `tick`
    pub fn reset_regen(&mut self, tick: u64) {
        self.regen_last_tick = tick;
    }

    /// Per-tick regeneration. The timer is left alone while capped; spending
    /// from the cap restarts it.
    pub fn regen(&mut self, tick: u64) -> bool {
        if self.mana >= MANA_MAX {
            return false;
        }
        if tick >= self.regen_last_tick + MANA_REGEN_TICKS {
            self.mana += 1;
            self.regen_last_tick = tick;
            return true;
        }
        false
    }

    pub fn can_afford(&self, cost: u8) -> Result<(), PlayCardRejection> {
        if self.mana < cost {
            return Err(PlayCardRejection::NotEnoughMana {
                have: self.mana,
                need: cost,
            });
        }
        Ok(())
    }

    /// Deduct `cost` at `tick`
    pub fn spend(&mut self, cost: u8, tick: u64) -> Result<(), PlayCardRejection> {
        self.can_afford(cost)?;
        if self.mana == MANA_MAX {
            self.regen_last_tick = tick;
        }
        self.mana -= cost;
        Ok(())
    }
}

/// Check that a unit may be placed on a tile, given the influence zones of
/// the opponent's standing buildings.
pub fn validate_placement(tile_x: i32, tile_y: i32, enemy_zones: &[Rect]) -> Result<(), PlayCardRejection> {
    if !tile_in_bounds(tile_x, tile_y) {
        return Err(PlayCardRejection::OutOfBounds { x: tile_x, y: tile_y });
    }
    if is_water_tile(tile_x, tile_y) {
        return Err(PlayCardRejection::Water { x: tile_x, y: tile_y });
    }
    let center = tile_center(tile_x, tile_y);
    if enemy_zones.iter().any(|zone| zone.contains(center)) {
        return Err(PlayCardRejection::InfluenceZone { x: tile_x, y: tile_y });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regen_period_and_cap() {
        let mut pool = ManaPool::default();
        pool.reset_regen(100);

        for tick in 100..(100 + MANA_REGEN_TICKS) {
            assert!(!pool.regen(tick));
        }
        assert!(pool.regen(100 + MANA_REGEN_TICKS));
        assert_eq!(pool.mana(), MANA_START + 1);

        for tick in 0..10_000 {
            pool.regen(200 + tick);
            assert!(pool.mana() <= MANA_MAX);
        }
        assert_eq!(pool.mana(), MANA_MAX);
    }

    #[test]
    fn test_regen_timer_deferred_while_capped() {
        let mut pool = ManaPool::with_mana(MANA_MAX);
        pool.reset_regen(400);
        assert!(!pool.regen(500));
        assert!(!pool.regen(900));
        assert_eq!(pool.regen_last_tick(), 400);

        pool.spend(3, 910).unwrap();
        assert_eq!(pool.regen_last_tick(), 910);
        assert!(!pool.regen(910 + MANA_REGEN_TICKS - 1));
        assert!(pool.regen(910 + MANA_REGEN_TICKS));
    }

    #[test]
    fn test_spend_never_goes_negative() {
        let mut pool = ManaPool::with_mana(2);
        assert_eq!(
            pool.spend(3, 0),
            Err(PlayCardRejection::NotEnoughMana { have: 2, need: 3 })
        );
        assert_eq!(pool.mana(), 2);
        pool.spend(2, 0).unwrap();
        assert_eq!(pool.mana(), 0);
    }

    #[test]
    fn test_validate_placement() {
        let zone = Rect::new(0.0, 0.0, 18.0, 11.0);
        assert!(validate_placement(4, 20, &[zone]).is_ok());
        assert_eq!(
            validate_placement(-1, 20, &[]),
            Err(PlayCardRejection::OutOfBounds { x: -1, y: 20 })
        );
        assert_eq!(validate_placement(9, 15, &[]), Err(PlayCardRejection::Water { x: 9, y: 15 }));
        assert_eq!(
            validate_placement(9, 5, &[zone]),
            Err(PlayCardRejection::InfluenceZone { x: 9, y: 5 })
        );
        // Bridge tiles are fine
        assert!(validate_placement(3, 15, &[]).is_ok());
    }
}
