//! Combat system - unit stats, targeting rules, damage

use super::geometry::{Footprint, Rect, Vec2};
use crate::util::time::secs_to_ticks;
use crate::ws::protocol::EntityKind;

/// How far units look for targets, in tiles
pub const VIEW_RANGE: f32 = 6.5;

/// Attackers with a longer range count as ranged
pub const RANGED_RANGE: f32 = 4.0;

/// Combat stats per entity kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitStats {
    pub max_hp: i32,
    /// Damage per hit
    pub damage: i32,
    /// Attack range in tiles
    pub range: f32,
    /// Seconds between hits
    pub hit_period: f32,
    /// Walk speed in tiles per second (zero for buildings)
    pub walk_speed: f32,
    pub is_flying: bool,
    pub footprint: Footprint,
}

impl UnitStats {
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::BigTower => Self {
                max_hp: 15000,
                damage: 500,
                range: 8.0,
                hit_period: 4.0,
                walk_speed: 0.0,
                is_flying: false,
                footprint: Footprint::Square { size: 4.0 },
            },
            EntityKind::SmallTower => Self {
                max_hp: 10000,
                damage: 300,
                range: 6.0,
                hit_period: 2.0,
                walk_speed: 0.0,
                is_flying: false,
                footprint: Footprint::Square { size: 3.0 },
            },
            EntityKind::MeleeFighter => Self {
                max_hp: 1000,
                damage: 100,
                range: 1.5,
                hit_period: 1.0,
                walk_speed: 2.0,
                is_flying: false,
                footprint: Footprint::Circle { radius: 0.6 },
            },
            EntityKind::RangedFighter => Self {
                max_hp: 750,
                damage: 75,
                range: 6.0,
                hit_period: 1.2,
                walk_speed: 2.25,
                is_flying: false,
                footprint: Footprint::Circle { radius: 0.4 },
            },
            EntityKind::Flying => Self {
                max_hp: 600,
                damage: 50,
                range: 1.5,
                hit_period: 0.7,
                walk_speed: 2.6,
                is_flying: true,
                footprint: Footprint::Circle { radius: 0.4 },
            },
        }
    }

    pub fn is_building(&self) -> bool {
        matches!(self.footprint, Footprint::Square { .. })
    }

    pub fn is_ranged(&self) -> bool {
        self.range > RANGED_RANGE
    }

    /// Radius used when looking for targets
    pub fn scan_range(&self) -> f32 {
        if self.is_building() {
            self.range
        } else {
            self.range.max(VIEW_RANGE)
        }
    }

    /// Ticks between two hits
    pub fn hit_period_ticks(&self) -> u64 {
        secs_to_ticks(self.hit_period)
    }
}

/// Combat system for targeting and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Flying victims can only be hit by flying or ranged attackers
    pub fn can_target(attacker: &UnitStats, victim: &UnitStats) -> bool {
        !victim.is_flying || attacker.is_flying || attacker.is_ranged()
    }

    /// Point of the victim the attacker measures its range to.
    ///
    /// Units are measured centre to centre, buildings to the closest point
    /// of their footprint.
    pub fn aim_point(attacker_pos: Vec2, victim_pos: Vec2, victim: &UnitStats) -> Vec2 {
        match victim.footprint.bounds_at(victim_pos) {
            Some(bounds) => bounds.clamp(attacker_pos),
            None => victim_pos,
        }
    }

    pub fn in_attack_range(attacker_pos: Vec2, attacker: &UnitStats, victim_pos: Vec2, victim: &UnitStats) -> bool {
        let aim = Self::aim_point(attacker_pos, victim_pos, victim);
        attacker_pos.distance_sq(aim) <= attacker.range * attacker.range
    }

    /// Where a mover should walk to reach a building: the footprint edge
    /// facing it, half a tile outside.
    pub fn approach_point(mover_pos: Vec2, bounds: &Rect) -> Vec2 {
        let (edge, normal) = bounds.edge_point_towards(mover_pos);
        edge + normal * 0.5
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_hp: i32, damage: i32) -> (i32, bool) {
        let hp = current_hp - damage;
        (hp, hp <= 0)
    }
}
