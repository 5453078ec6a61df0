//! Entity simulation: targeting, attacks, movement and collision for one match

use std::collections::BTreeMap;

use tracing::{error, trace};
use uuid::Uuid;

use super::combat::{CombatSystem, UnitStats};
use super::field::{influence_zone, Field, FIELD_HEIGHT, LEFT_LANE, MID_X, MID_Y, RIGHT_LANE};
use super::geometry::{Footprint, Rect, Vec2};
use super::physics::{Body, PhysicsSystem};
use crate::util::time::TICKS_1S;
use crate::ws::protocol::{EntityKind, EntityState, EntityView};

pub type EntityId = u32;

/// Simulated entity
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub owner: Uuid,
    /// Orientation of the owner, decides which way "forward" is
    pub owner_flipped: bool,
    pub kind: EntityKind,
    pub stats: UnitStats,
    pub position: Vec2,
    pub hp: i32,
    pub state: EntityState,
    /// Tick the current activity ends on
    pub next_state_at: u64,
    pub target: Option<EntityId>,
    pub path: Vec<Vec2>,
    pub path_index: usize,
}

impl Entity {
    pub fn is_building(&self) -> bool {
        self.stats.is_building()
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// Footprint rectangle for buildings
    pub fn bounds(&self) -> Option<Rect> {
        self.stats.footprint.bounds_at(self.position)
    }

    pub fn view(&self) -> EntityView {
        EntityView {
            id: self.id,
            owner: self.owner,
            kind: self.kind,
            x: self.position.x,
            y: self.position.y,
            hp: self.hp,
            state: self.state,
        }
    }
}

/// Cosmetic event for a ranged hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectileFired {
    pub attacker_id: EntityId,
    pub victim_id: EntityId,
}

/// Next activity picked for an unlocked entity
enum Plan {
    Attack(EntityId),
    Chase(EntityId, Vec2),
    Stand,
    Walk(Vec2),
}

/// All entities of a match plus the field they live on
#[derive(Debug, Clone)]
pub struct EntitySimulation {
    entities: BTreeMap<EntityId, Entity>,
    next_id: EntityId,
    field: Field,
}

impl EntitySimulation {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
            field: Field::new(),
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut Field {
        &mut self.field
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Add an entity in the `Spawning` state. Buildings are carved out of the
    /// field right away.
    pub fn spawn(&mut self, owner: Uuid, owner_flipped: bool, kind: EntityKind, position: Vec2, tick: u64) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;

        let stats = UnitStats::for_kind(kind);
        let entity = Entity {
            id,
            owner,
            owner_flipped,
            kind,
            stats,
            position,
            hp: stats.max_hp,
            state: EntityState::Spawning,
            next_state_at: tick + TICKS_1S,
            target: None,
            path: Vec::new(),
            path_index: 0,
        };
        if let Some(bounds) = entity.bounds() {
            self.field.add_building(id, bounds);
        }
        trace!(entity_id = id, ?kind, x = position.x, y = position.y, "Spawned entity");
        self.entities.insert(id, entity);
        id
    }

    /// Run one simulation tick. Returns projectile events for ranged hits.
    pub fn step(&mut self, tick: u64) -> Vec<ProjectileFired> {
        let projectiles = self.resolve_activities(tick);
        self.reevaluate(tick);
        self.move_units();
        self.collide_units();
        self.push_out_static();
        projectiles
    }

    /// Attacks whose swing ends this tick deal their damage
    fn resolve_activities(&mut self, tick: u64) -> Vec<ProjectileFired> {
        let mut projectiles = Vec::new();
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();

        for id in ids {
            let Some(attacker) = self.entities.get(&id) else {
                continue;
            };
            if tick < attacker.next_state_at || attacker.state != EntityState::Attacking {
                continue;
            }
            let Some(victim_id) = attacker.target else {
                continue;
            };
            let damage = attacker.stats.damage;
            let ranged = attacker.stats.is_ranged();

            let Some(victim) = self.entities.get_mut(&victim_id) else {
                continue;
            };
            if !victim.is_alive() {
                continue;
            }
            let (hp, killed) = CombatSystem::apply_damage(victim.hp, damage);
            victim.hp = hp;
            trace!(attacker_id = id, victim_id, damage, hp, killed, "Attack resolved");

            if ranged {
                projectiles.push(ProjectileFired {
                    attacker_id: id,
                    victim_id,
                });
            }
        }

        projectiles
    }

    /// Pick the next activity for every entity not locked in one
    fn reevaluate(&mut self, tick: u64) {
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();

        for id in ids {
            let Some(plan) = self.plan(id, tick) else {
                continue;
            };
            match plan {
                Plan::Attack(target) => {
                    if let Some(e) = self.entities.get_mut(&id) {
                        e.target = Some(target);
                        e.state = EntityState::Attacking;
                        e.next_state_at = tick + e.stats.hit_period_ticks();
                        e.path.clear();
                        e.path_index = 0;
                    }
                }
                Plan::Stand => {
                    if let Some(e) = self.entities.get_mut(&id) {
                        e.target = None;
                        e.state = EntityState::Standing;
                    }
                }
                Plan::Chase(target, goal) => self.set_path(id, Some(target), goal),
                Plan::Walk(goal) => self.set_path(id, None, goal),
            }
        }
    }

    fn plan(&self, id: EntityId, tick: u64) -> Option<Plan> {
        let entity = self.entities.get(&id)?;
        if tick < entity.next_state_at {
            return None;
        }

        // Keep the current target while it lives; buildings also let go once
        // it walks out of range
        let current = entity.target.and_then(|t| self.entities.get(&t)).filter(|t| {
            t.is_alive()
                && (!entity.is_building()
                    || CombatSystem::in_attack_range(entity.position, &entity.stats, t.position, &t.stats))
        });
        let target = match current {
            Some(t) => Some(t),
            None => self.acquire_target(entity),
        };

        let Some(target) = target else {
            if entity.is_building() {
                return Some(Plan::Stand);
            }
            return Some(Plan::Walk(self.opponent_side_goal(entity)));
        };

        if CombatSystem::in_attack_range(entity.position, &entity.stats, target.position, &target.stats) {
            return Some(Plan::Attack(target.id));
        }
        if entity.is_building() {
            return Some(Plan::Stand);
        }
        let goal = match target.bounds() {
            Some(bounds) => CombatSystem::approach_point(entity.position, &bounds),
            None => target.position,
        };
        Some(Plan::Chase(target.id, goal))
    }

    /// Nearest valid enemy within scan range
    fn acquire_target(&self, entity: &Entity) -> Option<&Entity> {
        let range = entity.stats.scan_range();
        let range_sq = range * range;
        let mut best: Option<(&Entity, f32)> = None;

        for other in self.entities.values() {
            if other.owner == entity.owner
                || other.state == EntityState::Spawning
                || !other.is_alive()
                || !CombatSystem::can_target(&entity.stats, &other.stats)
            {
                continue;
            }
            let dist_sq = entity.position.distance_sq(other.position);
            if dist_sq <= range_sq && best.map_or(true, |(_, d)| dist_sq < d) {
                best = Some((other, dist_sq));
            }
        }

        best.map(|(e, _)| e)
    }

    /// Default walking goal: own bridge first, then the enemy lane tower,
    /// then the big tower
    fn opponent_side_goal(&self, entity: &Entity) -> Vec2 {
        let pos = entity.position;
        let flipped = entity.owner_flipped;
        let left_half = pos.x < MID_X;
        let height = FIELD_HEIGHT as f32;

        let mut goal = Vec2::new(if left_half { LEFT_LANE } else { RIGHT_LANE }, 0.0);

        let on_own_side = if flipped { pos.y < MID_Y } else { pos.y > MID_Y };
        if !entity.stats.is_flying && on_own_side {
            goal.y = MID_Y + if flipped { 1.0 } else { -1.0 };
            return goal;
        }

        let lane_tower_stands = self.entities.values().any(|e| {
            e.kind == EntityKind::SmallTower && e.owner != entity.owner && (e.position.x < MID_X) == left_half
        });
        let depth = if lane_tower_stands { 7.0 } else { 3.0 };
        goal.y = if flipped { height - depth } else { depth };

        let near_back = if flipped { pos.y > height - 4.0 } else { pos.y < 4.0 };
        if !lane_tower_stands && near_back {
            goal.x = if left_half { LEFT_LANE + 3.5 } else { RIGHT_LANE - 3.5 };
        }
        goal
    }

    fn set_path(&mut self, id: EntityId, target: Option<EntityId>, goal: Vec2) {
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        let path = self.field.find_path(entity.position, goal, entity.stats.is_flying);

        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        match path {
            Some(path) => {
                entity.target = target;
                entity.state = EntityState::Moving;
                entity.path = path;
                entity.path_index = 1;
            }
            None => {
                if entity.state != EntityState::Idle {
                    error!(
                        entity_id = id,
                        kind = ?entity.kind,
                        x = entity.position.x,
                        y = entity.position.y,
                        goal_x = goal.x,
                        goal_y = goal.y,
                        "No path for mobile unit, falling back to idle"
                    );
                }
                #[cfg(feature = "strict-invariants")]
                panic!("entity {id} has no path to ({}, {})", goal.x, goal.y);

                #[cfg(not(feature = "strict-invariants"))]
                {
                    entity.target = None;
                    entity.state = EntityState::Idle;
                    entity.path.clear();
                    entity.path_index = 0;
                }
            }
        }
    }

    fn move_units(&mut self) {
        for entity in self.entities.values_mut() {
            if entity.state != EntityState::Moving || entity.stats.walk_speed <= 0.0 {
                continue;
            }
            let (position, index) =
                PhysicsSystem::follow_path(entity.position, &entity.path, entity.path_index, entity.stats.walk_speed);
            entity.position = position;
            entity.path_index = index;
        }
    }

    /// Pairwise push-out between units of the same flight class, in id order
    fn collide_units(&mut self) {
        let mut units: Vec<(EntityId, Body, bool)> = self
            .entities
            .values()
            .filter_map(|e| {
                let radius = e.stats.footprint.radius()?;
                Some((
                    e.id,
                    Body {
                        position: e.position,
                        radius,
                        walk_speed: e.stats.walk_speed,
                    },
                    e.stats.is_flying,
                ))
            })
            .collect();

        for i in 0..units.len() {
            for j in (i + 1)..units.len() {
                if units[i].2 != units[j].2 {
                    continue;
                }
                if let Some((da, db)) = PhysicsSystem::separate(&units[i].1, &units[j].1) {
                    units[i].1.position += da;
                    units[j].1.position += db;
                }
            }
        }

        for (id, body, _) in units {
            if let Some(e) = self.entities.get_mut(&id) {
                e.position = body.position;
            }
        }
    }

    fn push_out_static(&mut self) {
        let field = &self.field;
        for entity in self.entities.values_mut() {
            if let Footprint::Circle { radius } = entity.stats.footprint {
                entity.position = field.push_out(entity.position, radius, entity.stats.is_flying);
            }
        }
    }

    /// Drop every entity with hp <= 0, deregistering buildings from the field.
    /// Returns the removed entities.
    pub fn remove_dead(&mut self) -> Vec<Entity> {
        let dead: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| !e.is_alive())
            .map(|e| e.id)
            .collect();

        let mut removed = Vec::with_capacity(dead.len());
        for id in dead {
            if let Some(entity) = self.entities.remove(&id) {
                if entity.is_building() {
                    self.field.remove_building(id);
                }
                removed.push(entity);
            }
        }
        removed
    }

    /// Freeze everything once the match is decided
    pub fn set_all_idle(&mut self) {
        for entity in self.entities.values_mut() {
            entity.state = EntityState::Idle;
            entity.target = None;
            entity.path.clear();
            entity.path_index = 0;
        }
    }

    /// Standing towers of one player
    pub fn towers_of(&self, owner: Uuid) -> impl Iterator<Item = &Entity> {
        self.entities
            .values()
            .filter(move |e| e.owner == owner && e.is_building())
    }

    /// Placement-blocking zones of every building not owned by `player`
    pub fn enemy_influence_zones(&self, player: Uuid) -> Vec<Rect> {
        self.entities
            .values()
            .filter(|e| e.owner != player)
            .filter_map(|e| influence_zone(e.kind, e.position, e.owner_flipped))
            .collect()
    }
}

impl Default for EntitySimulation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(sim: &mut EntitySimulation, id: EntityId) {
        if let Some(e) = sim.get_mut(id) {
            e.state = EntityState::Standing;
            e.next_state_at = 0;
        }
    }

    #[test]
    fn test_spawned_units_wait_one_second() {
        let mut sim = EntitySimulation::new();
        let id = sim.spawn(Uuid::new_v4(), false, EntityKind::MeleeFighter, Vec2::new(3.5, 25.5), 0);
        for tick in 1..TICKS_1S {
            sim.step(tick);
            assert_eq!(sim.get(id).unwrap().state, EntityState::Spawning);
        }
        sim.step(TICKS_1S);
        assert_eq!(sim.get(id).unwrap().state, EntityState::Moving);
    }

    #[test]
    fn test_idle_unit_heads_for_bridge() {
        let mut sim = EntitySimulation::new();
        let id = sim.spawn(Uuid::new_v4(), false, EntityKind::MeleeFighter, Vec2::new(3.5, 25.5), 0);
        sim.step(TICKS_1S);

        let e = sim.get(id).unwrap();
        assert_eq!(e.state, EntityState::Moving);
        let goal = *e.path.last().unwrap();
        assert!((goal.x - LEFT_LANE).abs() < 1e-3);
        assert!((goal.y - 15.0).abs() < 1e-3);
        assert!(e.position.y < 25.5);
    }

    #[test]
    fn test_melee_units_fight() {
        let mut sim = EntitySimulation::new();
        let a = sim.spawn(Uuid::new_v4(), false, EntityKind::MeleeFighter, Vec2::new(9.0, 20.0), 0);
        let b = sim.spawn(Uuid::new_v4(), true, EntityKind::MeleeFighter, Vec2::new(9.0, 21.2), 0);
        ready(&mut sim, a);
        ready(&mut sim, b);

        sim.step(1);
        assert_eq!(sim.get(a).unwrap().state, EntityState::Attacking);
        assert_eq!(sim.get(a).unwrap().target, Some(b));
        assert_eq!(sim.get(a).unwrap().next_state_at, 1 + TICKS_1S);

        for tick in 2..=(1 + TICKS_1S) {
            sim.step(tick);
        }
        assert_eq!(sim.get(b).unwrap().hp, 900);
        assert_eq!(sim.get(a).unwrap().hp, 900);
    }

    #[test]
    fn test_melee_ignores_flying() {
        let mut sim = EntitySimulation::new();
        let a = sim.spawn(Uuid::new_v4(), false, EntityKind::MeleeFighter, Vec2::new(9.0, 22.0), 0);
        let f = sim.spawn(Uuid::new_v4(), true, EntityKind::Flying, Vec2::new(9.0, 23.0), 0);
        ready(&mut sim, a);
        ready(&mut sim, f);

        sim.step(1);
        assert_eq!(sim.get(a).unwrap().target, None);
        assert_eq!(sim.get(a).unwrap().state, EntityState::Moving);
        // The flyer can hit back
        assert_eq!(sim.get(f).unwrap().target, Some(a));
    }

    #[test]
    fn test_ranged_hit_emits_projectile() {
        let mut sim = EntitySimulation::new();
        let r = sim.spawn(Uuid::new_v4(), false, EntityKind::RangedFighter, Vec2::new(9.0, 20.0), 0);
        let m = sim.spawn(Uuid::new_v4(), true, EntityKind::MeleeFighter, Vec2::new(9.0, 24.0), 0);
        ready(&mut sim, r);
        if let Some(e) = sim.get_mut(m) {
            // Keep the victim in place
            e.state = EntityState::Idle;
            e.next_state_at = u64::MAX;
        }

        sim.step(1);
        assert_eq!(sim.get(r).unwrap().state, EntityState::Attacking);
        let period = sim.get(r).unwrap().stats.hit_period_ticks();

        let mut events = Vec::new();
        for tick in 2..=(1 + period) {
            events.extend(sim.step(tick));
        }
        assert_eq!(
            events,
            vec![ProjectileFired {
                attacker_id: r,
                victim_id: m
            }]
        );
        assert_eq!(sim.get(m).unwrap().hp, 1000 - 75);
    }

    #[test]
    fn test_tower_stands_without_targets() {
        let mut sim = EntitySimulation::new();
        let t = sim.spawn(Uuid::new_v4(), false, EntityKind::SmallTower, Vec2::new(3.5, 26.5), 0);
        sim.step(TICKS_1S);
        assert_eq!(sim.get(t).unwrap().state, EntityState::Standing);
        assert_eq!(sim.get(t).unwrap().position, Vec2::new(3.5, 26.5));
    }

    #[test]
    fn test_remove_dead_deregisters_building() {
        let mut sim = EntitySimulation::new();
        let owner = Uuid::new_v4();
        let t = sim.spawn(owner, false, EntityKind::BigTower, Vec2::new(9.0, 29.0), 0);
        assert_eq!(sim.field().buildings().count(), 1);

        sim.get_mut(t).unwrap().hp = 0;
        let removed = sim.remove_dead();
        assert_eq!(removed.len(), 1);
        assert!(sim.get(t).is_none());
        assert_eq!(sim.field().buildings().count(), 0);
        assert_eq!(sim.towers_of(owner).count(), 0);
    }

    #[test]
    fn test_enemy_influence_zones() {
        let mut sim = EntitySimulation::new();
        let me = Uuid::new_v4();
        let them = Uuid::new_v4();
        sim.spawn(them, true, EntityKind::SmallTower, Vec2::new(14.5, 5.5), 0);
        sim.spawn(me, false, EntityKind::SmallTower, Vec2::new(3.5, 26.5), 0);

        let zones = sim.enemy_influence_zones(me);
        assert_eq!(zones, vec![Rect::new(9.0, 0.0, 18.0, 15.0)]);
    }

    #[test]
    fn test_overlapping_flyer_and_ground_unit_are_not_separated() {
        let mut sim = EntitySimulation::new();
        let owner = Uuid::new_v4();
        let spot = Vec2::new(9.0, 22.0);
        let melee = sim.spawn(owner, false, EntityKind::MeleeFighter, spot, 0);
        let flyer = sim.spawn(owner, false, EntityKind::Flying, spot, 0);
        let other = Vec2::new(12.0, 22.0);
        let g1 = sim.spawn(owner, false, EntityKind::MeleeFighter, other, 0);
        let g2 = sim.spawn(owner, false, EntityKind::RangedFighter, other, 0);

        sim.step(1);
        assert_eq!(sim.get(melee).unwrap().position, spot);
        assert_eq!(sim.get(flyer).unwrap().position, spot);
        // Same flight class does get pushed apart
        let d = sim.get(g1).unwrap().position.distance(sim.get(g2).unwrap().position);
        assert!(d > 0.0);
    }

    #[test]
    fn test_unit_spawned_on_tower_is_pushed_out() {
        let mut sim = EntitySimulation::new();
        let owner = Uuid::new_v4();
        sim.spawn(owner, false, EntityKind::SmallTower, Vec2::new(3.5, 26.5), 0);
        let unit = sim.spawn(owner, false, EntityKind::MeleeFighter, Vec2::new(4.5, 26.5), 0);

        sim.step(1);
        let e = sim.get(unit).unwrap();
        assert_eq!(e.state, EntityState::Spawning);
        // Nearest face of the 2..5 x 25..28 footprint is x = 5
        assert!((e.position.x - 5.6).abs() < 1e-4);
        assert!((e.position.y - 26.5).abs() < 1e-4);
    }

    #[cfg(not(feature = "strict-invariants"))]
    #[test]
    fn test_unreachable_goal_falls_back_to_idle() {
        let mut sim = EntitySimulation::new();
        // Block both bridges
        sim.field_mut().add_building(1000, Rect::new(2.0, 15.0, 5.0, 17.0));
        sim.field_mut().add_building(1001, Rect::new(13.0, 15.0, 16.0, 17.0));

        let id = sim.spawn(Uuid::new_v4(), false, EntityKind::MeleeFighter, Vec2::new(3.5, 25.5), 0);
        sim.step(TICKS_1S);

        let e = sim.get(id).unwrap();
        assert_eq!(e.state, EntityState::Idle);
        assert!(e.path.is_empty());
    }
}
