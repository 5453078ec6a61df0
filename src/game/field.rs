//! Playing field: tile grid, river, tower layout, influence zones and the
//! two navigation meshes (ground and air).

use std::collections::BTreeMap;

use tracing::debug;

use super::geometry::{circle_rect_mtv, Rect, Vec2};
use super::navmesh::NavMesh;
use crate::ws::protocol::EntityKind;

pub const FIELD_WIDTH: usize = 18;
pub const FIELD_HEIGHT: usize = 32;
pub const MID_X: f32 = FIELD_WIDTH as f32 / 2.0;
pub const MID_Y: f32 = FIELD_HEIGHT as f32 / 2.0;

pub const LEFT_LANE: f32 = 3.5;
pub const RIGHT_LANE: f32 = 14.5;

/// Corridor clearance kept away from portal ends
pub const NAV_CLEARANCE: f32 = 0.4;

/// River tiles, two rows across the middle minus the bridges
pub const WATER: [Rect; 3] = [
    Rect::new(0.0, 15.0, 2.0, 17.0),
    Rect::new(5.0, 15.0, 13.0, 17.0),
    Rect::new(16.0, 15.0, 18.0, 17.0),
];

/// Small tower influence depth, back edge to the river bank
const SMALL_TOWER_ZONE_ROWS: f32 = 15.0;
const BIG_TOWER_ZONE_ROWS: f32 = 11.0;

/// Tower positions for the bottom (unflipped) player
const TOWERS: [(EntityKind, Vec2); 3] = [
    (EntityKind::SmallTower, Vec2::new(LEFT_LANE, 26.5)),
    (EntityKind::SmallTower, Vec2::new(RIGHT_LANE, 26.5)),
    (EntityKind::BigTower, Vec2::new(MID_X, 29.0)),
];

/// Mirror a point through the field centre
pub fn mirror(p: Vec2) -> Vec2 {
    Vec2::new(FIELD_WIDTH as f32 - p.x, FIELD_HEIGHT as f32 - p.y)
}

/// Starting towers for one side
pub fn tower_layout(is_flipped: bool) -> [(EntityKind, Vec2); 3] {
    TOWERS.map(|(kind, pos)| (kind, if is_flipped { mirror(pos) } else { pos }))
}

pub fn tile_in_bounds(x: i32, y: i32) -> bool {
    x >= 0 && y >= 0 && (x as usize) < FIELD_WIDTH && (y as usize) < FIELD_HEIGHT
}

pub fn is_water_tile(x: i32, y: i32) -> bool {
    let center = tile_center(x, y);
    WATER.iter().any(|w| w.contains(center))
}

pub fn tile_center(x: i32, y: i32) -> Vec2 {
    Vec2::new(x as f32 + 0.5, y as f32 + 0.5)
}

/// Tile containing a point
pub fn tile_at(p: Vec2) -> (i32, i32) {
    (p.x.floor() as i32, p.y.floor() as i32)
}

/// Area in which the owner's opponent may not place units while this
/// building stands. `None` for units.
pub fn influence_zone(kind: EntityKind, position: Vec2, owner_flipped: bool) -> Option<Rect> {
    let (x0, x1, rows) = match kind {
        EntityKind::SmallTower if position.x < MID_X => (0.0, MID_X, SMALL_TOWER_ZONE_ROWS),
        EntityKind::SmallTower => (MID_X, FIELD_WIDTH as f32, SMALL_TOWER_ZONE_ROWS),
        EntityKind::BigTower => (0.0, FIELD_WIDTH as f32, BIG_TOWER_ZONE_ROWS),
        _ => return None,
    };
    let h = FIELD_HEIGHT as f32;
    Some(if owner_flipped {
        Rect::new(x0, 0.0, x1, rows)
    } else {
        Rect::new(x0, h - rows, x1, h)
    })
}

/// Field with live obstacles and the meshes derived from them
#[derive(Debug, Clone)]
pub struct Field {
    buildings: BTreeMap<u32, Rect>,
    ground: NavMesh,
    air: NavMesh,
}

impl Default for Field {
    fn default() -> Self {
        Self::new()
    }
}

impl Field {
    pub fn new() -> Self {
        let buildings = BTreeMap::new();
        let (ground, air) = build_meshes(&buildings);
        Self {
            buildings,
            ground,
            air,
        }
    }

    pub fn buildings(&self) -> impl Iterator<Item = (&u32, &Rect)> {
        self.buildings.iter()
    }

    pub fn add_building(&mut self, id: u32, bounds: Rect) {
        self.buildings.insert(id, bounds);
        self.rebuild();
    }

    /// Deregister a building, returns false if it was not registered
    pub fn remove_building(&mut self, id: u32) -> bool {
        if self.buildings.remove(&id).is_none() {
            return false;
        }
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        let (ground, air) = build_meshes(&self.buildings);
        debug!(
            buildings = self.buildings.len(),
            ground_cells = ground.cells().len(),
            air_cells = air.cells().len(),
            "Rebuilt field meshes"
        );
        self.ground = ground;
        self.air = air;
    }

    pub fn mesh(&self, is_flying: bool) -> &NavMesh {
        if is_flying {
            &self.air
        } else {
            &self.ground
        }
    }

    pub fn find_path(&self, from: Vec2, to: Vec2, is_flying: bool) -> Option<Vec<Vec2>> {
        self.mesh(is_flying).find_path(from, to)
    }

    /// Move a circle out of water (ground units only), buildings and the
    /// field border.
    pub fn push_out(&self, center: Vec2, radius: f32, is_flying: bool) -> Vec2 {
        let mut p = center;
        if !is_flying {
            for water in &WATER {
                if let Some(mtv) = circle_rect_mtv(p, radius, water) {
                    p += mtv;
                }
            }
        }
        for rect in self.buildings.values() {
            if let Some(mtv) = circle_rect_mtv(p, radius, rect) {
                p += mtv;
            }
        }
        Vec2::new(
            p.x.clamp(radius, FIELD_WIDTH as f32 - radius),
            p.y.clamp(radius, FIELD_HEIGHT as f32 - radius),
        )
    }
}

fn build_meshes(buildings: &BTreeMap<u32, Rect>) -> (NavMesh, NavMesh) {
    let blocked = |x: usize, y: usize| {
        let c = tile_center(x as i32, y as i32);
        buildings.values().any(|b| b.contains(c))
    };
    let ground = NavMesh::from_grid(FIELD_WIDTH, FIELD_HEIGHT, NAV_CLEARANCE, |x, y| {
        !blocked(x, y) && !is_water_tile(x as i32, y as i32)
    });
    let air = NavMesh::from_grid(FIELD_WIDTH, FIELD_HEIGHT, NAV_CLEARANCE, |x, y| !blocked(x, y));
    (ground, air)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_river_and_bridges() {
        assert!(is_water_tile(0, 15));
        assert!(is_water_tile(9, 16));
        assert!(is_water_tile(17, 16));
        assert!(!is_water_tile(2, 15));
        assert!(!is_water_tile(4, 16));
        assert!(!is_water_tile(13, 15));
        assert!(!is_water_tile(9, 14));
        assert!(!is_water_tile(9, 17));
    }

    #[test]
    fn test_tower_layout_is_mirrored() {
        let bottom = tower_layout(false);
        let top = tower_layout(true);
        assert_eq!(bottom[2].1, Vec2::new(9.0, 29.0));
        assert_eq!(top[2].1, Vec2::new(9.0, 3.0));
        assert_eq!(top[0].1, Vec2::new(14.5, 5.5));
    }

    #[test]
    fn test_ground_path_crosses_on_bridge() {
        let field = Field::new();
        let path = field
            .find_path(Vec2::new(9.0, 24.0), Vec2::new(9.0, 8.0), false)
            .unwrap();
        // Every point in the river rows sits on a bridge
        for p in &path {
            if (15.0..17.0).contains(&p.y) {
                assert!((2.0..=5.0).contains(&p.x) || (13.0..=16.0).contains(&p.x), "{p:?}");
            }
        }
        assert!(path.iter().any(|p| (15.0..=17.0).contains(&p.y)));

        let ground_len: f32 = path.windows(2).map(|w| w[0].distance(w[1])).sum();
        let air = field.find_path(Vec2::new(9.0, 24.0), Vec2::new(9.0, 8.0), true).unwrap();
        let air_len: f32 = air.windows(2).map(|w| w[0].distance(w[1])).sum();
        assert!(air_len < 16.5);
        assert!(air_len < ground_len);
    }

    #[test]
    fn test_buildings_block_meshes_until_removed() {
        let mut field = Field::new();
        let rect = Rect::centered(Vec2::new(9.0, 29.0), 4.0);
        field.add_building(1, rect);
        assert!(field.mesh(true).locate(Vec2::new(9.0, 29.0)).is_none());

        assert!(field.remove_building(1));
        assert!(!field.remove_building(1));
        assert!(field.mesh(true).locate(Vec2::new(9.0, 29.0)).is_some());
    }

    #[test]
    fn test_push_out_of_water_only_for_ground() {
        let field = Field::new();
        let in_river = Vec2::new(9.0, 15.3);
        let ground = field.push_out(in_river, 0.4, false);
        assert!((ground.y - 14.6).abs() < 1e-4);
        assert_eq!(field.push_out(in_river, 0.4, true), in_river);
    }

    #[test]
    fn test_push_out_of_buildings_for_ground_and_air() {
        let mut field = Field::new();
        field.add_building(1, Rect::new(2.0, 25.0, 5.0, 28.0));

        let inside = Vec2::new(4.5, 26.5);
        for is_flying in [false, true] {
            let p = field.push_out(inside, 0.4, is_flying);
            assert!((p.x - 5.4).abs() < 1e-4, "{p:?}");
            assert!((p.y - 26.5).abs() < 1e-4);
        }

        let grazing = field.push_out(Vec2::new(5.2, 26.5), 0.4, false);
        assert!((grazing.x - 5.4).abs() < 1e-4);
        let clear = Vec2::new(6.0, 26.5);
        assert_eq!(field.push_out(clear, 0.4, false), clear);
    }

    #[test]
    fn test_influence_zones() {
        let zone = influence_zone(EntityKind::SmallTower, Vec2::new(3.5, 26.5), false).unwrap();
        assert_eq!(zone, Rect::new(0.0, 17.0, 9.0, 32.0));
        let zone = influence_zone(EntityKind::BigTower, Vec2::new(9.0, 3.0), true).unwrap();
        assert_eq!(zone, Rect::new(0.0, 0.0, 18.0, 11.0));
        assert!(influence_zone(EntityKind::Flying, Vec2::new(3.0, 3.0), true).is_none());
    }
}
