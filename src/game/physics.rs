//! Unit movement and collision response

use super::field::MID_X;
use super::geometry::{circle_circle, Vec2};
use crate::util::time::tick_delta;

/// A waypoint counts as reached within this distance
pub const WAYPOINT_EPSILON: f32 = 0.2;

/// Contact normals with a smaller horizontal part count as vertical
const VERTICAL_NORMAL_EPSILON: f32 = 0.001;

/// Tie-break rotation for vertical contact normals, in radians
const TIE_BREAK_ANGLE: f32 = 0.1;

/// Collision body of a mobile unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vec2,
    pub radius: f32,
    pub walk_speed: f32,
}

/// Physics system for path following and unit separation
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Step towards `path[index]` at `speed` tiles per second.
    ///
    /// Never moves past the waypoint. Returns the new position and the
    /// (possibly advanced) waypoint index; an index equal to the path length
    /// means the path is finished.
    pub fn follow_path(position: Vec2, path: &[Vec2], index: usize, speed: f32) -> (Vec2, usize) {
        let Some(&waypoint) = path.get(index) else {
            return (position, index);
        };
        let step = speed * tick_delta();
        let to_waypoint = waypoint - position;
        let dist = to_waypoint.length();

        let new_position = if dist <= step {
            waypoint
        } else {
            position + to_waypoint * (step / dist)
        };

        if new_position.distance(waypoint) < WAYPOINT_EPSILON {
            (new_position, index + 1)
        } else {
            (new_position, index)
        }
    }

    /// Push two overlapping units apart.
    ///
    /// Each side moves by its share of the overlap (the larger unit yields
    /// less), capped at half its per-tick walk distance. Returns the
    /// displacement of each body, or `None` if they do not touch.
    pub fn separate(a: &Body, b: &Body) -> Option<(Vec2, Vec2)> {
        let contact = circle_circle(a.position, a.radius, b.position, b.radius)?;
        let mut normal = contact.normal;

        // Stacked on the same column: lean towards the field centre
        if normal.x.abs() < VERTICAL_NORMAL_EPSILON {
            let mut angle = if a.position.x < MID_X {
                TIE_BREAK_ANGLE
            } else {
                -TIE_BREAK_ANGLE
            };
            if normal.y < 0.0 {
                angle = -angle;
            }
            normal = normal.rotate(angle);
        }

        let sum = a.radius + b.radius;
        let share_a = b.radius / sum;
        let share_b = a.radius / sum;
        let dt = tick_delta();

        let push_a = (share_a * contact.overlap).min(a.walk_speed / 2.0 * dt);
        let push_b = (share_b * contact.overlap).min(b.walk_speed / 2.0 * dt);

        Some((-normal * push_a, normal * push_b))
    }
}
