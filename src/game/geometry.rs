//! 2D geometry in tile units: vectors, axis-aligned rectangles, footprints
//! and the overlap tests used by collision and pathfinding.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// 2D vector in tile units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    pub fn distance_sq(self, other: Self) -> f32 {
        (other - self).length_sq()
    }

    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    /// Unit vector, or zero for a zero-length input
    pub fn normalize_or_zero(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            Self::new(self.x / len, self.y / len)
        } else {
            Self::ZERO
        }
    }

    /// 2D cross product (z of the 3D cross)
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    pub fn rotate(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min: Vec2::new(min_x, min_y),
            max: Vec2::new(max_x, max_y),
        }
    }

    /// Square of side `size` centred on `center`
    pub fn centered(center: Vec2, size: f32) -> Self {
        let half = size / 2.0;
        Self::new(center.x - half, center.y - half, center.x + half, center.y + half)
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new((self.min.x + self.max.x) / 2.0, (self.min.y + self.max.y) / 2.0)
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Closest point inside the rectangle
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        Vec2::new(p.x.clamp(self.min.x, self.max.x), p.y.clamp(self.min.y, self.max.y))
    }

    pub fn distance_sq_to(&self, p: Vec2) -> f32 {
        self.clamp(p).distance_sq(p)
    }

    /// Point on the boundary hit by a ray from the centre towards `toward`,
    /// together with the outward normal of the face it hits.
    pub fn edge_point_towards(&self, toward: Vec2) -> (Vec2, Vec2) {
        let c = self.center();
        let d = toward - c;
        let half_w = self.width() / 2.0;
        let half_h = self.height() / 2.0;
        if d.x == 0.0 && d.y == 0.0 {
            return (Vec2::new(c.x, self.max.y), Vec2::new(0.0, 1.0));
        }
        let tx = if d.x != 0.0 { half_w / d.x.abs() } else { f32::INFINITY };
        let ty = if d.y != 0.0 { half_h / d.y.abs() } else { f32::INFINITY };
        if tx <= ty {
            (c + d * tx, Vec2::new(d.x.signum(), 0.0))
        } else {
            (c + d * ty, Vec2::new(0.0, d.y.signum()))
        }
    }
}

/// Collision shape of an entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Footprint {
    /// Mobile units
    Circle { radius: f32 },
    /// Buildings, axis-aligned square of side `size`
    Square { size: f32 },
}

impl Footprint {
    /// World-space rectangle for square footprints
    pub fn bounds_at(&self, center: Vec2) -> Option<Rect> {
        match *self {
            Footprint::Square { size } => Some(Rect::centered(center, size)),
            Footprint::Circle { .. } => None,
        }
    }

    pub fn radius(&self) -> Option<f32> {
        match *self {
            Footprint::Circle { radius } => Some(radius),
            Footprint::Square { .. } => None,
        }
    }
}

/// Circle-circle contact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Unit normal pointing from the first circle towards the second
    pub normal: Vec2,
    /// Penetration depth
    pub overlap: f32,
}

/// Overlap test between two circles.
///
/// Exactly coincident centres report the normal (0, 1) so callers always get
/// a usable separation axis.
pub fn circle_circle(a: Vec2, ra: f32, b: Vec2, rb: f32) -> Option<Contact> {
    let diff = b - a;
    let sum = ra + rb;
    let dist_sq = diff.length_sq();
    if dist_sq >= sum * sum {
        return None;
    }
    let dist = dist_sq.sqrt();
    let normal = if dist > 0.0 {
        diff * (1.0 / dist)
    } else {
        Vec2::new(0.0, 1.0)
    };
    Some(Contact {
        normal,
        overlap: sum - dist,
    })
}

/// Minimum translation moving a circle out of a rectangle, if they overlap
pub fn circle_rect_mtv(center: Vec2, radius: f32, rect: &Rect) -> Option<Vec2> {
    let closest = rect.clamp(center);
    let diff = center - closest;
    let dist_sq = diff.length_sq();

    if dist_sq > 0.0 {
        if dist_sq >= radius * radius {
            return None;
        }
        let dist = dist_sq.sqrt();
        return Some(diff * ((radius - dist) / dist));
    }

    // Centre inside: leave through the nearest face
    let to_left = center.x - rect.min.x;
    let to_right = rect.max.x - center.x;
    let to_top = center.y - rect.min.y;
    let to_bottom = rect.max.y - center.y;
    let min = to_left.min(to_right).min(to_top).min(to_bottom);
    let push = if min == to_left {
        Vec2::new(-(to_left + radius), 0.0)
    } else if min == to_right {
        Vec2::new(to_right + radius, 0.0)
    } else if min == to_top {
        Vec2::new(0.0, -(to_top + radius))
    } else {
        Vec2::new(0.0, to_bottom + radius)
    };
    Some(push)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_circle_circle_overlap() {
        let contact = circle_circle(Vec2::new(0.0, 0.0), 0.6, Vec2::new(1.0, 0.0), 0.6).unwrap();
        assert!(approx(contact.overlap, 0.2));
        assert_eq!(contact.normal, Vec2::new(1.0, 0.0));

        assert!(circle_circle(Vec2::new(0.0, 0.0), 0.5, Vec2::new(2.0, 0.0), 0.5).is_none());
    }

    #[test]
    fn test_coincident_circles_get_vertical_normal() {
        let p = Vec2::new(4.0, 4.0);
        let contact = circle_circle(p, 0.6, p, 0.4).unwrap();
        assert_eq!(contact.normal, Vec2::new(0.0, 1.0));
        assert!(approx(contact.overlap, 1.0));
    }

    #[test]
    fn test_circle_rect_outside_corner() {
        let rect = Rect::new(0.0, 0.0, 2.0, 2.0);
        let push = circle_rect_mtv(Vec2::new(2.3, 1.0), 0.5, &rect).unwrap();
        assert!(approx(push.x, 0.2));
        assert!(approx(push.y, 0.0));
        assert!(circle_rect_mtv(Vec2::new(3.0, 1.0), 0.5, &rect).is_none());
    }

    #[test]
    fn test_circle_rect_centre_inside() {
        let rect = Rect::new(0.0, 0.0, 4.0, 2.0);
        let center = Vec2::new(1.0, 1.8);
        let push = circle_rect_mtv(center, 0.4, &rect).unwrap();
        let moved = center + push;
        assert!(approx(moved.y, 2.4));
        assert!(approx(moved.x, 1.0));
    }

    #[test]
    fn test_edge_point_towards() {
        let rect = Rect::centered(Vec2::new(5.0, 5.0), 4.0);
        let (point, normal) = rect.edge_point_towards(Vec2::new(5.0, 12.0));
        assert!(approx(point.x, 5.0));
        assert!(approx(point.y, 7.0));
        assert_eq!(normal, Vec2::new(0.0, 1.0));
    }
}
