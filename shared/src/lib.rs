use serde::{Deserialize, Serialize};

pub mod protocol;
pub mod sim;

pub const GRAVITY: f32 = -30.0;
pub const MAX_SPEED: f32 = 8.0;
pub const JUMP_SPEED: f32 = 12.0;
pub const FIXED_DT: f32 = 1.0 / 60.0;
pub const PLAYER_HALF_WIDTH: f32 = 0.4;
pub const PLAYER_HALF_HEIGHT: f32 = 0.9;
pub const SPAWN_POSITION: Vec2 = Vec2 { x: 0.0, y: 5.0 };
/// Length of the downward probe used to re-derive grounded state each tick.
pub const GROUND_PROBE: f32 = 0.12;

/// A 2D vector. Positive x is to the right, positive y is up.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    pub fn add(&self, other: Vec2) -> Vec2 {
        Vec2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    pub fn scale(&self, scalar: f32) -> Vec2 {
        Vec2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: Vec2) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned box used for static terrain colliders and character bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn from_center_half(center: Vec2, half_w: f32, half_h: f32) -> Self {
        Aabb {
            min: Vec2::new(center.x - half_w, center.y - half_h),
            max: Vec2::new(center.x + half_w, center.y + half_h),
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        !(self.max.x <= other.min.x
            || other.max.x <= self.min.x
            || self.max.y <= other.min.y
            || other.max.y <= self.min.y)
    }
}

/// Static collision geometry for the default zone: a long floor, two
/// platforms, and bounding walls. Terrain content generation lives outside
/// this crate; the sim only needs the collider set.
pub fn default_terrain() -> Vec<Aabb> {
    vec![
        // Floor, top surface at y = 0
        Aabb::from_center_half(Vec2::new(0.0, -1.0), 60.0, 1.0),
        // Platforms
        Aabb::from_center_half(Vec2::new(8.0, 2.5), 2.0, 0.25),
        Aabb::from_center_half(Vec2::new(-10.0, 4.0), 2.5, 0.25),
        // Walls at the zone edges
        Aabb::from_center_half(Vec2::new(-60.5, 10.0), 0.5, 12.0),
        Aabb::from_center_half(Vec2::new(60.5, 10.0), 0.5, 12.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vec2_ops() {
        let a = Vec2::new(3.0, 4.0);
        assert_approx_eq!(a.length(), 5.0, 1e-6);
        let b = a.add(Vec2::new(1.0, -1.0));
        assert_approx_eq!(b.x, 4.0, 1e-6);
        assert_approx_eq!(b.y, 3.0, 1e-6);
        assert_approx_eq!(a.scale(2.0).x, 6.0, 1e-6);
        assert_approx_eq!(Vec2::ZERO.distance(a), 5.0, 1e-6);
    }

    #[test]
    fn test_aabb_overlap() {
        let a = Aabb::from_center_half(Vec2::ZERO, 1.0, 1.0);
        let b = Aabb::from_center_half(Vec2::new(1.5, 0.0), 1.0, 1.0);
        let c = Aabb::from_center_half(Vec2::new(3.0, 0.0), 1.0, 1.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_aabb_exact_touch_is_not_overlap() {
        let a = Aabb::from_center_half(Vec2::ZERO, 1.0, 1.0);
        let b = Aabb::from_center_half(Vec2::new(2.0, 0.0), 1.0, 1.0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_default_terrain_has_floor_under_spawn() {
        let terrain = default_terrain();
        assert!(!terrain.is_empty());
        let floor = &terrain[0];
        assert!(floor.min.x < SPAWN_POSITION.x && SPAWN_POSITION.x < floor.max.x);
        assert!(floor.max.y <= SPAWN_POSITION.y);
    }
}
