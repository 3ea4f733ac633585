//! Arena geometry and contact tests
//!
//! Purpose-built broad+narrow phase restricted to the two cases the game
//! needs: circle-circle and circle-polygon (arena boundary) touching.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Arena side length (square centered at the origin)
pub const ARENA_SIZE: f32 = 100.0;

/// Player hitbox radius
pub const PLAYER_RADIUS: f32 = 1.5;

/// Bullet hitbox radius
pub const BULLET_RADIUS: f32 = 0.5;

/// Per-axis player displacement per step while a key is held
pub const PLAYER_KEY_SPEED: f32 = 0.5;

/// Bullet displacement per step along its heading
pub const BULLET_SPEED: f32 = 1.0;

/// Spawn points keep this distance from every wall
pub const SPAWN_MARGIN: f32 = 10.0;

/// 2D point/vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Vec2) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn distance_squared(self, other: Vec2) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }
}

/// Check if two circles touch or overlap
pub fn circles_touch(a_center: Vec2, a_radius: f32, b_center: Vec2, b_radius: f32) -> bool {
    let combined = a_radius + b_radius;
    a_center.distance_squared(b_center) <= combined * combined
}

/// Squared distance from a point to a line segment
fn point_segment_distance_sq(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = Vec2::new(b.x - a.x, b.y - a.y);
    let ap = Vec2::new(p.x - a.x, p.y - a.y);
    let len_sq = ab.x * ab.x + ab.y * ab.y;

    if len_sq <= f32::EPSILON {
        return p.distance_squared(a);
    }

    let t = ((ap.x * ab.x + ap.y * ab.y) / len_sq).clamp(0.0, 1.0);
    let closest = Vec2::new(a.x + ab.x * t, a.y + ab.y * t);
    p.distance_squared(closest)
}

/// Static arena boundary: 4 corner vertices of the square in fixed winding
/// order, treated as one polygon body. Fixed for the room's lifetime.
#[derive(Debug, Clone)]
pub struct Boundary {
    vertices: [Vec2; 4],
}

impl Boundary {
    /// Boundary of the standard arena square
    pub fn arena() -> Self {
        let half = ARENA_SIZE / 2.0;
        Self {
            vertices: [
                Vec2::new(-half, -half),
                Vec2::new(half, -half),
                Vec2::new(half, half),
                Vec2::new(-half, half),
            ],
        }
    }

    pub fn vertices(&self) -> &[Vec2; 4] {
        &self.vertices
    }

    /// Edges of the polygon, closing back to the first vertex
    fn segments(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        (0..self.vertices.len()).map(move |i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % self.vertices.len()];
            (a, b)
        })
    }

    /// Check if a circle touches any edge of the boundary polygon
    pub fn touches_circle(&self, center: Vec2, radius: f32) -> bool {
        self.segments()
            .any(|(a, b)| point_segment_distance_sq(center, a, b) <= radius * radius)
    }
}

/// Keep a circle fully inside the arena square. Boundary response for
/// players is positional containment only, never a game event.
pub fn contain_in_arena(center: Vec2, radius: f32) -> Vec2 {
    let bound = ARENA_SIZE / 2.0 - radius;
    Vec2::new(center.x.clamp(-bound, bound), center.y.clamp(-bound, bound))
}

/// Advance a bullet one step along its heading (constant speed, zero drag)
pub fn bullet_step(position: Vec2, heading: f32) -> Vec2 {
    Vec2::new(
        position.x + heading.cos() * BULLET_SPEED,
        position.y + heading.sin() * BULLET_SPEED,
    )
}

/// Random point uniform over the interior square, `SPAWN_MARGIN` away from
/// every wall. Used for both initial spawn and respawn placement.
pub fn random_interior_point<R: Rng>(rng: &mut R) -> Vec2 {
    let bound = ARENA_SIZE / 2.0 - SPAWN_MARGIN;
    Vec2::new(
        rng.gen_range(-bound..=bound),
        rng.gen_range(-bound..=bound),
    )
}
