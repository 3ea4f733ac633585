//! Entity model: players and bullets
//!
//! A tagged variant over a shared circular geometry record. Movement and
//! lifespan rules dispatch on the tag, not on virtual calls.

use uuid::Uuid;

use crate::game::physics::{
    bullet_step, Vec2, BULLET_RADIUS, PLAYER_KEY_SPEED, PLAYER_RADIUS,
};
use crate::ws::protocol::{EntityKind, EntitySnapshot};

/// Movement keys understood by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKey {
    W,
    A,
    S,
    D,
}

impl MoveKey {
    /// Parse a wire key string; anything outside the whitelist is None
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "w" => Some(Self::W),
            "a" => Some(Self::A),
            "s" => Some(Self::S),
            "d" => Some(Self::D),
            _ => None,
        }
    }

    /// Per-step axis displacement contributed by this key
    fn delta(self) -> Vec2 {
        match self {
            Self::W => Vec2::new(0.0, -PLAYER_KEY_SPEED),
            Self::S => Vec2::new(0.0, PLAYER_KEY_SPEED),
            Self::A => Vec2::new(-PLAYER_KEY_SPEED, 0.0),
            Self::D => Vec2::new(PLAYER_KEY_SPEED, 0.0),
        }
    }
}

/// A connected player's body
#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub id: Uuid,
    pub name: String,
    pub position: Vec2,
    keys: Vec<MoveKey>,
}

impl PlayerEntity {
    pub fn new(id: Uuid, name: String, position: Vec2) -> Self {
        Self {
            id,
            name,
            position,
            keys: Vec::new(),
        }
    }

    /// Replace the pressed-key set from wire strings. Invalid entries are
    /// silently dropped, duplicates ignored, order of first press kept.
    pub fn set_keys<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        self.keys.clear();
        for key in keys.into_iter().filter_map(MoveKey::parse) {
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
    }

    /// Empty the pressed-key set
    pub fn clear_keys(&mut self) {
        self.keys.clear();
    }

    /// Net axis displacement for the current key set. Opposite keys cancel.
    pub fn movement_delta(&self) -> Vec2 {
        self.keys
            .iter()
            .fold(Vec2::default(), |acc, key| acc.add(key.delta()))
    }

    /// Fire a bullet from the player's current center
    pub fn shoot(&self, heading: f32) -> BulletEntity {
        BulletEntity {
            id: Uuid::new_v4(),
            position: self.position,
            heading,
            owner_id: self.id,
            owner_name: self.name.clone(),
        }
    }
}

/// A bullet in flight. Heading and speed are fixed at fire time.
#[derive(Debug, Clone)]
pub struct BulletEntity {
    pub id: Uuid,
    pub position: Vec2,
    pub heading: f32,
    /// Owning player's entity id, used only for the self-hit exemption
    pub owner_id: Uuid,
    /// Owner's name at fire time, used for the Death message
    pub owner_name: String,
}

impl BulletEntity {
    /// Advance one step along the fixed heading
    pub fn advance(&mut self) {
        self.position = bullet_step(self.position, self.heading);
    }
}

/// Any simulated body tracked by a room
#[derive(Debug, Clone)]
pub enum Entity {
    Player(PlayerEntity),
    Bullet(BulletEntity),
}

impl Entity {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Player(p) => p.id,
            Self::Bullet(b) => b.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Player(_) => EntityKind::Player,
            Self::Bullet(_) => EntityKind::Bullet,
        }
    }

    pub fn center(&self) -> Vec2 {
        match self {
            Self::Player(p) => p.position,
            Self::Bullet(b) => b.position,
        }
    }

    pub fn radius(&self) -> f32 {
        match self {
            Self::Player(_) => PLAYER_RADIUS,
            Self::Bullet(_) => BULLET_RADIUS,
        }
    }

    pub fn as_player(&self) -> Option<&PlayerEntity> {
        match self {
            Self::Player(p) => Some(p),
            Self::Bullet(_) => None,
        }
    }

    pub fn as_player_mut(&mut self) -> Option<&mut PlayerEntity> {
        match self {
            Self::Player(p) => Some(p),
            Self::Bullet(_) => None,
        }
    }

    pub fn as_bullet(&self) -> Option<&BulletEntity> {
        match self {
            Self::Player(_) => None,
            Self::Bullet(b) => Some(b),
        }
    }

    /// Serialize for a `Data` snapshot
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            kind: self.kind(),
            center: self.center(),
            radius: self.radius(),
            name: self.as_player().map(|p| p.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str) -> PlayerEntity {
        PlayerEntity::new(Uuid::new_v4(), name.to_string(), Vec2::new(0.0, 0.0))
    }

    #[test]
    fn key_whitelist_drops_invalid_entries() {
        let mut p = player("ada");
        p.set_keys(["w", "x", "Escape", "d"]);
        assert_eq!(p.movement_delta(), Vec2::new(0.5, -0.5));
    }

    #[test]
    fn duplicate_keys_count_once() {
        let mut p = player("ada");
        p.set_keys(["w", "w", "w"]);
        assert_eq!(p.movement_delta(), Vec2::new(0.0, -0.5));
    }

    #[test]
    fn opposite_keys_cancel() {
        let mut p = player("ada");
        p.set_keys(["w", "s", "a", "d"]);
        assert_eq!(p.movement_delta(), Vec2::default());
    }

    #[test]
    fn clear_keys_stops_movement() {
        let mut p = player("ada");
        p.set_keys(["d"]);
        p.clear_keys();
        assert_eq!(p.movement_delta(), Vec2::default());
    }

    #[test]
    fn shoot_starts_at_player_center_with_owner_identity() {
        let mut p = player("ada");
        p.position = Vec2::new(7.0, -3.0);
        let bullet = p.shoot(1.2);

        assert_eq!(bullet.position, p.position);
        assert_eq!(bullet.owner_id, p.id);
        assert_eq!(bullet.owner_name, "ada");
        assert!((bullet.heading - 1.2).abs() < f32::EPSILON);
    }

    #[test]
    fn snapshot_includes_name_only_for_players() {
        let p = player("ada");
        let bullet = p.shoot(0.0);

        let player_snap = Entity::Player(p).snapshot();
        assert_eq!(player_snap.kind, EntityKind::Player);
        assert_eq!(player_snap.radius, PLAYER_RADIUS);
        assert_eq!(player_snap.name.as_deref(), Some("ada"));

        let bullet_snap = Entity::Bullet(bullet).snapshot();
        assert_eq!(bullet_snap.kind, EntityKind::Bullet);
        assert_eq!(bullet_snap.radius, BULLET_RADIUS);
        assert!(bullet_snap.name.is_none());
    }
}
