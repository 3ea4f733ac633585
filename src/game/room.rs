//! Room state and authoritative tick loop
//!
//! One room is one isolated arena simulation. Each room runs as a single
//! task that owns all of its state; commands from connections are serialized
//! through an mpsc channel, outbound messages fan out through a broadcast
//! channel. Rooms share nothing with each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::entity::{BulletEntity, Entity, PlayerEntity};
use crate::game::physics::{
    circles_touch, contain_in_arena, random_interior_point, Boundary, BULLET_RADIUS,
    PLAYER_RADIUS,
};
use crate::util::time::{snapshot_interval_steps, step_duration};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Why a join was rejected
#[derive(Debug, Clone, thiserror::Error)]
pub enum JoinError {
    #[error("{0} name is already exist")]
    NameTaken(String),
}

/// Commands serialized into a room's execution context
#[derive(Debug)]
pub enum RoomCommand {
    /// Register a client and its player entity
    Join {
        client_id: Uuid,
        name: String,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    /// Remove a client and its player entity (idempotent)
    Disconnect { client_id: Uuid },
    /// A parsed inbound message from a connected client
    Client { client_id: Uuid, msg: ClientMsg },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    client_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// True once the room task has exited and dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Contact pair reported by the per-step collision pass.
/// Only pairs involving a bullet are game events; player-player and
/// player-boundary contact is not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contact {
    BulletPlayer { bullet: Uuid, player: Uuid },
    BulletBullet { a: Uuid, b: Uuid },
    BulletBoundary { bullet: Uuid },
}

/// Room state (owned by the room task)
struct RoomState {
    id: String,
    entities: HashMap<Uuid, Entity>,
    /// client id -> display name
    clients: HashMap<Uuid, String>,
    /// Bullets that have not yet separated from their owner's circle.
    /// Owner contact is not reported until the bullet clears the muzzle,
    /// otherwise every shot would be consumed at spawn.
    muzzle_bullets: HashMap<Uuid, Uuid>,
    boundary: Boundary,
    rng: ChaCha8Rng,
    step: u64,
    destroyed: bool,
}

/// The authoritative room simulation
pub struct Room {
    state: RoomState,
    cmd_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<ServerMsg>,
    steps_since_snapshot: u32,
    client_count: Arc<AtomicUsize>,
}

impl Room {
    pub fn new(id: String) -> (Self, RoomHandle) {
        Self::with_seed(id, rand::random())
    }

    fn with_seed(id: String, seed: u64) -> (Self, RoomHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let client_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: id.clone(),
            cmd_tx,
            events_tx: events_tx.clone(),
            client_count: client_count.clone(),
        };

        let room = Self {
            state: RoomState {
                id,
                entities: HashMap::new(),
                clients: HashMap::new(),
                muzzle_bullets: HashMap::new(),
                boundary: Boundary::arena(),
                rng: ChaCha8Rng::seed_from_u64(seed),
                step: 0,
                destroyed: false,
            },
            cmd_rx,
            events_tx,
            steps_since_snapshot: 0,
            client_count,
        };

        (room, handle)
    }

    /// Run the room until its last client disconnects. Commands are handled
    /// as they arrive; the physics step and snapshot broadcast run on a
    /// fixed interval. Both are mutually exclusive on this task, so a
    /// snapshot is never serialized mid-mutation.
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, "Room started");

        let mut ticker = interval(step_duration());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    // Every handle dropped; nothing can ever join again
                    None => break,
                },
                _ = ticker.tick() => {
                    self.step_simulation();

                    self.steps_since_snapshot += 1;
                    if self.steps_since_snapshot >= snapshot_interval_steps() {
                        self.steps_since_snapshot = 0;
                        let snapshot = self.build_snapshot();
                        self.broadcast(snapshot);
                    }
                }
            }

            if self.state.destroyed {
                break;
            }
        }

        info!(room_id = %self.state.id, steps = self.state.step, "Room destroyed");
    }

    fn broadcast(&self, msg: ServerMsg) {
        // Send fails only when no client is subscribed
        let _ = self.events_tx.send(msg);
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                client_id,
                name,
                reply,
            } => self.handle_join(client_id, name, reply),
            RoomCommand::Disconnect { client_id } => self.handle_disconnect(client_id),
            RoomCommand::Client { client_id, msg } => self.handle_client_msg(client_id, msg),
        }
    }

    fn handle_join(
        &mut self,
        client_id: Uuid,
        name: String,
        reply: oneshot::Sender<Result<(), JoinError>>,
    ) {
        if self.state.clients.values().any(|n| n == &name) {
            let _ = reply.send(Err(JoinError::NameTaken(name)));
            return;
        }

        let spawn = random_interior_point(&mut self.state.rng);
        let player = PlayerEntity::new(client_id, name.clone(), spawn);

        self.state.entities.insert(client_id, Entity::Player(player));
        self.state.clients.insert(client_id, name.clone());
        self.client_count
            .store(self.state.clients.len(), Ordering::Relaxed);

        if reply.send(Ok(())).is_err() {
            // The connection died before hearing the result; roll back
            // silently so no orphan player lingers in the arena.
            self.state.entities.remove(&client_id);
            self.state.clients.remove(&client_id);
            self.client_count
                .store(self.state.clients.len(), Ordering::Relaxed);
            self.state.destroyed = self.state.clients.is_empty();
            return;
        }

        info!(
            room_id = %self.state.id,
            client_id = %client_id,
            name = %name,
            clients = self.state.clients.len(),
            "Player joined room"
        );

        self.broadcast(ServerMsg::Join { name: name.clone() });
        self.broadcast(ServerMsg::Spawn { name });
    }

    fn handle_disconnect(&mut self, client_id: Uuid) {
        let Some(name) = self.state.clients.remove(&client_id) else {
            // Already removed; disconnect is a no-op the second time
            return;
        };

        self.state.entities.remove(&client_id);
        self.client_count
            .store(self.state.clients.len(), Ordering::Relaxed);

        info!(
            room_id = %self.state.id,
            client_id = %client_id,
            name = %name,
            clients = self.state.clients.len(),
            "Player left room"
        );

        self.broadcast(ServerMsg::Left { name });

        if self.state.clients.is_empty() {
            self.state.destroyed = true;
        }
    }

    fn handle_client_msg(&mut self, client_id: Uuid, msg: ClientMsg) {
        match msg {
            ClientMsg::Message { message } => {
                if let Some(name) = self.state.clients.get(&client_id) {
                    self.broadcast(ServerMsg::User {
                        name: name.clone(),
                        message,
                    });
                }
            }
            ClientMsg::Move { keys } => {
                if let Some(player) = self
                    .state
                    .entities
                    .get_mut(&client_id)
                    .and_then(Entity::as_player_mut)
                {
                    player.set_keys(keys.iter().map(String::as_str));
                }
            }
            ClientMsg::MoveStop => {
                if let Some(player) = self
                    .state
                    .entities
                    .get_mut(&client_id)
                    .and_then(Entity::as_player_mut)
                {
                    player.clear_keys();
                }
            }
            ClientMsg::Bullet { rad } => {
                let Some(bullet) = self
                    .state
                    .entities
                    .get(&client_id)
                    .and_then(Entity::as_player)
                    .map(|p| p.shoot(rad))
                else {
                    debug!(room_id = %self.state.id, client_id = %client_id, "Shot from unknown client");
                    return;
                };

                self.state.muzzle_bullets.insert(bullet.id, bullet.owner_id);
                self.state.entities.insert(bullet.id, Entity::Bullet(bullet));
                self.broadcast(ServerMsg::Bullet);
            }
        }
    }

    /// One simulation step: apply movement, collect contact pairs, resolve
    /// them, emit events. Deterministic pipeline, no callbacks.
    fn step_simulation(&mut self) {
        self.state.step += 1;

        self.apply_movement();
        self.update_muzzle_clearance();
        let contacts = self.collect_contacts();
        self.resolve_contacts(contacts);
    }

    fn apply_movement(&mut self) {
        for entity in self.state.entities.values_mut() {
            match entity {
                Entity::Player(player) => {
                    let delta = player.movement_delta();
                    // Walls contain players positionally; never a game event
                    player.position =
                        contain_in_arena(player.position.add(delta), PLAYER_RADIUS);
                }
                Entity::Bullet(bullet) => bullet.advance(),
            }
        }
    }

    /// A fresh bullet overlaps its owner at spawn. It stays exempt from
    /// owner contact until the two circles separate once; after that an
    /// owner contact is a regular self-hit.
    fn update_muzzle_clearance(&mut self) {
        let entities = &self.state.entities;
        self.state.muzzle_bullets.retain(|bullet_id, owner_id| {
            let Some(bullet) = entities.get(bullet_id).and_then(Entity::as_bullet) else {
                return false;
            };
            match entities.get(owner_id) {
                Some(owner) => circles_touch(
                    bullet.position,
                    BULLET_RADIUS,
                    owner.center(),
                    PLAYER_RADIUS,
                ),
                // Owner left; no circle to clear
                None => false,
            }
        });
    }

    /// Report all currently-touching pairs involving a bullet
    fn collect_contacts(&self) -> Vec<Contact> {
        let mut contacts = Vec::new();

        for bullet in self.state.entities.values().filter_map(Entity::as_bullet) {
            for other in self.state.entities.values() {
                match other {
                    Entity::Player(player) => {
                        if self.state.muzzle_bullets.contains_key(&bullet.id)
                            && player.id == bullet.owner_id
                        {
                            continue;
                        }
                        if circles_touch(
                            bullet.position,
                            BULLET_RADIUS,
                            player.position,
                            PLAYER_RADIUS,
                        ) {
                            contacts.push(Contact::BulletPlayer {
                                bullet: bullet.id,
                                player: player.id,
                            });
                        }
                    }
                    // Report each bullet pair once
                    Entity::Bullet(other_bullet) if bullet.id < other_bullet.id => {
                        if circles_touch(
                            bullet.position,
                            BULLET_RADIUS,
                            other_bullet.position,
                            BULLET_RADIUS,
                        ) {
                            contacts.push(Contact::BulletBullet {
                                a: bullet.id,
                                b: other_bullet.id,
                            });
                        }
                    }
                    Entity::Bullet(_) => {}
                }
            }

            if self
                .state
                .boundary
                .touches_circle(bullet.position, BULLET_RADIUS)
            {
                contacts.push(Contact::BulletBoundary { bullet: bullet.id });
            }
        }

        contacts
    }

    /// Resolve reported pairs independently. A bullet is removed from the
    /// registry on its first contact of the step, but every reported pair
    /// still gets its kill check, so one bullet touching two players on the
    /// same step kills both.
    fn resolve_contacts(&mut self, contacts: Vec<Contact>) {
        // Bullets consumed this step, kept so later pairs still resolve
        let mut spent: HashMap<Uuid, BulletEntity> = HashMap::new();

        for contact in contacts {
            match contact {
                Contact::BulletBoundary { bullet } => {
                    if let Some(removed) = self.remove_bullet(bullet) {
                        spent.insert(bullet, removed);
                    }
                }
                Contact::BulletBullet { a, b } => {
                    for id in [a, b] {
                        if let Some(removed) = self.remove_bullet(id) {
                            spent.insert(id, removed);
                        }
                    }
                }
                Contact::BulletPlayer { bullet, player } => {
                    if let Some(removed) = self.remove_bullet(bullet) {
                        spent.insert(bullet, removed);
                    }
                    let Some(bullet) = spent.get(&bullet) else {
                        continue;
                    };

                    // Self-hits are exempt, keyed on owner identity
                    if bullet.owner_id == player {
                        continue;
                    }
                    let by = bullet.owner_name.clone();

                    let respawn = random_interior_point(&mut self.state.rng);
                    let Some(victim) = self
                        .state
                        .entities
                        .get_mut(&player)
                        .and_then(Entity::as_player_mut)
                    else {
                        continue;
                    };

                    victim.position = respawn;
                    let name = victim.name.clone();

                    self.broadcast(ServerMsg::Death {
                        name: name.clone(),
                        by,
                    });
                    self.broadcast(ServerMsg::Spawn { name });
                }
            }
        }
    }

    fn remove_bullet(&mut self, id: Uuid) -> Option<BulletEntity> {
        self.state.muzzle_bullets.remove(&id);
        match self.state.entities.remove(&id) {
            Some(Entity::Bullet(bullet)) => Some(bullet),
            Some(other) => {
                // Never a player id; put it back untouched
                self.state.entities.insert(id, other);
                None
            }
            None => None,
        }
    }

    /// Serialize the entire entity registry plus the static boundary
    fn build_snapshot(&self) -> ServerMsg {
        let entities = self
            .state
            .entities
            .iter()
            .map(|(id, entity)| (*id, entity.snapshot()))
            .collect();

        ServerMsg::Data {
            entities,
            wall: self.state.boundary.vertices().to_vec(),
        }
    }
}

/// Registry of all active rooms, keyed by room id. A room is created on
/// first reference to an unknown id; a finished room task evicts itself.
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Look up a room, creating it if absent. A handle whose task already
    /// exited counts as absent, so joining a destroyed room's id yields a
    /// fresh room.
    pub fn get_or_create(self: &Arc<Self>, room_id: &str) -> RoomHandle {
        use dashmap::mapref::entry::Entry;

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_closed() {
                    return occupied.get().clone();
                }
                let handle = self.spawn_room(room_id);
                occupied.insert(handle.clone());
                handle
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_room(room_id);
                vacant.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn_room(self: &Arc<Self>, room_id: &str) -> RoomHandle {
        let (room, handle) = Room::new(room_id.to_string());

        let registry = Arc::clone(self);
        let id = room_id.to_string();
        tokio::spawn(async move {
            room.run().await;

            // Only evict ourselves; a replacement room may already be live
            registry.rooms.remove_if(&id, |_, h| h.is_closed());
            info!(room_id = %id, "Room evicted from registry");
        });

        handle
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.iter().filter(|e| !e.value().is_closed()).count()
    }

    pub fn total_players(&self) -> usize {
        self.rooms
            .iter()
            .filter(|e| !e.value().is_closed())
            .map(|e| e.value().client_count())
            .sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::Vec2;
    use std::time::Duration;

    fn test_room() -> (Room, broadcast::Receiver<ServerMsg>) {
        let (room, handle) = Room::with_seed("test-room".to_string(), 42);
        let events = handle.events_tx.subscribe();
        (room, events)
    }

    fn join(room: &mut Room, name: &str) -> Uuid {
        let client_id = Uuid::new_v4();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        room.handle_join(client_id, name.to_string(), reply_tx);
        assert!(reply_rx.try_recv().expect("join reply").is_ok());
        client_id
    }

    fn place(room: &mut Room, client_id: Uuid, position: Vec2) {
        room.state
            .entities
            .get_mut(&client_id)
            .and_then(Entity::as_player_mut)
            .expect("player")
            .position = position;
    }

    fn position_of(room: &Room, id: Uuid) -> Vec2 {
        room.state.entities.get(&id).expect("entity").center()
    }

    fn drain(events: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = events.try_recv() {
            out.push(msg);
        }
        out
    }

    fn only_bullet_id(room: &Room) -> Uuid {
        room.state
            .entities
            .values()
            .find_map(|e| e.as_bullet().map(|b| b.id))
            .expect("one bullet in flight")
    }

    #[test]
    fn join_broadcasts_join_then_spawn() {
        let (mut room, mut events) = test_room();
        join(&mut room, "ada");

        let msgs = drain(&mut events);
        assert!(matches!(&msgs[0], ServerMsg::Join { name } if name == "ada"));
        assert!(matches!(&msgs[1], ServerMsg::Spawn { name } if name == "ada"));
        assert_eq!(room.client_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (mut room, _events) = test_room();
        join(&mut room, "ada");

        let (reply_tx, mut reply_rx) = oneshot::channel();
        room.handle_join(Uuid::new_v4(), "ada".to_string(), reply_tx);

        let result = reply_rx.try_recv().expect("join reply");
        assert!(matches!(result, Err(JoinError::NameTaken(_))));
        assert_eq!(room.state.clients.len(), 1);
    }

    #[test]
    fn disconnect_is_idempotent_and_destroys_empty_room() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        drain(&mut events);

        room.handle_disconnect(ada);
        assert!(room.state.destroyed);
        assert!(room.state.entities.is_empty());

        let msgs = drain(&mut events);
        assert!(matches!(&msgs[0], ServerMsg::Left { name } if name == "ada"));

        // Second disconnect is a no-op
        room.handle_disconnect(ada);
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn press_then_release_before_step_yields_no_displacement() {
        let (mut room, _events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(0.0, 0.0));

        room.handle_client_msg(
            ada,
            ClientMsg::Move {
                keys: vec!["w".into(), "d".into()],
            },
        );
        room.handle_client_msg(ada, ClientMsg::MoveStop);
        room.step_simulation();

        assert_eq!(position_of(&room, ada), Vec2::new(0.0, 0.0));
    }

    #[test]
    fn held_keys_translate_the_player_each_step() {
        let (mut room, _events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(0.0, 0.0));

        room.handle_client_msg(
            ada,
            ClientMsg::Move {
                keys: vec!["d".into(), "s".into()],
            },
        );
        for _ in 0..4 {
            room.step_simulation();
        }

        assert_eq!(position_of(&room, ada), Vec2::new(2.0, 2.0));
    }

    #[test]
    fn bullet_travels_along_its_heading() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(0.0, 0.0));
        drain(&mut events);

        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 0.0 });
        let msgs = drain(&mut events);
        assert!(matches!(msgs[0], ServerMsg::Bullet));

        let bullet_id = only_bullet_id(&room);
        for _ in 0..5 {
            room.step_simulation();
        }

        // p + n * (cos 0, sin 0) with no intervening collision
        let pos = position_of(&room, bullet_id);
        assert!((pos.x - 5.0).abs() < 1e-4);
        assert!(pos.y.abs() < 1e-4);
    }

    #[test]
    fn foreign_hit_removes_bullet_relocates_victim_and_orders_events() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        let bob = join(&mut room, "bob");
        place(&mut room, ada, Vec2::new(10.0, 0.0));
        place(&mut room, bob, Vec2::new(0.0, 0.0));
        drain(&mut events);

        // bob fires at heading 0 towards ada, 10 units away
        room.handle_client_msg(bob, ClientMsg::Bullet { rad: 0.0 });
        let bullet_id = only_bullet_id(&room);
        drain(&mut events);

        // Contact at combined radius 2.0, so the 8th step reaches ada
        for _ in 0..8 {
            room.step_simulation();
        }

        assert!(!room.state.entities.contains_key(&bullet_id));

        let pos = position_of(&room, ada);
        assert!(pos.x >= -40.0 && pos.x <= 40.0);
        assert!(pos.y >= -40.0 && pos.y <= 40.0);
        assert!(pos != Vec2::new(10.0, 0.0));

        let msgs = drain(&mut events);
        assert!(
            matches!(&msgs[0], ServerMsg::Death { name, by } if name == "ada" && by == "bob"),
            "expected Death first, got {:?}",
            msgs
        );
        assert!(matches!(&msgs[1], ServerMsg::Spawn { name } if name == "ada"));

        // The next snapshot carries the survivors and no bullet
        let ServerMsg::Data { entities, wall } = room.build_snapshot() else {
            panic!("expected Data");
        };
        assert_eq!(entities.len(), 2);
        assert!(!entities.contains_key(&bullet_id));
        assert_eq!(wall.len(), 4);
    }

    #[test]
    fn fresh_bullet_does_not_hit_its_own_shooter() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(0.0, 0.0));
        drain(&mut events);

        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 0.0 });
        let bullet_id = only_bullet_id(&room);

        // Overlapping the shooter at spawn must not consume the shot
        room.step_simulation();
        assert!(room.state.entities.contains_key(&bullet_id));
        assert!(drain(&mut events).iter().all(|m| !matches!(
            m,
            ServerMsg::Death { .. } | ServerMsg::Spawn { .. }
        )));
    }

    #[test]
    fn self_hit_after_separation_removes_bullet_without_events() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(0.0, 0.0));
        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 0.0 });
        let bullet_id = only_bullet_id(&room);

        // Let the bullet clear the muzzle
        for _ in 0..3 {
            room.step_simulation();
        }
        assert!(!room.state.muzzle_bullets.contains_key(&bullet_id));
        drain(&mut events);

        // ada respawns into the bullet's path (e.g. after an unrelated kill)
        place(&mut room, ada, Vec2::new(5.0, 0.0));
        room.step_simulation();

        assert!(!room.state.entities.contains_key(&bullet_id));
        let msgs = drain(&mut events);
        assert!(
            msgs.iter().all(|m| !matches!(
                m,
                ServerMsg::Death { .. } | ServerMsg::Spawn { .. }
            )),
            "self-hit must stay silent, got {:?}",
            msgs
        );
        // The exempted victim keeps their position
        assert_eq!(position_of(&room, ada), Vec2::new(5.0, 0.0));
    }

    #[test]
    fn bullet_is_removed_on_boundary_contact() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(45.0, 0.0));
        drain(&mut events);

        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 0.0 });
        let bullet_id = only_bullet_id(&room);

        for _ in 0..6 {
            room.step_simulation();
        }

        assert!(!room.state.entities.contains_key(&bullet_id));
        let msgs = drain(&mut events);
        assert!(msgs.iter().all(|m| !matches!(
            m,
            ServerMsg::Death { .. } | ServerMsg::Spawn { .. }
        )));
    }

    #[test]
    fn walls_contain_players_and_wall_shots_still_expire() {
        let (mut room, _events) = test_room();
        let ada = join(&mut room, "ada");
        place(&mut room, ada, Vec2::new(0.0, 0.0));

        room.handle_client_msg(
            ada,
            ClientMsg::Move {
                keys: vec!["d".into()],
            },
        );
        for _ in 0..260 {
            room.step_simulation();
        }

        // 0.5/step would reach x=130 unobstructed; the wall stops the hull
        assert_eq!(position_of(&room, ada), Vec2::new(48.5, 0.0));

        // A shot fired outward from the wall still dies on the boundary
        // instead of lingering in the registry
        room.handle_client_msg(ada, ClientMsg::MoveStop);
        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 0.0 });
        let bullet_id = only_bullet_id(&room);
        for _ in 0..5 {
            room.step_simulation();
        }
        assert!(!room.state.entities.contains_key(&bullet_id));
    }

    #[test]
    fn one_bullet_reaching_two_players_kills_both() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        let bob = join(&mut room, "bob");
        let eve = join(&mut room, "eve");
        place(&mut room, ada, Vec2::new(0.0, 0.0));
        // bob and eve straddle the flight path at the same distance
        place(&mut room, bob, Vec2::new(5.0, 1.0));
        place(&mut room, eve, Vec2::new(5.0, -1.0));
        drain(&mut events);

        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 0.0 });
        let bullet_id = only_bullet_id(&room);
        drain(&mut events);

        // Both pairs report on the same step (x=4, distance sqrt(2) < 2)
        for _ in 0..4 {
            room.step_simulation();
        }

        assert!(!room.state.entities.contains_key(&bullet_id));
        assert!(position_of(&room, bob) != Vec2::new(5.0, 1.0));
        assert!(position_of(&room, eve) != Vec2::new(5.0, -1.0));

        let msgs = drain(&mut events);
        let deaths: Vec<_> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::Death { name, by } => {
                    assert_eq!(by, "ada");
                    Some(name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(deaths.len(), 2, "both victims die, got {:?}", msgs);
        assert!(deaths.contains(&"bob") && deaths.contains(&"eve"));

        // Each Death is followed by the matching Spawn
        for (i, msg) in msgs.iter().enumerate() {
            if let ServerMsg::Death { name, .. } = msg {
                assert!(matches!(&msgs[i + 1], ServerMsg::Spawn { name: s } if s == name));
            }
        }
    }

    #[test]
    fn snapshot_contains_alive_entities_and_fixed_wall() {
        let (mut room, _events) = test_room();
        let ada = join(&mut room, "ada");
        join(&mut room, "bob");
        room.handle_client_msg(ada, ClientMsg::Bullet { rad: 1.0 });

        let ServerMsg::Data { entities, wall } = room.build_snapshot() else {
            panic!("expected Data");
        };
        assert_eq!(entities.len(), 3);
        assert_eq!(wall, room.state.boundary.vertices().to_vec());

        let named: Vec<_> = entities
            .values()
            .filter_map(|e| e.name.as_deref())
            .collect();
        assert_eq!(named.len(), 2);
        assert!(named.contains(&"ada") && named.contains(&"bob"));
    }

    #[test]
    fn chat_is_rebroadcast_without_touching_entities() {
        let (mut room, mut events) = test_room();
        let ada = join(&mut room, "ada");
        drain(&mut events);
        let before = position_of(&room, ada);

        room.handle_client_msg(
            ada,
            ClientMsg::Message {
                message: "hello".into(),
            },
        );

        let msgs = drain(&mut events);
        assert!(
            matches!(&msgs[0], ServerMsg::User { name, message } if name == "ada" && message == "hello")
        );
        assert_eq!(position_of(&room, ada), before);
    }

    #[tokio::test(start_paused = true)]
    async fn room_destroyed_on_last_disconnect_and_id_is_reusable() {
        let registry = Arc::new(RoomRegistry::new());
        let client_id = Uuid::new_v4();

        let handle = registry.get_or_create("arena-1");
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .cmd_tx
            .send(RoomCommand::Join {
                client_id,
                name: "ada".to_string(),
                reply: reply_tx,
            })
            .await
            .expect("room accepts commands");
        assert!(reply_rx.await.expect("join reply").is_ok());
        assert_eq!(registry.active_rooms(), 1);
        assert_eq!(registry.total_players(), 1);

        handle
            .cmd_tx
            .send(RoomCommand::Disconnect { client_id })
            .await
            .expect("room accepts commands");

        // Client count 1 -> 0 destroys the room
        for _ in 0..100 {
            if handle.is_closed() && registry.active_rooms() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_closed());
        assert_eq!(registry.active_rooms(), 0);

        // Same id and same name work again in a fresh room
        let fresh = registry.get_or_create("arena-1");
        assert!(!fresh.is_closed());

        let (reply_tx, reply_rx) = oneshot::channel();
        fresh
            .cmd_tx
            .send(RoomCommand::Join {
                client_id: Uuid::new_v4(),
                name: "ada".to_string(),
                reply: reply_tx,
            })
            .await
            .expect("fresh room accepts commands");
        assert!(reply_rx.await.expect("join reply").is_ok());
    }
}
