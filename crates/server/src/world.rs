use std::f32::consts::TAU;

use glam::Vec2;

use rpgsync::{
    Arena, BaseAttrs, BaseData, Body, BodyFlags, EntityId, EntityKind, FinalResult, Handle, Stage,
    WorldSnapshot,
};

const PLAYER_HP: i32 = 100;
const PLAYER_AMMO: i32 = 10;
const ENEMY_HP: i32 = 40;
const PATROL_RADIUS: f32 = 6.0;
/// Radians per second.
const PATROL_SPEED: f32 = 0.5;
const FIRE_INTERVAL: i64 = 90;
const BULLET_SPEED: f32 = 8.0;
const BULLET_TTL: u32 = 90;
const BULLET_DAMAGE: i32 = 5;
const MAX_BULLETS: usize = 8;
const PICKUP_INTERVAL: i64 = 300;
const PICKUP_AMMO: i32 = 5;
const MAX_PICKABLES: usize = 2;
const HIT_RADIUS: f32 = 0.6;
const PICKUP_RADIUS: f32 = 1.0;
const GATE_RADIUS: f32 = 2.0;
const GATE_POSITION: Vec2 = Vec2::new(0.0, 8.0);
const PICKABLE_SPOTS: [Vec2; 3] = [
    Vec2::new(4.0, 4.0),
    Vec2::new(-4.0, 3.0),
    Vec2::new(0.0, -5.0),
];

#[derive(Debug)]
pub struct Actor {
    pub base: BaseData,
    pub body: Body,
    /// Peer steering this actor. Players only; `None` while nobody does.
    pub owner: Option<Handle>,
    /// Frames left for an expiring transient.
    pub ttl: Option<u32>,
    input_tick: i64,
}

impl Actor {
    fn new(base: BaseData, body: Body) -> Self {
        Self {
            base,
            body,
            owner: None,
            ttl: None,
            input_tick: i64::MIN,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.body.hp > 0
    }

    fn is_active_player(&self) -> bool {
        self.base.id.kind == EntityKind::Player && self.owner.is_some() && self.is_alive()
    }
}

/// Trivial authoritative world: patrolling enemies that shoot at players,
/// ammo pickups and a proximity gate.
#[derive(Debug)]
pub struct World {
    actors: Arena<Actor>,
    frame: i64,
    next_bullet: i32,
    next_pickable: i32,
    score: i64,
}

impl World {
    pub fn new(enemies: usize) -> Self {
        let mut actors = Arena::new();

        for index in 0..enemies as i32 {
            let base = BaseData::with_attrs(
                EntityId::new(EntityKind::Enemy, 0, index),
                BaseAttrs::Armored {
                    damage_factor: 1.0,
                    protect_factor: 0.5,
                },
            );
            let angle = patrol_angle(index, 0.0);
            let mut body = Body::at(0, 0, Vec2::from_angle(angle) * PATROL_RADIUS)
                .with_hp(ENEMY_HP, ENEMY_HP);
            body.stage = Stage::Moving;
            actors.insert(Actor::new(base, body));
        }

        let gate = BaseData::with_attrs(
            EntityId::new(EntityKind::Gate, 0, 0),
            BaseAttrs::Control {
                lock: Some("north".to_string()),
            },
        );
        let mut body = Body::at(0, 0, GATE_POSITION);
        body.flags = BodyFlags::LOCKED;
        actors.insert(Actor::new(gate, body));

        let light = BaseData::with_attrs(
            EntityId::new(EntityKind::Light, 0, 0),
            BaseAttrs::Control { lock: None },
        );
        let mut body = Body::new(0, 0);
        body.flags = BodyFlags::ACTIVE;
        actors.insert(Actor::new(light, body));

        Self {
            actors,
            frame: 0,
            next_bullet: 0,
            next_pickable: 0,
            score: 0,
        }
    }

    pub fn frame(&self) -> i64 {
        self.frame
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.iter().map(|(_, actor)| actor)
    }

    pub fn controls(&self) -> impl Iterator<Item = &Actor> {
        self.actors().filter(|actor| actor.base.id.kind.is_control())
    }

    fn count(&self, kind: EntityKind) -> usize {
        self.actors().filter(|actor| actor.base.id.kind == kind).count()
    }

    /// Hands the player actor of `player_id` to `owner`, spawning it on first
    /// use.
    pub fn adopt(&mut self, owner: Handle, player_id: i32) -> Handle {
        let id = EntityId::player(player_id);
        if let Some((handle, actor)) = self.actors.iter_mut().find(|(_, a)| a.base.id == id) {
            actor.owner = Some(owner);
            actor.body.flags.remove(BodyFlags::INVISIBLE);
            return handle;
        }

        let base = BaseData::with_attrs(
            id,
            BaseAttrs::Armored {
                damage_factor: 1.0,
                protect_factor: 1.0,
            },
        );
        let spawn = Vec2::new(-3.0 + 1.5 * (player_id % 5) as f32, -8.0);
        let mut body = Body::at(self.frame, 0, spawn).with_hp(PLAYER_HP, PLAYER_HP);
        body.ammo = PLAYER_AMMO;

        let mut actor = Actor::new(base, body);
        actor.owner = Some(owner);
        self.actors.insert(actor)
    }

    /// Freezes and hides players whose owner is gone. Returns how many.
    pub fn release_orphans(&mut self, is_live: impl Fn(Handle) -> bool) -> usize {
        let mut released = 0;
        for (_, actor) in self.actors.iter_mut() {
            let Some(owner) = actor.owner else {
                continue;
            };
            if is_live(owner) {
                continue;
            }
            actor.owner = None;
            actor.body.velocity = Vec2::ZERO;
            actor.body.stage = Stage::Idle;
            actor.body.flags.insert(BodyFlags::INVISIBLE);
            released += 1;
        }
        released
    }

    /// Takes the newest state a client reported for its own player. The
    /// authority keeps hp, ammo and flags; anything else in the snapshot is
    /// ignored.
    pub fn apply_client_state(
        &mut self,
        owner: Handle,
        player_id: i32,
        state: &WorldSnapshot,
    ) -> bool {
        let id = EntityId::player(player_id);
        let Some(record) = state
            .players
            .iter()
            .filter(|record| record.entity_id().is_ok_and(|rid| rid == id))
            .max_by_key(|record| record.tick)
        else {
            return false;
        };

        let Some(actor) = self
            .actors
            .iter_mut()
            .map(|(_, actor)| actor)
            .find(|actor| actor.owner == Some(owner) && actor.base.id == id)
        else {
            return false;
        };
        if !actor.is_alive() || record.tick <= actor.input_tick {
            return false;
        }

        let reported = match record.state.apply(Some(&actor.body)) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Bad client state for {}: {}", id, e);
                return false;
            }
        };

        actor.input_tick = record.tick;
        actor.body.scene = reported.scene;
        actor.body.position = reported.position;
        actor.body.velocity = reported.velocity;
        actor.body.facing = reported.facing;
        if matches!(
            reported.stage,
            Stage::Idle | Stage::Moving | Stage::Attacking
        ) {
            actor.body.stage = reported.stage;
        }
        true
    }

    /// Advances one frame and returns the transient identities that expired.
    pub fn step(&mut self, dt: f32) -> Vec<EntityId> {
        self.frame += 1;
        let frame = self.frame;
        let secs = frame as f32 * dt;

        let targets: Vec<Vec2> = self
            .actors()
            .filter(|actor| actor.is_active_player())
            .map(|actor| actor.body.position)
            .collect();
        let mut shots = Vec::new();

        for (_, actor) in self.actors.iter_mut() {
            actor.body.frame = frame;
            match actor.base.id.kind {
                EntityKind::Enemy if actor.is_alive() => {
                    let index = actor.base.id.index;
                    let angle = patrol_angle(index, secs);
                    let position = Vec2::from_angle(angle) * PATROL_RADIUS;
                    let velocity = Vec2::from_angle(angle).perp() * PATROL_RADIUS * PATROL_SPEED;
                    actor.body.position = position;
                    actor.body.velocity = velocity;
                    actor.body.facing = velocity.y.atan2(velocity.x);

                    if (frame + index as i64 * 17) % FIRE_INTERVAL == 0 {
                        if let Some(target) = nearest(&targets, position) {
                            shots.push((actor.base.id, position, (target - position).normalize_or_zero()));
                        }
                    }
                }
                EntityKind::Bullet => {
                    actor.body.position += actor.body.velocity * dt;
                    if let Some(ttl) = actor.ttl.as_mut() {
                        *ttl = ttl.saturating_sub(1);
                    }
                }
                EntityKind::Gate => {
                    let near = targets
                        .iter()
                        .any(|t| t.distance(actor.body.position) < GATE_RADIUS);
                    actor.body.flags.set(BodyFlags::OPEN, near);
                }
                _ => {}
            }
        }

        self.resolve_hits();
        self.resolve_pickups();

        let retired: Vec<EntityId> = self
            .actors
            .retain(|_, actor| actor.ttl != Some(0))
            .into_iter()
            .map(|actor| actor.base.id)
            .collect();

        for (origin, position, direction) in shots {
            if self.count(EntityKind::Bullet) >= MAX_BULLETS {
                break;
            }
            self.spawn_bullet(origin, position, direction);
        }
        if frame % PICKUP_INTERVAL == 0 && self.count(EntityKind::Pickable) < MAX_PICKABLES {
            self.spawn_pickable();
        }

        retired
    }

    fn resolve_hits(&mut self) {
        let bullets: Vec<(Handle, Vec2)> = self
            .actors
            .iter()
            .filter(|(_, a)| a.base.id.kind == EntityKind::Bullet && a.ttl != Some(0))
            .map(|(handle, a)| (handle, a.body.position))
            .collect();

        for (handle, position) in bullets {
            let hit = self
                .actors
                .iter_mut()
                .map(|(_, actor)| actor)
                .find(|a| a.is_active_player() && a.body.position.distance(position) < HIT_RADIUS);
            let Some(player) = hit else {
                continue;
            };

            player.body.hp = (player.body.hp - BULLET_DAMAGE).max(0);
            player.body.stage = if player.body.hp == 0 {
                Stage::Dead
            } else {
                Stage::Hurt
            };
            log::debug!("{} hit, hp {}", player.base.id, player.body.hp);

            if let Some(bullet) = self.actors.get_mut(handle) {
                bullet.ttl = Some(0);
            }
        }
    }

    fn resolve_pickups(&mut self) {
        let pickables: Vec<(Handle, Vec2)> = self
            .actors
            .iter()
            .filter(|(_, a)| a.base.id.kind == EntityKind::Pickable)
            .map(|(handle, a)| (handle, a.body.position))
            .collect();

        for (handle, position) in pickables {
            let taker = self
                .actors
                .iter_mut()
                .map(|(_, actor)| actor)
                .find(|a| a.is_active_player() && a.body.position.distance(position) < PICKUP_RADIUS);
            let Some(player) = taker else {
                continue;
            };

            player.body.ammo += PICKUP_AMMO;
            self.score += 10;
            if let Some(pickable) = self.actors.get_mut(handle) {
                pickable.ttl = Some(0);
            }
        }
    }

    fn spawn_bullet(&mut self, origin: EntityId, position: Vec2, direction: Vec2) {
        let index = self.next_bullet;
        self.next_bullet = self.next_bullet.wrapping_add(1);

        let base = BaseData::with_attrs(
            EntityId::new(EntityKind::Bullet, 0, index),
            BaseAttrs::Projectile {
                weapon: 1,
                origin,
                targets: 1,
            },
        );
        let body = Body::at(self.frame, 0, position)
            .with_velocity(direction * BULLET_SPEED)
            .with_hp(1, 1);

        let mut bullet = Actor::new(base, body);
        bullet.ttl = Some(BULLET_TTL);
        self.actors.insert(bullet);
    }

    fn spawn_pickable(&mut self) {
        let index = self.next_pickable;
        self.next_pickable = self.next_pickable.wrapping_add(1);

        let spot = PICKABLE_SPOTS[index.rem_euclid(PICKABLE_SPOTS.len() as i32) as usize];
        let base = BaseData::new(EntityId::new(EntityKind::Pickable, 0, index));
        self.actors.insert(Actor::new(base, Body::at(self.frame, 0, spot)));
    }

    pub fn result(&self, duration_secs: u32) -> FinalResult {
        let survivors = self
            .actors()
            .filter(|actor| actor.is_active_player())
            .count();
        FinalResult {
            success: survivors > 0,
            score: self.score + survivors as i64 * 100,
            duration_secs,
        }
    }
}

fn patrol_angle(index: i32, secs: f32) -> f32 {
    index as f32 * TAU / 5.0 + secs * PATROL_SPEED
}

fn nearest(targets: &[Vec2], from: Vec2) -> Option<Vec2> {
    targets
        .iter()
        .copied()
        .min_by(|a, b| a.distance_squared(from).total_cmp(&b.distance_squared(from)))
}
