use glam::Vec2;

use rpgsync::{Body, Stage};

/// Loop through the arena that passes the gate.
const WAYPOINTS: [Vec2; 3] = [
    Vec2::new(-3.0, -5.0),
    Vec2::new(3.0, -5.0),
    Vec2::new(0.0, 7.0),
];
/// Units per second.
const SPEED: f32 = 3.0;
const ARRIVE_DISTANCE: f32 = 0.25;

/// Stands in for player input: walks the local player around a fixed loop.
#[derive(Debug, Default)]
pub struct Pilot {
    position: Option<Vec2>,
    waypoint: usize,
}

impl Pilot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<Vec2> {
        self.position
    }

    /// Seeds the walk from the authority's spawn point. Later calls are
    /// ignored until [`Pilot::reset`].
    pub fn place(&mut self, position: Vec2) {
        if self.position.is_none() {
            self.position = Some(position);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Moves one frame of `dt` seconds and writes the result over `body`.
    /// `None` until placed.
    pub fn steer(&mut self, mut body: Body, frame: i64, dt: f32) -> Option<Body> {
        let position = self.position?;

        let mut to_target = WAYPOINTS[self.waypoint] - position;
        if to_target.length() < ARRIVE_DISTANCE {
            self.waypoint = (self.waypoint + 1) % WAYPOINTS.len();
            to_target = WAYPOINTS[self.waypoint] - position;
        }

        let velocity = to_target.normalize_or_zero() * SPEED;
        let step = velocity * dt;
        let next = if step.length() >= to_target.length() {
            position + to_target
        } else {
            position + step
        };
        self.position = Some(next);

        body.frame = frame;
        body.position = next;
        body.velocity = velocity;
        if velocity != Vec2::ZERO {
            body.facing = velocity.y.atan2(velocity.x);
            body.stage = Stage::Moving;
        } else {
            body.stage = Stage::Idle;
        }
        Some(body)
    }
}
