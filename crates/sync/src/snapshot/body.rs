use bitflags::bitflags;
use glam::Vec2;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum Stage {
    #[default]
    Idle = 0,
    Moving = 1,
    Attacking = 2,
    Hurt = 3,
    Dead = 4,
}

impl TryFrom<u8> for Stage {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Stage::Idle,
            1 => Stage::Moving,
            2 => Stage::Attacking,
            3 => Stage::Hurt,
            4 => Stage::Dead,
            other => return Err(other),
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    pub struct BodyFlags: u16 {
        const OPEN = 1 << 0;
        const LOCKED = 1 << 1;
        const ACTIVE = 1 << 2;
        const INVISIBLE = 1 << 3;
        const HOLDING = 1 << 4;
    }
}

/// Per-tick state of one entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Body {
    pub frame: i64,
    pub scene: i32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub facing: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub ammo: i32,
    pub stage: Stage,
    pub flags: BodyFlags,
}

impl Body {
    pub fn new(frame: i64, scene: i32) -> Self {
        Self {
            frame,
            scene,
            ..Default::default()
        }
    }

    pub fn at(frame: i64, scene: i32, position: Vec2) -> Self {
        Self {
            frame,
            scene,
            position,
            ..Default::default()
        }
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_hp(mut self, hp: i32, max_hp: i32) -> Self {
        self.hp = hp;
        self.max_hp = max_hp;
        self
    }

    /// True when every field except the logical frame matches.
    pub fn same_payload(&self, other: &Body) -> bool {
        self.scene == other.scene
            && self.position == other.position
            && self.velocity == other.velocity
            && self.facing == other.facing
            && self.hp == other.hp
            && self.max_hp == other.max_hp
            && self.ammo == other.ammo
            && self.stage == other.stage
            && self.flags == other.flags
    }

    /// Whether `self` can be reached from `earlier` by blending position over
    /// `dt` seconds. Any other difference is a discontinuity and must snap.
    pub fn can_interpolate_from(&self, earlier: &Body, dt: f32, tolerance: f32) -> bool {
        if self.frame <= earlier.frame
            || self.scene != earlier.scene
            || self.hp != earlier.hp
            || self.max_hp != earlier.max_hp
            || self.facing != earlier.facing
        {
            return false;
        }

        if earlier.velocity == Vec2::ZERO {
            return earlier.position.distance(self.position) <= tolerance;
        }

        let predicted = earlier.position + earlier.velocity * dt;
        predicted.distance(self.position) <= tolerance
    }

    pub fn lerp(&self, later: &Body, t: f32) -> Body {
        let t = t.clamp(0.0, 1.0);
        Body {
            position: self.position.lerp(later.position, t),
            velocity: self.velocity.lerp(later.velocity, t),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stationary_within_tolerance() {
        let a = Body::at(1, 0, Vec2::new(10.0, 10.0)).with_hp(10, 10);
        let b = Body::at(2, 0, Vec2::new(10.2, 10.0)).with_hp(10, 10);
        assert!(b.can_interpolate_from(&a, 0.1, 0.5));

        let far = Body::at(2, 0, Vec2::new(30.0, 10.0)).with_hp(10, 10);
        assert!(!far.can_interpolate_from(&a, 0.1, 0.5));
    }

    #[test]
    fn test_constant_velocity_motion() {
        let a = Body::at(1, 0, Vec2::ZERO).with_velocity(Vec2::new(100.0, 0.0));
        let b = Body::at(2, 0, Vec2::new(10.0, 0.0)).with_velocity(Vec2::new(100.0, 0.0));
        assert!(b.can_interpolate_from(&a, 0.1, 0.5));

        let teleported = Body::at(2, 0, Vec2::new(-50.0, 0.0));
        assert!(!teleported.can_interpolate_from(&a, 0.1, 0.5));
    }

    #[test]
    fn test_non_positional_change_snaps() {
        let a = Body::at(1, 0, Vec2::ZERO).with_hp(10, 10);
        let hurt = Body::at(2, 0, Vec2::ZERO).with_hp(9, 10);
        assert!(!hurt.can_interpolate_from(&a, 0.1, 0.5));

        let other_scene = Body::at(2, 1, Vec2::ZERO).with_hp(10, 10);
        assert!(!other_scene.can_interpolate_from(&a, 0.1, 0.5));

        let older = Body::at(0, 0, Vec2::ZERO).with_hp(10, 10);
        assert!(!older.can_interpolate_from(&a, 0.1, 0.5));
    }

    #[test]
    fn test_lerp_keeps_earlier_fields() {
        let a = Body::at(1, 0, Vec2::ZERO).with_hp(5, 10);
        let b = Body::at(3, 0, Vec2::new(4.0, 2.0)).with_hp(5, 10);
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid.position, Vec2::new(2.0, 1.0));
        assert_eq!(mid.frame, 1);
        assert_eq!(mid.hp, 5);
    }
}
