use glam::Vec2;

use crate::snapshot::{BaseAttrs, BaseData, Body, BodyFlags, EntityId, EntityKind, Stage};

use super::protocol::{BaseRecord, BodyRecord, EntityIdRecord, EntityRecord, WorldSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unknown entity kind {0}")]
    UnknownKind(u8),
    #[error("unknown stage {0}")]
    UnknownStage(u8),
    #[error("record at frame {0} is a delta but no earlier state is known")]
    Incomplete(i64),
}

impl From<EntityId> for EntityIdRecord {
    fn from(id: EntityId) -> Self {
        Self {
            kind: id.kind as u8,
            owner: id.owner,
            index: id.index,
        }
    }
}

impl TryFrom<&EntityIdRecord> for EntityId {
    type Error = CodecError;

    fn try_from(record: &EntityIdRecord) -> Result<Self, Self::Error> {
        let kind = EntityKind::try_from(record.kind).map_err(CodecError::UnknownKind)?;
        Ok(EntityId::new(kind, record.owner, record.index))
    }
}

impl From<&BaseAttrs> for BaseRecord {
    fn from(attrs: &BaseAttrs) -> Self {
        match attrs {
            BaseAttrs::Plain => BaseRecord::Plain,
            BaseAttrs::Armored {
                damage_factor,
                protect_factor,
            } => BaseRecord::Armored {
                damage_factor: *damage_factor,
                protect_factor: *protect_factor,
            },
            BaseAttrs::Projectile {
                weapon,
                origin,
                targets,
            } => BaseRecord::Projectile {
                weapon: *weapon,
                origin: (*origin).into(),
                targets: *targets,
            },
            BaseAttrs::Control { lock } => BaseRecord::Control { lock: lock.clone() },
        }
    }
}

impl TryFrom<&BaseRecord> for BaseAttrs {
    type Error = CodecError;

    fn try_from(record: &BaseRecord) -> Result<Self, Self::Error> {
        Ok(match record {
            BaseRecord::Plain => BaseAttrs::Plain,
            BaseRecord::Armored {
                damage_factor,
                protect_factor,
            } => BaseAttrs::Armored {
                damage_factor: *damage_factor,
                protect_factor: *protect_factor,
            },
            BaseRecord::Projectile {
                weapon,
                origin,
                targets,
            } => BaseAttrs::Projectile {
                weapon: *weapon,
                origin: EntityId::try_from(origin)?,
                targets: *targets,
            },
            BaseRecord::Control { lock } => BaseAttrs::Control { lock: lock.clone() },
        })
    }
}

impl BodyRecord {
    pub fn full(body: &Body) -> Self {
        Self {
            frame: body.frame,
            scene: Some(body.scene),
            position: Some(body.position.to_array()),
            velocity: Some(body.velocity.to_array()),
            facing: Some(body.facing),
            hp: Some(body.hp),
            max_hp: Some(body.max_hp),
            ammo: Some(body.ammo),
            stage: Some(body.stage as u8),
            flags: Some(body.flags.bits()),
        }
    }

    /// Only the fields of `current` that differ from `previous`, or `None`
    /// when nothing but the frame moved.
    pub fn diff(previous: &Body, current: &Body) -> Option<Self> {
        if current.same_payload(previous) {
            return None;
        }

        fn changed<T: PartialEq + Copy>(old: T, new: T) -> Option<T> {
            (old != new).then_some(new)
        }

        Some(Self {
            frame: current.frame,
            scene: changed(previous.scene, current.scene),
            position: changed(previous.position, current.position).map(|v| v.to_array()),
            velocity: changed(previous.velocity, current.velocity).map(|v| v.to_array()),
            facing: changed(previous.facing, current.facing),
            hp: changed(previous.hp, current.hp),
            max_hp: changed(previous.max_hp, current.max_hp),
            ammo: changed(previous.ammo, current.ammo),
            stage: changed(previous.stage, current.stage).map(|s| s as u8),
            flags: changed(previous.flags, current.flags).map(|f| f.bits()),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.scene.is_some()
            && self.position.is_some()
            && self.velocity.is_some()
            && self.facing.is_some()
            && self.hp.is_some()
            && self.max_hp.is_some()
            && self.ammo.is_some()
            && self.stage.is_some()
            && self.flags.is_some()
    }

    /// Rebuilds a body, taking omitted fields from `previous`.
    pub fn apply(&self, previous: Option<&Body>) -> Result<Body, CodecError> {
        let mut body = match previous {
            Some(prev) => prev.clone(),
            None if self.is_complete() => Body::default(),
            None => return Err(CodecError::Incomplete(self.frame)),
        };

        body.frame = self.frame;
        if let Some(scene) = self.scene {
            body.scene = scene;
        }
        if let Some(position) = self.position {
            body.position = Vec2::from_array(position);
        }
        if let Some(velocity) = self.velocity {
            body.velocity = Vec2::from_array(velocity);
        }
        if let Some(facing) = self.facing {
            body.facing = facing;
        }
        if let Some(hp) = self.hp {
            body.hp = hp;
        }
        if let Some(max_hp) = self.max_hp {
            body.max_hp = max_hp;
        }
        if let Some(ammo) = self.ammo {
            body.ammo = ammo;
        }
        if let Some(stage) = self.stage {
            body.stage = Stage::try_from(stage).map_err(CodecError::UnknownStage)?;
        }
        if let Some(flags) = self.flags {
            body.flags = BodyFlags::from_bits_truncate(flags);
        }

        Ok(body)
    }
}

impl EntityRecord {
    pub fn full(base: &BaseData, tick: i64, body: &Body) -> Self {
        Self {
            id: base.id.into(),
            tick,
            base: Some((&base.attrs).into()),
            state: BodyRecord::full(body),
        }
    }

    pub fn entity_id(&self) -> Result<EntityId, CodecError> {
        EntityId::try_from(&self.id)
    }

    pub fn base_data(&self) -> Result<BaseData, CodecError> {
        let id = self.entity_id()?;
        Ok(match &self.base {
            Some(record) => BaseData::with_attrs(id, BaseAttrs::try_from(record)?),
            None => BaseData::new(id),
        })
    }
}

impl WorldSnapshot {
    /// Files a record under its kind's category.
    pub fn push(&mut self, record: EntityRecord) {
        match EntityKind::try_from(record.id.kind) {
            Ok(EntityKind::Player) => self.players.push(record),
            Ok(EntityKind::Enemy) => self.enemies.push(record),
            Ok(EntityKind::Bullet) | Ok(EntityKind::Pickable) => self.bullets.push(record),
            _ => self.controls.push(record),
        }
    }

    pub fn present_ids(&self) -> Option<Vec<EntityId>> {
        self.present.as_ref().map(|ids| {
            ids.iter()
                .filter_map(|record| EntityId::try_from(record).ok())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> Body {
        Body {
            frame: 12,
            scene: 1,
            position: Vec2::new(3.0, 4.0),
            velocity: Vec2::new(1.0, 0.0),
            facing: 1.25,
            hp: 18,
            max_hp: 20,
            ammo: 5,
            stage: Stage::Moving,
            flags: BodyFlags::ACTIVE,
        }
    }

    #[test]
    fn test_full_record_rebuilds_without_base() {
        let body = sample_body();
        let record = BodyRecord::full(&body);
        assert!(record.is_complete());
        assert_eq!(record.apply(None).unwrap(), body);
    }

    #[test]
    fn test_diff_carries_only_changes() {
        let previous = sample_body();
        let mut current = previous.clone();
        current.frame = 13;
        current.hp = 17;

        let record = BodyRecord::diff(&previous, &current).unwrap();
        assert_eq!(record.hp, Some(17));
        assert!(record.position.is_none());
        assert!(record.stage.is_none());
        assert_eq!(record.apply(Some(&previous)).unwrap(), current);
    }

    #[test]
    fn test_diff_ignores_frame_only_change() {
        let previous = sample_body();
        let mut current = previous.clone();
        current.frame = 99;
        assert!(BodyRecord::diff(&previous, &current).is_none());
    }

    #[test]
    fn test_delta_without_base_is_rejected() {
        let record = BodyRecord {
            frame: 3,
            hp: Some(1),
            ..Default::default()
        };
        assert_eq!(record.apply(None), Err(CodecError::Incomplete(3)));
    }

    #[test]
    fn test_push_files_by_kind() {
        let mut snapshot = WorldSnapshot::new(10);
        let body = sample_body();
        for kind in [EntityKind::Player, EntityKind::Bullet, EntityKind::Gate] {
            let base = BaseData::new(EntityId::new(kind, 1, 0));
            snapshot.push(EntityRecord::full(&base, 10, &body));
        }
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.bullets.len(), 1);
        assert_eq!(snapshot.controls.len(), 1);
        assert!(snapshot.enemies.is_empty());
    }
}
