use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Enemy = 1,
    Bullet = 2,
    Pickable = 3,
    Light = 4,
    Container = 5,
    Collection = 6,
    Gate = 7,
    Teleport = 8,
}

impl EntityKind {
    /// Transient kinds are never destroyed explicitly; they disappear when an
    /// authoritative list stops mentioning them.
    pub fn is_transient(self) -> bool {
        matches!(self, EntityKind::Bullet | EntityKind::Pickable)
    }

    pub fn is_control(self) -> bool {
        matches!(
            self,
            EntityKind::Light
                | EntityKind::Container
                | EntityKind::Collection
                | EntityKind::Gate
                | EntityKind::Teleport
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Enemy => "enemy",
            EntityKind::Bullet => "bullet",
            EntityKind::Pickable => "pickable",
            EntityKind::Light => "light",
            EntityKind::Container => "container",
            EntityKind::Collection => "collection",
            EntityKind::Gate => "gate",
            EntityKind::Teleport => "teleport",
        }
    }
}

impl TryFrom<u8> for EntityKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => EntityKind::Player,
            1 => EntityKind::Enemy,
            2 => EntityKind::Bullet,
            3 => EntityKind::Pickable,
            4 => EntityKind::Light,
            5 => EntityKind::Container,
            6 => EntityKind::Collection,
            7 => EntityKind::Gate,
            8 => EntityKind::Teleport,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub owner: i32,
    pub index: i32,
}

impl EntityId {
    pub fn new(kind: EntityKind, owner: i32, index: i32) -> Self {
        Self { kind, owner, index }
    }

    pub fn player(owner: i32) -> Self {
        Self::new(EntityKind::Player, owner, 0)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind.as_str(), self.owner, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub enum BaseAttrs {
    #[default]
    Plain,
    Armored {
        damage_factor: f32,
        protect_factor: f32,
    },
    Projectile {
        weapon: u8,
        origin: EntityId,
        targets: u8,
    },
    Control {
        lock: Option<String>,
    },
}

/// Identity plus the attributes that only change on keyframes.
#[derive(Debug, Clone, Serialize)]
pub struct BaseData {
    pub id: EntityId,
    pub attrs: BaseAttrs,
}

impl BaseData {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            attrs: BaseAttrs::Plain,
        }
    }

    pub fn with_attrs(id: EntityId, attrs: BaseAttrs) -> Self {
        Self { id, attrs }
    }
}

impl PartialEq for BaseData {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BaseData {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_attrs() {
        let id = EntityId::new(EntityKind::Enemy, 0, 4);
        let a = BaseData::new(id);
        let b = BaseData::with_attrs(
            id,
            BaseAttrs::Armored {
                damage_factor: 1.5,
                protect_factor: 0.5,
            },
        );
        assert_eq!(a, b);
        assert_ne!(a, BaseData::new(EntityId::new(EntityKind::Enemy, 0, 5)));
    }

    #[test]
    fn test_kind_from_u8() {
        assert_eq!(EntityKind::try_from(2), Ok(EntityKind::Bullet));
        assert_eq!(EntityKind::try_from(42), Err(42));
        assert!(EntityKind::Pickable.is_transient());
        assert!(!EntityKind::Player.is_transient());
        assert!(EntityKind::Gate.is_control());
    }
}
