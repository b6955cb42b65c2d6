mod body;
mod history;
mod identity;
mod interpolation;
mod store;

pub use body::{Body, BodyFlags, Stage};
pub use history::History;
pub use identity::{BaseAttrs, BaseData, EntityId, EntityKind};
pub use interpolation::{Interpolation, bracket};
pub use store::{
    CurrentEntry, CurrentSnapshot, FullEntry, FullSnapshot, SnapshotError, SnapshotStore,
};
