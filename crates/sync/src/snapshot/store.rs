use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use crate::config::SyncConfig;
use crate::net::{BodyRecord, CodecError, EntityRecord, WorldSnapshot};

use super::body::Body;
use super::history::History;
use super::identity::{BaseAttrs, BaseData, EntityId};
use super::interpolation::Interpolation;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("tick {tick} of {id} is taken ({probe} further keys tried)")]
    TickCollision { id: EntityId, tick: i64, probe: i64 },
    #[error("duplicate state for {id} at tick {tick}")]
    Duplicate { id: EntityId, tick: i64 },
    #[error("delta for {id} at tick {tick} has no base state")]
    MissingBase { id: EntityId, tick: i64 },
    #[error("malformed record: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone)]
pub struct FullEntry {
    pub base: BaseData,
    pub interpolation: Interpolation,
}

/// Bracket of every tracked identity at one render tick.
#[derive(Debug, Clone, Default)]
pub struct FullSnapshot {
    pub tick: i64,
    pub entries: Vec<FullEntry>,
}

impl FullSnapshot {
    pub fn get(&self, id: &EntityId) -> Option<&Interpolation> {
        self.entries
            .iter()
            .find(|e| e.base.id == *id)
            .map(|e| &e.interpolation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentEntry {
    pub base: BaseData,
    pub tick: i64,
    pub body: Body,
}

/// Newest payload of every identity, without history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentSnapshot {
    pub entries: Vec<CurrentEntry>,
}

impl CurrentSnapshot {
    pub fn get(&self, id: &EntityId) -> Option<&CurrentEntry> {
        self.entries.iter().find(|e| e.base.id == *id)
    }

    pub fn latest_tick(&self) -> i64 {
        self.entries.iter().map(|e| e.tick).max().unwrap_or(0)
    }

    /// A keyframe world snapshot listing every identity.
    pub fn to_wire(&self, tick: i64) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::new(tick);
        let mut present = Vec::new();
        for entry in &self.entries {
            if entry.base.id.kind.is_transient() {
                present.push(entry.base.id.into());
            }
            snapshot.push(EntityRecord::full(&entry.base, entry.tick, &entry.body));
        }
        snapshot.present = Some(present);
        snapshot
    }
}

#[derive(Debug)]
pub struct SnapshotStore {
    histories: BTreeMap<EntityId, History>,
    tick_scale: i64,
    max_probe: i64,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

impl SnapshotStore {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            histories: BTreeMap::new(),
            tick_scale: config.tick_scale.max(1),
            max_probe: config.max_tick_probe.max(0),
        }
    }

    pub fn tick_scale(&self) -> i64 {
        self.tick_scale
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn history(&self, id: &EntityId) -> Option<&History> {
        self.histories.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.histories.keys()
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }

    /// Records a locally simulated state under a quantized tick and returns
    /// the tick used.
    pub fn update_snapshot(&mut self, base: BaseData, body: Body) -> Result<i64, SnapshotError> {
        let id = base.id;
        let frame = body.frame;
        let history = self
            .histories
            .entry(id)
            .or_insert_with(|| History::new(base.clone()));
        history.base_mut().attrs = base.attrs;

        match history.insert_quantized(body, self.tick_scale, self.max_probe) {
            Some(tick) => Ok(tick),
            None => {
                let tick = frame.saturating_mul(self.tick_scale).max(history.last_tick() + 1);
                if history.is_empty() {
                    self.histories.remove(&id);
                }
                Err(SnapshotError::TickCollision {
                    id,
                    tick,
                    probe: self.max_probe,
                })
            }
        }
    }

    /// Stores a state received from the authority under exactly the tick it
    /// assigned. A different payload already held at that tick is a
    /// `TickCollision`; remote states are never moved to another key.
    pub fn insert_remote(
        &mut self,
        id: EntityId,
        attrs: Option<BaseAttrs>,
        tick: i64,
        record: &BodyRecord,
    ) -> Result<i64, SnapshotError> {
        let history = self
            .histories
            .entry(id)
            .or_insert_with(|| History::new(BaseData::new(id)));

        match history.insert_remote(tick, record) {
            Ok(tick) => {
                if let Some(attrs) = attrs {
                    history.base_mut().attrs = attrs;
                }
                Ok(tick)
            }
            Err(err) => {
                if history.is_empty() {
                    self.histories.remove(&id);
                }
                Err(err)
            }
        }
    }

    /// Applies every record of a world snapshot and, when it carries an
    /// authoritative identity list, retires the transient identities it omits.
    /// Returns the number of states stored.
    pub fn apply_world(&mut self, snapshot: &WorldSnapshot) -> usize {
        let mut stored = 0;
        for record in snapshot.records() {
            let result = record.entity_id().map_err(SnapshotError::from).and_then(|id| {
                let attrs = match &record.base {
                    Some(base) => Some(BaseAttrs::try_from(base)?),
                    None => None,
                };
                self.insert_remote(id, attrs, record.tick, &record.state)
            });

            match result {
                Ok(_) => stored += 1,
                Err(SnapshotError::Duplicate { .. }) => {}
                Err(err) => log::warn!("Dropping record at tick {}: {}", record.tick, err),
            }
        }

        if let Some(present) = snapshot.present_ids() {
            let removed = self.retire_missing(&present, snapshot.tick);
            if removed > 0 {
                log::debug!("Retired {} transient entities at tick {}", removed, snapshot.tick);
            }
        }
        stored
    }

    /// Deletes transient identities absent from `present`.
    pub fn remove_missing_snapshots(&mut self, present: &[EntityId]) -> usize {
        let present: HashSet<&EntityId> = present.iter().collect();
        let before = self.histories.len();
        self.histories
            .retain(|id, _| !id.kind.is_transient() || present.contains(id));
        before - self.histories.len()
    }

    /// Like `remove_missing_snapshots`, but spares identities holding a state
    /// newer than the list, which a late list cannot know about.
    fn retire_missing(&mut self, present: &[EntityId], tick: i64) -> usize {
        let present: HashSet<&EntityId> = present.iter().collect();
        let before = self.histories.len();
        self.histories.retain(|id, history| {
            !id.kind.is_transient()
                || present.contains(id)
                || history.latest().is_some_and(|(newest, _)| newest > tick)
        });
        before - self.histories.len()
    }

    /// Forgets one identity outright, whatever its kind.
    pub fn remove(&mut self, id: &EntityId) -> Option<History> {
        self.histories.remove(id)
    }

    pub fn zap_snapshots(&mut self, tick: i64) -> usize {
        if tick <= 0 {
            return 0;
        }
        self.histories.values_mut().map(|h| h.zap(tick)).sum()
    }

    pub fn get_full_snapshot(&mut self, target: i64, find_last: bool) -> FullSnapshot {
        let mut entries = Vec::with_capacity(self.histories.len());

        for (id, history) in self.histories.iter_mut() {
            let interpolation = history.interpolate(target, find_last);

            if let Some(s1) = interpolation.s1_tick() {
                if let Some(previous) = history.consume(s1) {
                    log::warn!(
                        "Snapshot gap for {}: read tick {} behind watermark {}",
                        id,
                        s1,
                        previous
                    );
                }
            }

            entries.push(FullEntry {
                base: history.base().clone(),
                interpolation,
            });
        }

        FullSnapshot {
            tick: target,
            entries,
        }
    }

    pub fn get_current_snapshot(&self) -> CurrentSnapshot {
        let entries = self
            .histories
            .values()
            .filter_map(|history| {
                history.latest().map(|(tick, body)| CurrentEntry {
                    base: history.base().clone(),
                    tick,
                    body: body.clone(),
                })
            })
            .collect();
        CurrentSnapshot { entries }
    }

    /// Writes every history as pretty JSON.
    pub fn dump<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        let histories: Vec<&History> = self.histories.values().collect();
        serde_json::to_writer_pretty(writer, &histories)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::snapshot::EntityKind;

    fn player(owner: i32) -> BaseData {
        BaseData::new(EntityId::player(owner))
    }

    fn bullet(index: i32) -> BaseData {
        BaseData::new(EntityId::new(EntityKind::Bullet, 0, index))
    }

    #[test]
    fn test_update_snapshot_quantizes() {
        let mut store = SnapshotStore::default();
        assert_eq!(store.update_snapshot(player(1), Body::new(4, 0)).unwrap(), 40);
        assert_eq!(store.update_snapshot(player(1), Body::new(4, 0)).unwrap(), 41);
        assert_eq!(store.update_snapshot(player(2), Body::new(4, 0)).unwrap(), 40);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_collision_leaves_no_empty_history() {
        let mut store = SnapshotStore::default();
        let id = EntityId::player(1);
        let record = BodyRecord::full(&Body::new(1, 0));
        store.insert_remote(id, None, 10, &record).unwrap();

        let changed = BodyRecord::full(&Body::new(1, 2));
        assert!(matches!(
            store.insert_remote(id, None, 10, &changed),
            Err(SnapshotError::TickCollision { .. })
        ));

        let delta = BodyRecord {
            frame: 1,
            hp: Some(3),
            ..Default::default()
        };
        let other = EntityId::player(9);
        assert!(matches!(
            store.insert_remote(other, None, 10, &delta),
            Err(SnapshotError::MissingBase { .. })
        ));
        assert!(store.history(&other).is_none());
    }

    #[test]
    fn test_remote_collision_is_dropped() {
        let mut store = SnapshotStore::default();
        let id = EntityId::player(1);
        let first = Body::new(1, 0).with_hp(10, 10);
        store
            .insert_remote(id, None, 10, &BodyRecord::full(&first))
            .unwrap();

        let clash = BodyRecord::full(&Body::new(1, 0).with_hp(4, 10));
        assert!(matches!(
            store.insert_remote(id, None, 10, &clash),
            Err(SnapshotError::TickCollision { tick: 10, .. })
        ));

        let next = Body::new(2, 0).with_hp(9, 10);
        assert_eq!(
            store.insert_remote(id, None, 11, &BodyRecord::full(&next)),
            Ok(11)
        );
        let history = store.history(&id).unwrap();
        assert_eq!(history.states().keys().copied().collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(history.get(10), Some(&first));
    }

    #[test]
    fn test_stale_present_spares_newer_transients() {
        let mut store = SnapshotStore::default();
        let shot = bullet(3);

        let mut spawned = WorldSnapshot::new(20);
        spawned.push(EntityRecord::full(&shot, 20, &Body::new(2, 0)));
        assert_eq!(store.apply_world(&spawned), 1);

        let mut stale = WorldSnapshot::new(10);
        stale.present = Some(Vec::new());
        store.apply_world(&stale);
        assert!(store.history(&shot.id).is_some());

        let mut later = WorldSnapshot::new(30);
        later.present = Some(Vec::new());
        store.apply_world(&later);
        assert!(store.history(&shot.id).is_none());
    }

    #[test]
    fn test_insert_remote_duplicate() {
        let mut store = SnapshotStore::default();
        let id = EntityId::player(1);
        let record = BodyRecord::full(&Body::at(1, 0, Vec2::ONE));
        assert_eq!(store.insert_remote(id, None, 10, &record), Ok(10));
        assert_eq!(
            store.insert_remote(id, None, 10, &record),
            Err(SnapshotError::Duplicate { id, tick: 10 })
        );
    }

    #[test]
    fn test_delta_applies_onto_earlier_state() {
        let mut store = SnapshotStore::default();
        let id = EntityId::player(1);
        let first = Body::at(1, 0, Vec2::new(1.0, 1.0)).with_hp(10, 10);
        store
            .insert_remote(id, None, 10, &BodyRecord::full(&first))
            .unwrap();

        let delta = BodyRecord {
            frame: 2,
            hp: Some(7),
            ..Default::default()
        };
        store.insert_remote(id, None, 20, &delta).unwrap();

        let current = store.get_current_snapshot();
        let entry = current.get(&id).unwrap();
        assert_eq!(entry.tick, 20);
        assert_eq!(entry.body.hp, 7);
        assert_eq!(entry.body.position, Vec2::new(1.0, 1.0));
    }

    #[test]
    fn test_remove_missing_only_touches_transient() {
        let mut store = SnapshotStore::default();
        store.update_snapshot(player(1), Body::new(1, 0)).unwrap();
        store.update_snapshot(bullet(1), Body::new(1, 0)).unwrap();
        store.update_snapshot(bullet(2), Body::new(1, 0)).unwrap();

        let removed = store.remove_missing_snapshots(&[EntityId::new(EntityKind::Bullet, 0, 2)]);
        assert_eq!(removed, 1);
        assert!(store.history(&EntityId::player(1)).is_some());
        assert!(store.history(&EntityId::new(EntityKind::Bullet, 0, 2)).is_some());
    }

    #[test]
    fn test_remove_forgets_identity() {
        let mut store = SnapshotStore::default();
        store.update_snapshot(player(1), Body::new(1, 0)).unwrap();
        assert!(store.remove(&EntityId::player(1)).is_some());
        assert!(store.remove(&EntityId::player(1)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_zap_non_positive_is_noop() {
        let mut store = SnapshotStore::default();
        store.update_snapshot(player(1), Body::new(0, 0)).unwrap();
        store.update_snapshot(player(1), Body::new(1, 0)).unwrap();
        assert_eq!(store.zap_snapshots(0), 0);
        assert_eq!(store.zap_snapshots(-5), 0);
        assert_eq!(store.zap_snapshots(5), 1);
        assert_eq!(store.history(&EntityId::player(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_full_snapshot_updates_watermark() {
        let mut store = SnapshotStore::default();
        for frame in 1..=3 {
            store.update_snapshot(player(1), Body::new(frame, 0)).unwrap();
        }

        let full = store.get_full_snapshot(25, false);
        let sip = full.get(&EntityId::player(1)).unwrap();
        assert_eq!(sip.s1_tick(), Some(20));
        assert_eq!(
            store.history(&EntityId::player(1)).unwrap().last_full_snap(),
            20
        );

        // reading backwards keeps the watermark
        store.get_full_snapshot(12, false);
        assert_eq!(
            store.history(&EntityId::player(1)).unwrap().last_full_snap(),
            20
        );
    }

    #[test]
    fn test_next_full_snapshot_steps() {
        let mut store = SnapshotStore::default();
        for frame in 1..=3 {
            store.update_snapshot(player(1), Body::new(frame, 0)).unwrap();
        }
        let id = EntityId::player(1);

        let ticks: Vec<_> = (0..4)
            .map(|_| store.get_full_snapshot(100, true).get(&id).and_then(|s| s.s1_tick()))
            .collect();
        assert_eq!(ticks, vec![Some(10), Some(20), Some(30), Some(30)]);
    }

    #[test]
    fn test_current_snapshot_to_wire() {
        let mut store = SnapshotStore::default();
        store.update_snapshot(player(1), Body::new(2, 0)).unwrap();
        store.update_snapshot(bullet(4), Body::new(2, 0)).unwrap();

        let wire = store.get_current_snapshot().to_wire(20);
        assert_eq!(wire.players.len(), 1);
        assert_eq!(wire.bullets.len(), 1);
        assert_eq!(wire.present_ids(), Some(vec![bullet(4).id]));
    }

    #[test]
    fn test_dump_is_json() {
        let mut store = SnapshotStore::default();
        store.update_snapshot(player(1), Body::new(1, 0)).unwrap();

        let mut out = Vec::new();
        store.dump(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value.as_array().map(|a| a.len()), Some(1));
        assert!(value[0]["states"]["10"].is_object());
    }
}
