use std::collections::BTreeMap;

use serde::Serialize;

use crate::net::{BodyRecord, CodecError};

use super::body::Body;
use super::identity::BaseData;
use super::interpolation::{Interpolation, bracket};
use super::store::SnapshotError;

/// Tick-ordered states of one identity.
#[derive(Debug, Clone, Serialize)]
pub struct History {
    base: BaseData,
    states: BTreeMap<i64, Body>,
    last_full_snap: i64,
    #[serde(skip)]
    last_tick: i64,
    /// Wire records of the states that were filled in from an earlier one.
    #[serde(skip)]
    deltas: BTreeMap<i64, BodyRecord>,
}

impl History {
    pub(crate) fn new(base: BaseData) -> Self {
        Self {
            base,
            states: BTreeMap::new(),
            last_full_snap: -1,
            last_tick: -1,
            deltas: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &BaseData {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut BaseData {
        &mut self.base
    }

    pub fn states(&self) -> &BTreeMap<i64, Body> {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn latest(&self) -> Option<(i64, &Body)> {
        self.states.last_key_value().map(|(k, b)| (*k, b))
    }

    pub fn get(&self, tick: i64) -> Option<&Body> {
        self.states.get(&tick)
    }

    /// Newest state strictly older than `tick`.
    pub fn before(&self, tick: i64) -> Option<(i64, &Body)> {
        self.states.range(..tick).next_back().map(|(k, b)| (*k, b))
    }

    pub fn last_tick(&self) -> i64 {
        self.last_tick
    }

    pub fn last_full_snap(&self) -> i64 {
        self.last_full_snap
    }

    /// Inserts at the first free key from `start`, trying at most
    /// `max_probe + 1` keys.
    pub(crate) fn insert_from(&mut self, start: i64, body: Body, max_probe: i64) -> Option<i64> {
        let tick = (start..=start.saturating_add(max_probe.max(0)))
            .find(|tick| !self.states.contains_key(tick))?;
        self.states.insert(tick, body);
        self.last_tick = self.last_tick.max(tick);
        Some(tick)
    }

    /// Stores an authority record at exactly `tick`. A delta is applied onto
    /// the newest older state, or the newest state when nothing older has
    /// arrived yet. Every later delta-filled state up to the next complete
    /// one is then rebuilt, so late packets end in the same history as
    /// packets that arrived in order.
    pub(crate) fn insert_remote(&mut self, tick: i64, record: &BodyRecord) -> Result<i64, SnapshotError> {
        let id = self.base.id;
        let complete = record.is_complete();

        if let Some(existing) = self.states.get(&tick) {
            let same = match self.deltas.get(&tick) {
                Some(raw) => raw == record,
                None => complete && record.apply(None).ok().as_ref() == Some(existing),
            };
            return Err(if same {
                SnapshotError::Duplicate { id, tick }
            } else {
                SnapshotError::TickCollision { id, tick, probe: 0 }
            });
        }

        let previous = if complete {
            None
        } else {
            self.before(tick).or_else(|| self.latest()).map(|(_, body)| body)
        };
        let body = record.apply(previous).map_err(|err| match err {
            CodecError::Incomplete(_) => SnapshotError::MissingBase { id, tick },
            other => SnapshotError::Codec(other),
        })?;

        self.states.insert(tick, body);
        if !complete {
            self.deltas.insert(tick, record.clone());
        }
        self.last_tick = self.last_tick.max(tick);
        self.rebuild_after(tick);
        Ok(tick)
    }

    fn rebuild_after(&mut self, tick: i64) {
        let later: Vec<i64> = self
            .states
            .range(tick.saturating_add(1)..)
            .map(|(k, _)| *k)
            .collect();

        for key in later {
            let rebuilt = match (self.deltas.get(&key), self.before(key)) {
                (Some(record), Some((_, previous))) => record.apply(Some(previous)),
                _ => break,
            };
            match rebuilt {
                Ok(body) => {
                    self.states.insert(key, body);
                }
                Err(err) => {
                    log::warn!("Cannot rebuild {} at tick {}: {}", self.base.id, key, err);
                    break;
                }
            }
        }
    }

    /// Quantized insert: never hands out a tick at or below the last one.
    pub(crate) fn insert_quantized(&mut self, body: Body, scale: i64, max_probe: i64) -> Option<i64> {
        let scaled = body.frame.saturating_mul(scale);
        let start = scaled.max(self.last_tick + 1);
        self.insert_from(start, body, max_probe)
    }

    /// Drops keys <= `tick`, keeping the newest entry so the history is
    /// never empty.
    pub(crate) fn zap(&mut self, tick: i64) -> usize {
        let before = self.states.len();
        let keep = self.states.split_off(&(tick.saturating_add(1)));
        if keep.is_empty() {
            if let Some((k, b)) = self.states.pop_last() {
                self.states.clear();
                self.states.insert(k, b);
            }
        } else {
            self.states = keep;
        }
        let states = &self.states;
        self.deltas.retain(|k, _| states.contains_key(k));
        before - self.states.len()
    }

    pub fn interpolate(&self, target: i64, find_last: bool) -> Interpolation {
        bracket(&self.states, target, find_last.then_some(self.last_full_snap))
    }

    /// Raises the watermark; returns the previous one when `tick` is below it.
    pub(crate) fn consume(&mut self, tick: i64) -> Option<i64> {
        let previous = self.last_full_snap;
        self.last_full_snap = previous.max(tick);
        (tick < previous).then_some(previous)
    }
}
