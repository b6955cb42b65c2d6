use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::net::{BodyRecord, ChatMessage, EntityRecord, FinalResult, WorldSnapshot};
use crate::snapshot::{BaseData, Body, CurrentEntry, EntityId};

/// Records per world snapshot datagram; keeps packets under the MTU.
pub const MAX_RECORDS_PER_SNAPSHOT: usize = 6;

/// Anything whose current state can be replicated.
pub trait SnapshotSource {
    fn base(&self) -> &BaseData;
    fn body(&self) -> &Body;
}

impl SnapshotSource for CurrentEntry {
    fn base(&self) -> &BaseData {
        &self.base
    }

    fn body(&self) -> &Body {
        &self.body
    }
}

impl SnapshotSource for (BaseData, Body) {
    fn base(&self) -> &BaseData {
        &self.0
    }

    fn body(&self) -> &Body {
        &self.1
    }
}

/// Wall-clock keyframe cadence, independent of frame rate.
#[derive(Debug, Clone)]
pub struct KeyframeClock {
    interval: Duration,
    last: Option<Instant>,
}

impl KeyframeClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Makes the next `due` fire regardless of the interval.
    pub fn force(&mut self) {
        self.last = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSnapshot {
    pub snapshot: WorldSnapshot,
    /// Keyframe chunks go reliably, deltas do not.
    pub keyframe: bool,
}

#[derive(Debug, Default)]
pub struct DeltaEncoder {
    last_sent: HashMap<EntityId, Body>,
    keyframe_required: bool,
    keyframe_round: bool,
    keyframes: Vec<EntityRecord>,
    deltas: Vec<EntityRecord>,
    message: Option<ChatMessage>,
    result: Option<FinalResult>,
    tick: i64,
}

impl DeltaEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the payload of `source` for `tick`. Forced or first-time
    /// appends carry every field; otherwise only changed fields are sent and
    /// an unchanged payload appends nothing. Returns whether a record was
    /// appended.
    pub fn append_snapshot<S: SnapshotSource + ?Sized>(
        &mut self,
        source: &S,
        tick: i64,
        forced: bool,
    ) -> bool {
        let base = source.base();
        let body = source.body();
        let forced = forced || self.keyframe_required;

        match self.last_sent.get(&base.id) {
            Some(previous) if !forced => {
                let Some(state) = BodyRecord::diff(previous, body) else {
                    return false;
                };
                self.deltas.push(EntityRecord {
                    id: base.id.into(),
                    tick,
                    base: None,
                    state,
                });
            }
            _ => {
                self.keyframes.push(EntityRecord::full(base, tick, body));
                self.keyframe_round |= forced;
            }
        }

        self.last_sent.insert(base.id, body.clone());
        self.tick = self.tick.max(tick);
        true
    }

    pub fn require_keyframe(&mut self) {
        self.keyframe_required = true;
    }

    pub fn keyframe_required(&self) -> bool {
        self.keyframe_required
    }

    pub fn last_sent(&self, id: &EntityId) -> Option<&Body> {
        self.last_sent.get(id)
    }

    /// Stops tracking a retired identity.
    pub fn forget(&mut self, id: &EntityId) {
        self.last_sent.remove(id);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_message(&mut self, message: ChatMessage) {
        self.message = Some(message);
    }

    pub fn set_result(&mut self, result: FinalResult) {
        self.result = Some(result);
    }

    pub fn has_pending(&self) -> bool {
        !self.keyframes.is_empty()
            || !self.deltas.is_empty()
            || self.message.is_some()
            || self.result.is_some()
    }

    /// Drains everything appended since the last call into MTU-sized world
    /// snapshots. The first keyframe chunk of a forced round lists every live
    /// transient identity.
    pub fn take_batch(&mut self) -> Vec<OutboundSnapshot> {
        let tick = self.tick;
        let mut out = Vec::new();

        let mut reliable = chunk(std::mem::take(&mut self.keyframes), tick);
        let needs_reliable =
            self.keyframe_round || self.message.is_some() || self.result.is_some();
        if reliable.is_empty() && needs_reliable {
            reliable.push(WorldSnapshot::new(tick));
        }
        if let Some(first) = reliable.first_mut() {
            if self.keyframe_round {
                first.present = Some(
                    self.last_sent
                        .keys()
                        .filter(|id| id.kind.is_transient())
                        .map(|id| (*id).into())
                        .collect(),
                );
            }
            first.message = self.message.take();
            first.result = self.result.take();
        }

        out.extend(reliable.into_iter().map(|snapshot| OutboundSnapshot {
            snapshot,
            keyframe: true,
        }));
        out.extend(
            chunk(std::mem::take(&mut self.deltas), tick)
                .into_iter()
                .map(|snapshot| OutboundSnapshot {
                    snapshot,
                    keyframe: false,
                }),
        );

        self.keyframe_required = false;
        self.keyframe_round = false;
        out
    }
}

fn chunk(records: Vec<EntityRecord>, tick: i64) -> Vec<WorldSnapshot> {
    let mut out = Vec::new();
    let mut current = WorldSnapshot::new(tick);
    for record in records {
        if current.record_count() == MAX_RECORDS_PER_SNAPSHOT {
            out.push(std::mem::replace(&mut current, WorldSnapshot::new(tick)));
        }
        current.push(record);
    }
    if current.record_count() > 0 {
        out.push(current);
    }
    out
}
