use std::collections::BTreeSet;

use glam::Vec2;
use proptest::prelude::*;

use rpgsync::net::{BodyRecord, EntityRecord};
use rpgsync::{BaseData, Body, DeltaEncoder, EntityId, SnapshotStore};

fn body(frame: i64) -> Body {
    Body::at(frame, 0, Vec2::new(frame as f32, 0.0))
}

/// Deterministic xorshift permutation.
fn shuffle<T>(items: &[T], seed: u64) -> Vec<&T> {
    let mut out: Vec<&T> = items.iter().collect();
    let mut state = seed | 1;
    for i in (1..out.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.swap(i, (state % (i as u64 + 1)) as usize);
    }
    out
}

proptest! {
    #[test]
    fn prop_ticks_strictly_increase(frames in prop::collection::vec(0i64..200, 1..128)) {
        let mut store = SnapshotStore::default();
        let base = BaseData::new(EntityId::player(1));

        let mut previous = i64::MIN;
        for frame in &frames {
            let tick = store.update_snapshot(base.clone(), body(*frame)).unwrap();
            prop_assert!(tick > previous);
            prop_assert!(tick >= frame * store.tick_scale());
            previous = tick;
        }

        let history = store.history(&base.id).unwrap();
        prop_assert_eq!(history.len(), frames.len());
    }

    #[test]
    fn prop_arrival_order_is_irrelevant(
        steps in prop::collection::vec((0u8..3, 0u8..3), 2..64),
        seed in any::<u64>(),
    ) {
        let id = EntityId::player(3);
        let base = BaseData::new(id);
        let mut encoder = DeltaEncoder::new();
        let mut records: Vec<EntityRecord> = Vec::new();

        let mut state = body(0).with_hp(200, 200);
        for (step, (moved, hurt)) in steps.iter().enumerate() {
            let frame = step as i64 + 1;
            state.frame = frame;
            state.position.x += *moved as f32;
            state.hp -= *hurt as i32;
            if *hurt == 2 {
                state.ammo += 1;
            }
            encoder.append_snapshot(&(base.clone(), state.clone()), frame * 10, step == 0);
            for outbound in encoder.take_batch() {
                records.extend(outbound.snapshot.records().cloned());
            }
        }

        // the opening keyframe has to land first; the deltas may come in any order
        let (first, deltas) = records.split_first().unwrap();
        let shuffled = shuffle(deltas, seed);

        let mut in_order = SnapshotStore::default();
        let mut out_of_order = SnapshotStore::default();
        for record in std::iter::once(first).chain(deltas) {
            in_order.insert_remote(id, None, record.tick, &record.state).unwrap();
        }
        for record in std::iter::once(first).chain(shuffled) {
            out_of_order.insert_remote(id, None, record.tick, &record.state).unwrap();
        }

        prop_assert_eq!(
            in_order.history(&id).unwrap().states(),
            out_of_order.history(&id).unwrap().states()
        );
        prop_assert_eq!(
            in_order.get_current_snapshot(),
            out_of_order.get_current_snapshot()
        );
        let newest = in_order.get_current_snapshot().get(&id).unwrap().body.clone();
        prop_assert_eq!(Some(&newest), encoder.last_sent(&id));
    }

    #[test]
    fn prop_bracket_surrounds_target(
        ticks in prop::collection::btree_set(0i64..1000, 1..32),
        target in -10i64..1100,
    ) {
        let mut store = SnapshotStore::default();
        let id = EntityId::player(1);
        for tick in &ticks {
            store
                .insert_remote(id, None, *tick, &BodyRecord::full(&body(*tick)))
                .unwrap();
        }

        let full = store.get_full_snapshot(target, false);
        let sip = full.get(&id).unwrap();
        let keys: BTreeSet<i64> = ticks;

        prop_assert_eq!(sip.s1_tick(), keys.range(..=target).next_back().copied());
        prop_assert_eq!(sip.s2_tick(), keys.range(target + 1..).next().copied());
        prop_assert_eq!(sip.last_tick(), keys.last().copied());
    }
}
