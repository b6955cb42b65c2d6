use std::collections::BTreeMap;

use crate::config::SyncConfig;

use super::body::Body;

/// Bracket around one target tick for a single identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interpolation {
    pub s1: Option<(i64, Body)>,
    pub s2: Option<(i64, Body)>,
    pub last: Option<(i64, Body)>,
    pub current: i64,
}

/// Locates `s1` (latest key <= target), `s2` (earliest key > target) and the
/// newest entry. With `after`, `s1` is taken from the first entry newer than
/// `after` when one exists at or below the target.
pub fn bracket(states: &BTreeMap<i64, Body>, target: i64, after: Option<i64>) -> Interpolation {
    let last = states.last_key_value().map(|(k, b)| (*k, b.clone()));

    let next_unread = after
        .filter(|a| *a < target)
        .and_then(|a| states.range(a + 1..=target).next());

    let s1 = next_unread
        .or_else(|| states.range(..=target).next_back())
        .map(|(k, b)| (*k, b.clone()));

    let s2 = states
        .range(target.saturating_add(1)..)
        .next()
        .map(|(k, b)| (*k, b.clone()));

    Interpolation {
        s1,
        s2,
        last,
        current: target,
    }
}

impl Interpolation {
    pub fn s1_tick(&self) -> Option<i64> {
        self.s1.as_ref().map(|(k, _)| *k)
    }

    pub fn s2_tick(&self) -> Option<i64> {
        self.s2.as_ref().map(|(k, _)| *k)
    }

    pub fn last_tick(&self) -> Option<i64> {
        self.last.as_ref().map(|(k, _)| *k)
    }

    /// Ticks of history buffered past the target. Zero means the reader has
    /// caught up with the newest state and is holding.
    pub fn lead(&self) -> i64 {
        self.last_tick()
            .map(|k| (k - self.current).max(0))
            .unwrap_or(0)
    }

    /// Renderable state at `current`. Blends position only between compatible
    /// states and never extrapolates past `s1`.
    pub fn sample(&self, config: &SyncConfig) -> Option<Body> {
        match (&self.s1, &self.s2) {
            (Some((k1, b1)), Some((k2, b2))) => {
                let span = k2 - k1;
                if span <= 0 {
                    return Some(b1.clone());
                }
                let dt = config.tick_to_secs(span);
                if b2.can_interpolate_from(b1, dt, config.position_tolerance) {
                    let t = (self.current - k1) as f32 / span as f32;
                    Some(b1.lerp(b2, t))
                } else {
                    Some(b1.clone())
                }
            }
            (Some((_, b1)), None) => Some(b1.clone()),
            (None, Some((_, b2))) => Some(b2.clone()),
            (None, None) => self.last.as_ref().map(|(_, b)| b.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn history() -> BTreeMap<i64, Body> {
        let mut states = BTreeMap::new();
        states.insert(10, Body::at(1, 0, Vec2::new(1.0, 0.0)));
        states.insert(20, Body::at(2, 0, Vec2::new(2.0, 0.0)));
        states.insert(30, Body::at(3, 0, Vec2::new(3.0, 0.0)));
        states
    }

    #[test]
    fn test_bracket_between() {
        let states = history();
        let sip = bracket(&states, 25, None);
        assert_eq!(sip.s1_tick(), Some(20));
        assert_eq!(sip.s2_tick(), Some(30));
        assert_eq!(sip.last_tick(), Some(30));
        assert_eq!(sip.s1.map(|(_, b)| b.frame), Some(2));
    }

    #[test]
    fn test_bracket_before_first() {
        let sip = bracket(&history(), 5, None);
        assert!(sip.s1.is_none());
        assert_eq!(sip.s2_tick(), Some(10));
    }

    #[test]
    fn test_bracket_after_last() {
        let sip = bracket(&history(), 35, None);
        assert_eq!(sip.s1_tick(), Some(30));
        assert!(sip.s2.is_none());
        assert_eq!(sip.lead(), 0);
    }

    #[test]
    fn test_bracket_exact_key() {
        let sip = bracket(&history(), 20, None);
        assert_eq!(sip.s1_tick(), Some(20));
        assert_eq!(sip.s2_tick(), Some(30));
    }

    #[test]
    fn test_next_unread_does_not_skip() {
        let states = history();
        let sip = bracket(&states, 35, Some(10));
        assert_eq!(sip.s1_tick(), Some(20));

        let sip = bracket(&states, 35, Some(30));
        assert_eq!(sip.s1_tick(), Some(30));
    }

    #[test]
    fn test_sample_blends_and_holds() {
        let mut config = SyncConfig::default();
        config.position_tolerance = 2.0;
        let states = history();

        let body = bracket(&states, 25, None).sample(&config).unwrap();
        assert!((body.position.x - 2.5).abs() < 1e-5);

        let body = bracket(&states, 35, None).sample(&config).unwrap();
        assert_eq!(body.position.x, 3.0);

        let body = bracket(&states, 5, None).sample(&config).unwrap();
        assert_eq!(body.position.x, 1.0);
    }

    #[test]
    fn test_sample_snaps_on_discontinuity() {
        let config = SyncConfig::default();
        let mut states = BTreeMap::new();
        states.insert(10, Body::at(1, 0, Vec2::ZERO).with_hp(10, 10));
        states.insert(20, Body::at(2, 0, Vec2::new(100.0, 0.0)).with_hp(10, 10));

        let body = bracket(&states, 15, None).sample(&config).unwrap();
        assert_eq!(body.position, Vec2::ZERO);
    }
}
