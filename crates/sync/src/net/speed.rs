use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const MAX_SEND_FPS: u32 = 30;

/// RTT (ms) at or above which the send rate is capped to the paired fps.
const RTT_LIMITS: [(u32, u32); 4] = [(30, 30), (75, 24), (150, 20), (200, 15)];

const BAD_REPEAT_WINDOW: Duration = Duration::from_secs(5);
const GOOD_RECOVERY_WINDOW: Duration = Duration::from_secs(5);
const PEER_WINDOW: Duration = Duration::from_secs(10);

/// Outbound rate control driven by RTT samples.
///
/// A bad sample lowers the rate and holds it for `delay`. Going bad again
/// within five seconds doubles the delay (up to 10 s); five seconds of good
/// samples halve it (down to 1 s).
#[derive(Debug, Clone)]
pub struct SendRate {
    fps: u32,
    max_fps: u32,
    delay: Duration,
    current_rtt: u32,
    last_sent: Option<Instant>,
    last_bad: Option<Instant>,
    last_good: Option<Instant>,
    next_good: Option<Instant>,
    received: VecDeque<Instant>,
}

impl Default for SendRate {
    fn default() -> Self {
        Self::new(MAX_SEND_FPS)
    }
}

impl SendRate {
    pub fn new(max_fps: u32) -> Self {
        let max_fps = max_fps.clamp(1, MAX_SEND_FPS);
        Self {
            fps: max_fps,
            max_fps,
            delay: Duration::from_millis(2000),
            current_rtt: 0,
            last_sent: None,
            last_bad: None,
            last_good: None,
            next_good: None,
            received: VecDeque::new(),
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn current_rtt(&self) -> u32 {
        self.current_rtt
    }

    fn limit_for(rtt: u32) -> Option<u32> {
        RTT_LIMITS
            .iter()
            .rev()
            .find(|(min_rtt, _)| rtt >= *min_rtt)
            .map(|(_, fps)| *fps)
    }

    pub fn add_rtt(&mut self, rtt: u32, now: Instant) {
        self.record_received(now);
        self.current_rtt = rtt;

        if let Some(limit) = Self::limit_for(rtt) {
            let repeated = self
                .last_bad
                .is_some_and(|bad| now.duration_since(bad) < BAD_REPEAT_WINDOW);
            if self.fps != self.max_fps && repeated {
                self.delay = (self.delay * 2).min(Duration::from_secs(10));
            }

            self.next_good = Some(now + self.delay);
            self.last_bad = Some(now);
            self.last_good = None;

            let limit = limit.min(self.max_fps);
            if limit < self.fps {
                log::debug!("RTT {}ms, send rate {} -> {} fps", rtt, self.fps, limit);
                self.fps = limit;
            }
            return;
        }

        if self.next_good.is_some_and(|deadline| now < deadline) {
            return;
        }

        if self.fps != self.max_fps {
            log::debug!("RTT {}ms, send rate {} -> {} fps", rtt, self.fps, self.max_fps);
            self.fps = self.max_fps;
        }

        match self.last_good {
            None => self.last_good = Some(now),
            Some(good) if now.duration_since(good) >= GOOD_RECOVERY_WINDOW => {
                self.delay = (self.delay / 2).max(Duration::from_secs(1));
                self.last_good = Some(now);
            }
            Some(_) => {}
        }
    }

    /// Counts an inbound packet towards the peer rate.
    pub fn record_received(&mut self, now: Instant) {
        self.received.push_back(now);
        while self
            .received
            .front()
            .is_some_and(|t| now.duration_since(*t) > PEER_WINDOW)
        {
            self.received.pop_front();
        }
    }

    /// Packets per second received from the peer over the last ten seconds.
    pub fn peer_fps(&self) -> f32 {
        self.received.len() as f32 / PEER_WINDOW.as_secs_f32()
    }

    pub fn ready_to_send(&self, now: Instant) -> bool {
        let interval = Duration::from_secs(1) / self.fps.max(1);
        self.last_sent
            .is_none_or(|sent| now.duration_since(sent) >= interval)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        assert_eq!(SendRate::limit_for(10), None);
        assert_eq!(SendRate::limit_for(30), Some(30));
        assert_eq!(SendRate::limit_for(100), Some(24));
        assert_eq!(SendRate::limit_for(180), Some(20));
        assert_eq!(SendRate::limit_for(900), Some(15));
    }

    #[test]
    fn test_bad_rtt_drops_and_holds() {
        let mut rate = SendRate::default();
        let start = Instant::now();

        rate.add_rtt(250, start);
        assert_eq!(rate.fps(), 15);

        rate.add_rtt(10, start + Duration::from_millis(500));
        assert_eq!(rate.fps(), 15);

        rate.add_rtt(10, start + Duration::from_millis(2100));
        assert_eq!(rate.fps(), MAX_SEND_FPS);
    }

    #[test]
    fn test_repeated_bad_doubles_delay() {
        let mut rate = SendRate::default();
        let start = Instant::now();

        rate.add_rtt(250, start);
        rate.add_rtt(250, start + Duration::from_secs(1));
        assert_eq!(rate.delay(), Duration::from_millis(4000));

        for n in 2..6 {
            rate.add_rtt(250, start + Duration::from_secs(n));
        }
        assert_eq!(rate.delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_good_period_halves_delay() {
        let mut rate = SendRate::default();
        let start = Instant::now();

        rate.add_rtt(250, start);
        rate.add_rtt(250, start + Duration::from_secs(1));
        assert_eq!(rate.delay(), Duration::from_millis(4000));

        // hold expires at 5s, then five good seconds
        rate.add_rtt(5, start + Duration::from_secs(6));
        rate.add_rtt(5, start + Duration::from_secs(11));
        assert_eq!(rate.delay(), Duration::from_millis(2000));
    }

    #[test]
    fn test_ready_to_send_paces() {
        let mut rate = SendRate::new(20);
        let now = Instant::now();
        assert!(rate.ready_to_send(now));
        rate.mark_sent(now);
        assert!(!rate.ready_to_send(now + Duration::from_millis(20)));
        assert!(rate.ready_to_send(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_peer_fps_window() {
        let mut rate = SendRate::default();
        let start = Instant::now();
        for n in 0..20 {
            rate.record_received(start + Duration::from_millis(n * 100));
        }
        assert!((rate.peer_fps() - 2.0).abs() < f32::EPSILON);

        rate.record_received(start + Duration::from_secs(12));
        assert!((rate.peer_fps() - 0.1).abs() < 1e-6);
    }
}
