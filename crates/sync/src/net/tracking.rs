use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;

#[derive(Debug, Clone)]
struct Retained {
    data: Vec<u8>,
    last_send: Instant,
    resends: u32,
}

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub send_time: Instant,
    pub acked: bool,
    retained: Option<Retained>,
}

impl PendingPacket {
    pub fn is_reliable(&self) -> bool {
        self.retained.is_some()
    }
}

#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    given_up: u64,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
            given_up: 0,
        }
    }

    pub fn track_packet(&mut self, sequence: u32) {
        self.push(sequence, None);
    }

    /// Tracks a packet whose bytes are kept for resending until acked.
    pub fn track_reliable(&mut self, sequence: u32, data: Vec<u8>) {
        let retained = Retained {
            data,
            last_send: Instant::now(),
            resends: 0,
        };
        self.push(sequence, Some(retained));
    }

    fn push(&mut self, sequence: u32, retained: Option<Retained>) {
        while self.pending.len() >= self.max_pending {
            if let Some(evicted) = self.pending.pop_front() {
                if !evicted.acked && evicted.is_reliable() {
                    self.given_up += 1;
                }
            }
        }

        self.pending.push_back(PendingPacket {
            sequence,
            send_time: Instant::now(),
            acked: false,
            retained,
        });
    }

    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32) -> Vec<u32> {
        let mut acked_sequences = Vec::new();
        let mut rtt_samples = Vec::new();
        let now = Instant::now();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= 32 && (ack_bitfield & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                acked_sequences.push(pending.sequence);

                // resent packets give ambiguous samples
                let resent = pending.retained.as_ref().is_some_and(|r| r.resends > 0);
                if !resent {
                    let rtt = now.duration_since(pending.send_time).as_secs_f32() * 1000.0;
                    rtt_samples.push(rtt);
                }
                pending.retained = None;
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }

        acked_sequences
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn resend_timeout(&self) -> Duration {
        Duration::from_secs_f32((self.srtt * 2.0).max(100.0) / 1000.0)
    }

    /// Bytes of unacked reliable packets whose resend timeout elapsed.
    /// Packets resent `max_resends` times are abandoned.
    pub fn due_resends(&mut self, now: Instant, max_resends: u32) -> Vec<Vec<u8>> {
        let timeout = self.resend_timeout();
        let mut out = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }
            let Some(retained) = pending.retained.as_mut() else {
                continue;
            };
            if now.duration_since(retained.last_send) < timeout {
                continue;
            }
            if retained.resends >= max_resends {
                pending.retained = None;
                self.given_up += 1;
                continue;
            }
            retained.resends += 1;
            retained.last_send = now;
            out.push(retained.data.clone());
        }

        out
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }

    pub fn unacked_reliable(&self) -> usize {
        self.pending
            .iter()
            .filter(|p| !p.acked && p.is_reliable())
            .count()
    }

    pub fn given_up(&self) -> u64 {
        self.given_up
    }
}

#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    /// False for a sequence seen recently.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            if diff < 32 {
                self.received_bitfield = (self.received_bitfield << diff) | (1 << (diff - 1));
            } else if diff == 32 {
                self.received_bitfield = 1 << 31;
            } else {
                self.received_bitfield = 0;
            }
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}
