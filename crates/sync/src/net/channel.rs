use std::time::{Duration, Instant};

use super::protocol::{Packet, PacketError, PacketFlags, PacketHeader, PacketType};
use super::tracking::{AckTracker, ReceiveTracker};

/// Sequencing and acknowledgement state towards one peer. Each channel owns
/// its own sequence counter.
#[derive(Debug)]
pub struct Channel {
    next_sequence: u32,
    ack_tracker: AckTracker,
    receive_tracker: ReceiveTracker,
    last_receive: Instant,
    resent: u64,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    pub fn new() -> Self {
        Self {
            // sequence 0 would be acked by an empty ack field
            next_sequence: 1,
            ack_tracker: AckTracker::new(256),
            receive_tracker: ReceiveTracker::new(),
            last_receive: Instant::now(),
            resent: 0,
        }
    }

    pub fn next_packet(&mut self, payload: PacketType, tick: i64) -> Packet {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);

        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        Packet::new(PacketHeader::new(sequence, ack, ack_bitfield).with_tick(tick), payload)
    }

    /// Builds, encodes and tracks one packet. Reliable packets are retained
    /// for resending until acked.
    pub fn encode(
        &mut self,
        payload: PacketType,
        tick: i64,
        flags: PacketFlags,
    ) -> Result<Vec<u8>, PacketError> {
        let packet = self.next_packet(payload, tick);
        let data = packet.encode(flags)?;

        if flags.contains(PacketFlags::RELIABLE) {
            self.ack_tracker
                .track_reliable(packet.header.sequence, data.clone());
        } else {
            self.ack_tracker.track_packet(packet.header.sequence);
        }
        Ok(data)
    }

    /// Registers an inbound header. False for a duplicate the caller should
    /// drop.
    pub fn accept(&mut self, header: &PacketHeader) -> bool {
        if !self.receive_tracker.record_received(header.sequence) {
            return false;
        }
        self.ack_tracker.process_ack(header.ack, header.ack_bitfield);
        self.last_receive = Instant::now();
        true
    }

    pub fn resends(&mut self, now: Instant, max_resends: u32) -> Vec<Vec<u8>> {
        let out = self.ack_tracker.due_resends(now, max_resends);
        self.resent += out.len() as u64;
        out
    }

    pub fn rtt_ms(&self) -> f32 {
        self.ack_tracker.srtt()
    }

    pub fn rtt_var(&self) -> f32 {
        self.ack_tracker.rtt_var()
    }

    pub fn unacked_reliable(&self) -> usize {
        self.ack_tracker.unacked_reliable()
    }

    pub fn resent(&self) -> u64 {
        self.resent
    }

    pub fn touch(&mut self) {
        self.last_receive = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive.elapsed() > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_per_channel() {
        let mut a = Channel::new();
        let mut b = Channel::new();
        assert_eq!(a.next_packet(PacketType::Ready, 0).header.sequence, 1);
        assert_eq!(a.next_packet(PacketType::Ready, 0).header.sequence, 2);
        assert_eq!(b.next_packet(PacketType::Ready, 0).header.sequence, 1);
    }

    #[test]
    fn test_ack_clears_reliable() {
        let mut sender = Channel::new();
        let mut receiver = Channel::new();

        let data = sender
            .encode(PacketType::RequestFull, 10, PacketFlags::RELIABLE)
            .unwrap();
        assert_eq!(sender.unacked_reliable(), 1);

        let (packet, flags) = Packet::decode(&data).unwrap();
        assert!(flags.contains(PacketFlags::RELIABLE));
        assert!(receiver.accept(&packet.header));
        assert!(!receiver.accept(&packet.header));

        let reply = receiver.next_packet(PacketType::Ready, 0);
        assert!(sender.accept(&reply.header));
        assert_eq!(sender.unacked_reliable(), 0);
    }
}
