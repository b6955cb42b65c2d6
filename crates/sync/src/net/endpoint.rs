use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::channel::Channel;
use super::protocol::{MAX_PACKET_SIZE, Packet, PacketError, PacketFlags, PacketType};
use super::stats::{NetworkStats, PacketLossSimulation};

#[derive(Debug)]
pub struct Received {
    pub packet: Packet,
    pub flags: PacketFlags,
    pub addr: SocketAddr,
}

/// Non-blocking UDP socket. Sequencing lives in [`Channel`], one per peer.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    loss_simulation: Option<PacketLossSimulation>,
    running: Arc<AtomicBool>,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            loss_simulation: None,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn set_loss_simulation(&mut self, sim: Option<PacketLossSimulation>) {
        self.loss_simulation = sim;
    }

    pub fn send_raw(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if self
            .loss_simulation
            .as_ref()
            .is_some_and(PacketLossSimulation::should_drop)
        {
            self.stats.packets_dropped += 1;
            return Ok(0);
        }

        let bytes = self.socket.send_to(data, addr)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    pub fn send(
        &mut self,
        channel: &mut Channel,
        payload: PacketType,
        tick: i64,
        flags: PacketFlags,
        addr: SocketAddr,
    ) -> io::Result<usize> {
        let data = channel
            .encode(payload, tick, flags)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send_raw(&data, addr)
    }

    pub fn resend(
        &mut self,
        channel: &mut Channel,
        addr: SocketAddr,
        max_resends: u32,
    ) -> io::Result<usize> {
        let resends = channel.resends(Instant::now(), max_resends);
        let count = resends.len();
        for data in resends {
            self.send_raw(&data, addr)?;
        }
        self.stats.packets_resent += count as u64;
        Ok(count)
    }

    /// Drains the socket. Malformed datagrams are logged and skipped.
    pub fn receive(&mut self) -> io::Result<Vec<Received>> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => match Packet::decode(&self.recv_buffer[..size]) {
                    Ok((packet, flags)) => {
                        self.stats.packets_received += 1;
                        self.stats.bytes_received += size as u64;
                        packets.push(Received {
                            packet,
                            flags,
                            addr,
                        });
                    }
                    Err(err @ PacketError::UnknownTag(_)) => {
                        log::warn!("Dropping datagram from {}: {}", addr, err);
                        self.stats.packets_dropped += 1;
                    }
                    Err(err) => {
                        log::debug!("Dropping datagram from {}: {}", addr, err);
                        self.stats.packets_dropped += 1;
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable surfaces here on some platforms
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(packets)
    }

    pub fn update_rtt(&mut self, channel: &Channel) {
        self.stats.rtt_ms = channel.rtt_ms();
        self.stats.rtt_variance = channel.rtt_var();
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
