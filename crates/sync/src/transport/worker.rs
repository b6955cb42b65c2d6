use std::collections::VecDeque;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;

use crate::config::TransportConfig;
use crate::net::{Channel, NetworkEndpoint, PacketFlags, PacketType, SendRate};

use super::session::{Reaction, Session};
use super::{AdapterEvent, Command, GameState};

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Socket side of the adapter. Owns the endpoint and the peer channel and
/// never touches the store except through the session.
pub(crate) struct Worker {
    endpoint: NetworkEndpoint,
    channel: Channel,
    session: Session,
    send_rate: SendRate,
    target: Option<SocketAddr>,
    config: TransportConfig,
    commands: UnboundedReceiver<Command>,
    events: UnboundedSender<AdapterEvent>,
    state_tx: watch::Sender<GameState>,
    rtt_tx: watch::Sender<f32>,
    outbound: VecDeque<(PacketType, PacketFlags)>,
    tick: i64,
    last_request: Option<Instant>,
    last_ping: Instant,
}

pub(crate) struct WorkerChannels {
    pub commands: UnboundedReceiver<Command>,
    pub events: UnboundedSender<AdapterEvent>,
    pub state_tx: watch::Sender<GameState>,
    pub rtt_tx: watch::Sender<f32>,
}

impl Worker {
    pub(crate) fn new(
        endpoint: NetworkEndpoint,
        session: Session,
        config: TransportConfig,
        channels: WorkerChannels,
    ) -> Self {
        Self {
            endpoint,
            channel: Channel::new(),
            session,
            send_rate: SendRate::new(config.max_send_fps),
            target: None,
            commands: channels.commands,
            events: channels.events,
            state_tx: channels.state_tx,
            rtt_tx: channels.rtt_tx,
            outbound: VecDeque::new(),
            tick: 0,
            last_request: None,
            last_ping: Instant::now(),
            config,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("Transport worker on {}", self.endpoint.local_addr());
        while self.step(Instant::now()) {
            thread::sleep(IDLE_SLEEP);
        }
        self.say_goodbye();
        log::debug!("Transport worker stopped");
    }

    fn step(&mut self, now: Instant) -> bool {
        if !self.drain_commands() {
            return false;
        }
        self.receive(now);
        self.maintain(now);
        self.flush(now);
        self.publish();
        true
    }

    /// False once the adapter asked to stop or went away.
    fn drain_commands(&mut self) -> bool {
        loop {
            let command = match self.commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };

            match command {
                Command::Connect(addr) => {
                    log::info!("Connecting to {}", addr);
                    self.target = Some(addr);
                    self.channel = Channel::new();
                    self.last_request = None;
                    let reaction = self.session.connect();
                    self.apply(reaction);
                }
                Command::Disconnect => {
                    self.say_goodbye();
                    self.drop_peer();
                    let reaction = self.session.disconnect();
                    self.apply(reaction);
                }
                Command::Reset => {
                    self.drop_peer();
                    let reaction = self.session.reset();
                    self.apply(reaction);
                }
                Command::ContentReady => {
                    let reaction = self.session.content_ready();
                    self.apply(reaction);
                }
                Command::Send {
                    payload,
                    flags,
                    tick,
                } => {
                    self.tick = self.tick.max(tick);
                    self.outbound.push_back((payload, flags));
                }
                Command::Shutdown => return false,
            }
        }
    }

    fn receive(&mut self, now: Instant) {
        let received = match self.endpoint.receive() {
            Ok(received) => received,
            Err(e) => {
                log::warn!("Receive failed: {}", e);
                return;
            }
        };

        for datagram in received {
            if Some(datagram.addr) != self.target {
                log::debug!("Dropping packet from unexpected {}", datagram.addr);
                continue;
            }
            let header = datagram.packet.header;
            if !self.channel.accept(&header) {
                log::debug!("Dropping duplicate sequence {}", header.sequence);
                continue;
            }
            self.send_rate.add_rtt(self.channel.rtt_ms() as u32, now);

            let reaction = self.session.handle(&header, datagram.packet.payload);
            self.apply(reaction);
        }
    }

    fn maintain(&mut self, now: Instant) {
        let Some(addr) = self.target else {
            return;
        };
        let state = self.session.state();

        if state == GameState::Connect {
            let due = self
                .last_request
                .is_none_or(|sent| now.duration_since(sent) >= self.config.connect_retry);
            if due {
                self.last_request = Some(now);
                let request = self.session.connection_request();
                self.send(request, PacketFlags::empty());
            }
        }

        if state.is_joined() {
            if now.duration_since(self.last_ping) >= self.config.ping_interval {
                self.last_ping = now;
                self.send(
                    PacketType::Ping {
                        timestamp: unix_millis(),
                    },
                    PacketFlags::empty(),
                );
            }

            if self.channel.is_timed_out(self.config.timeout) {
                log::warn!("No traffic from {} for {:?}", addr, self.config.timeout);
                self.channel = Channel::new();
                self.outbound.clear();
                self.last_request = None;
                let reaction = self.session.lost();
                self.apply(reaction);
                return;
            }
        }

        if let Err(e) = self
            .endpoint
            .resend(&mut self.channel, addr, self.config.max_resends)
        {
            log::warn!("Resend to {} failed: {}", addr, e);
        }
    }

    /// Drains queued game data when the send rate allows.
    fn flush(&mut self, now: Instant) {
        if self.outbound.is_empty() || !self.session.state().is_joined() {
            return;
        }
        if !self.send_rate.ready_to_send(now) {
            return;
        }
        while let Some((payload, flags)) = self.outbound.pop_front() {
            self.send(payload, flags);
        }
        self.send_rate.mark_sent(now);
    }

    fn publish(&mut self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        self.rtt_tx.send_replace(self.channel.rtt_ms());
    }

    fn apply(&mut self, reaction: Reaction) {
        for (payload, flags) in reaction.replies {
            self.send(payload, flags);
        }
        // state first, so a drained event never runs ahead of `state()`
        self.publish();
        for event in reaction.events {
            // a closed receiver means the adapter is going away
            let _ = self.events.send(event);
        }
    }

    fn send(&mut self, payload: PacketType, flags: PacketFlags) {
        let Some(addr) = self.target else {
            return;
        };
        let tag = payload.tag();
        match self
            .endpoint
            .send(&mut self.channel, payload, self.tick, flags, addr)
        {
            Ok(_) => log::debug!("Sent {:?} to {}", tag, addr),
            Err(e) => log::warn!("Sending {:?} to {} failed: {}", tag, addr, e),
        }
    }

    fn say_goodbye(&mut self) {
        if self.session.state().is_joined() {
            self.send(PacketType::Disconnect, PacketFlags::empty());
        }
    }

    /// Clears the target; unacked reliable packets go with the channel.
    fn drop_peer(&mut self) {
        self.target = None;
        self.channel = Channel::new();
        self.outbound.clear();
        self.last_request = None;
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
