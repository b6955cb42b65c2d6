use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rpgsync::net::{
    CharacterChoice, CharacterSelectData, ChatMessage, EntityRecord, PrepareData, Received,
    RosterEntry,
};
use rpgsync::{
    Arena, BaseData, Body, Channel, ConnectionManager, ConnectionState, FinalResult, Handle,
    KeyframeClock, MAX_RECORDS_PER_SNAPSHOT, NetworkEndpoint, NetworkStats, PacketFlags,
    PacketType, SendRate, SnapshotStore, WorldSnapshot,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::world::World;

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const FINISH_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Prepare,
    Play,
    Finished,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::Prepare => "prepare",
            Phase::Play => "play",
            Phase::Finished => "finished",
        }
    }
}

/// A joined client as the world sees it.
#[derive(Debug)]
struct Peer {
    client_id: u32,
    player_id: i32,
    actor: Option<Handle>,
}

pub struct GameServer {
    endpoint: NetworkEndpoint,
    connections: ConnectionManager,
    peers: Arena<Peer>,
    peer_handles: HashMap<u32, Handle>,
    config: ServerConfig,
    world: World,
    store: SnapshotStore,
    keyframes: KeyframeClock,
    phase: Phase,
    tick: i64,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    play_started: Option<Instant>,
    finished_at: Option<Instant>,
    last_stats: Instant,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(bind_addr)?;
        endpoint.set_loss_simulation(config.loss_simulation.clone());

        let mut connections = ConnectionManager::new(config.max_clients);
        connections.set_timeout(config.timeout);

        Ok(Self {
            endpoint,
            connections,
            peers: Arena::new(),
            peer_handles: HashMap::new(),
            world: World::new(config.enemies),
            store: SnapshotStore::new(&config.sync),
            keyframes: KeyframeClock::new(config.sync.keyframe_interval),
            phase: Phase::Lobby,
            tick: 0,
            tick_duration: config.frame_duration(),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            play_started: None,
            finished_at: None,
            last_stats: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn shutdown_connections(&mut self) {
        let client_ids: Vec<u32> = self.connections.iter().map(|c| c.client_id).collect();
        for client_id in client_ids {
            self.kick_client(client_id);
        }
    }

    pub fn kick_client(&mut self, client_id: u32) {
        if let Some(client) = self.connections.get_mut(client_id) {
            let addr = client.addr;
            if let Err(e) = self.endpoint.send(
                &mut client.channel,
                PacketType::Disconnect,
                self.tick,
                PacketFlags::empty(),
                addr,
            ) {
                log::warn!("Disconnect to {} failed: {}", addr, e);
            }
        }
        if self.connections.remove(client_id).is_some() {
            self.drop_peer(client_id, DisconnectReason::Kicked);
        }
    }

    /// Writes the authority's snapshot histories as JSON.
    pub fn dump_store<W: Write>(&self, writer: W) -> io::Result<()> {
        self.store.dump(writer).map_err(io::Error::from)
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.process_network(now) {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick(now);
        }

        self.resend_reliable();
        self.advance_phase(now);

        if now.duration_since(self.last_stats) >= STATS_INTERVAL {
            self.last_stats = now;
            self.log_stats();
        }
    }

    fn tick(&mut self, now: Instant) {
        if self.phase == Phase::Play {
            self.step_world();
            self.broadcast_snapshots(now);
        }

        for client_id in self.connections.cleanup_timed_out() {
            self.drop_peer(client_id, DisconnectReason::Timeout);
        }
    }

    fn step_world(&mut self) {
        let released = self.world.release_orphans(|h| self.peers.contains(h));
        if released > 0 {
            log::debug!("Released {} orphaned players", released);
        }

        let dt = 1.0 / self.config.tick_rate.max(1) as f32;
        let retired = self.world.step(dt);

        for actor in self.world.actors() {
            match self.store.update_snapshot(actor.base.clone(), actor.body.clone()) {
                Ok(tick) => self.tick = self.tick.max(tick),
                Err(e) => log::warn!("Dropping authority state: {}", e),
            }
        }
        for id in &retired {
            self.store.remove(id);
            for client in self.connections.iter_mut() {
                client.encoder.forget(id);
            }
        }

        let horizon = self.tick - self.config.sync.history_retention_ticks;
        self.store.zap_snapshots(horizon);
    }

    fn broadcast_snapshots(&mut self, now: Instant) {
        if self.keyframes.due(now) {
            for client in self.connections.iter_mut().filter(|c| c.ready) {
                client.encoder.require_keyframe();
            }
        }

        let current = self.store.get_current_snapshot();
        for client in self.connections.iter_mut() {
            if !client.is_connected() || !client.ready || !client.send_rate.ready_to_send(now) {
                continue;
            }

            for entry in &current.entries {
                client.encoder.append_snapshot(entry, entry.tick, false);
            }
            for outbound in client.encoder.take_batch() {
                let flags = if outbound.keyframe {
                    PacketFlags::RELIABLE | PacketFlags::KEYFRAME
                } else {
                    PacketFlags::empty()
                };
                if let Err(e) = self.endpoint.send(
                    &mut client.channel,
                    PacketType::WorldSnapshot(outbound.snapshot),
                    self.tick,
                    flags,
                    client.addr,
                ) {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("Failed to send snapshot to {}: {}", client.addr, e),
                    });
                }
            }
            client.send_rate.mark_sent(now);
        }
    }

    fn resend_reliable(&mut self) {
        for client in self.connections.iter_mut() {
            if let Err(e) =
                self.endpoint
                    .resend(&mut client.channel, client.addr, self.config.max_resends)
            {
                log::warn!("Resend to {} failed: {}", client.addr, e);
            }
        }
    }

    fn advance_phase(&mut self, now: Instant) {
        match self.phase {
            Phase::Lobby if self.connections.connected_count() >= self.config.min_players.max(1) => {
                self.set_phase(Phase::Prepare);
                let client_ids: Vec<u32> = self
                    .connections
                    .iter()
                    .filter(|c| c.is_connected())
                    .map(|c| c.client_id)
                    .collect();
                for client_id in client_ids {
                    self.send_prepare(client_id);
                }
                self.broadcast_roster();
            }
            Phase::Prepare if self.ready_count() >= self.config.min_players.max(1) => {
                self.play_started = Some(now);
                self.keyframes.force();
                self.set_phase(Phase::Play);
            }
            Phase::Play => {
                let limit = Duration::from_secs(self.config.duration_secs as u64);
                let expired = self
                    .play_started
                    .is_some_and(|started| now.duration_since(started) >= limit);
                if self.config.duration_secs > 0 && expired {
                    self.finish(now);
                }
            }
            Phase::Finished => {
                let over = self
                    .finished_at
                    .is_some_and(|at| now.duration_since(at) >= FINISH_GRACE);
                if over {
                    self.running.store(false, Ordering::SeqCst);
                }
            }
            _ => {}
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        log::info!("Phase {} -> {}", self.phase.as_str(), phase.as_str());
        self.phase = phase;
        self.pending_events.push_back(ServerEvent::PhaseChanged(phase));
    }

    fn finish(&mut self, now: Instant) {
        let result = self.world.result(self.config.duration_secs);
        log::info!(
            "Game over: success {}, score {}",
            result.success,
            result.score
        );
        self.finished_at = Some(now);
        self.set_phase(Phase::Finished);

        for client in self.connections.iter_mut().filter(|c| c.is_connected()) {
            client.encoder.set_result(result.clone());
        }
        self.broadcast_snapshots(now);
        self.broadcast(PacketType::Finished(result), PacketFlags::RELIABLE);
    }

    fn ready_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.is_connected() && c.ready)
            .count()
    }

    fn broadcast(&mut self, payload: PacketType, flags: PacketFlags) {
        for client in self.connections.iter_mut().filter(|c| c.is_connected()) {
            if let Err(e) = self.endpoint.send(
                &mut client.channel,
                payload.clone(),
                self.tick,
                flags,
                client.addr,
            ) {
                log::warn!("Broadcast {:?} to {} failed: {}", payload.tag(), client.addr, e);
            }
        }
    }

    fn send_to_client(&mut self, client_id: u32, payload: PacketType, flags: PacketFlags) {
        let Some(client) = self.connections.get_mut(client_id) else {
            return;
        };
        let tag = payload.tag();
        match self
            .endpoint
            .send(&mut client.channel, payload, self.tick, flags, client.addr)
        {
            Ok(_) => log::debug!("Sent {:?} to client {}", tag, client_id),
            Err(e) => log::warn!("Sending {:?} to client {} failed: {}", tag, client_id, e),
        }
    }

    fn broadcast_roster(&mut self) {
        let host = self
            .connections
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| c.client_id)
            .min();

        let mut roster: Vec<RosterEntry> = self
            .connections
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| RosterEntry {
                player_id: c.player_id,
                name: format!("player-{}", c.player_id),
                ready: c.ready,
                host: Some(c.client_id) == host,
            })
            .collect();
        roster.sort_by_key(|entry| entry.player_id);

        let selection = CharacterSelectData {
            players: roster
                .iter()
                .map(|entry| CharacterChoice {
                    player_id: entry.player_id,
                    character: "ranger".to_string(),
                    weapons: vec![1],
                    completed: true,
                })
                .collect(),
            locked: self.phase != Phase::Lobby,
            max_players: self.config.max_clients.min(u8::MAX as usize) as u8,
        };

        self.broadcast(PacketType::Roster(roster), PacketFlags::RELIABLE);
        self.broadcast(PacketType::CharacterSelect(selection), PacketFlags::RELIABLE);
    }

    /// Game config plus the initial state of the interactive controls.
    fn prepare_data(&self) -> PrepareData {
        let controls = self.world.controls().map(|actor| (&actor.base, &actor.body));
        PrepareData {
            config: self.config.game_config(),
            snapshot: control_snapshot(controls, self.tick),
        }
    }

    fn send_prepare(&mut self, client_id: u32) {
        let prepare = self.prepare_data();
        self.send_to_client(client_id, PacketType::Prepare(prepare), PacketFlags::RELIABLE);
    }

    fn process_network(&mut self, now: Instant) -> io::Result<()> {
        let packets = self.endpoint.receive()?;

        for received in packets {
            self.handle_packet(received, now)?;
        }

        Ok(())
    }

    fn handle_packet(&mut self, received: Received, now: Instant) -> io::Result<()> {
        let Received { packet, addr, .. } = received;

        // a fresh channel on the client side restarts its sequence numbers,
        // so connection requests bypass duplicate filtering
        if let PacketType::ConnectionRequest {
            client_salt,
            session_token,
        } = packet.payload
        {
            return self.handle_connection_request(addr, client_salt, session_token);
        }

        let Some(client) = self.connections.get_by_addr_mut(&addr) else {
            log::debug!("Dropping {:?} from unknown {}", packet.tag(), addr);
            return Ok(());
        };
        if !client.channel.accept(&packet.header) {
            log::debug!("Dropping duplicate sequence {} from {}", packet.header.sequence, addr);
            return Ok(());
        }
        client.send_rate.add_rtt(client.channel.rtt_ms() as u32, now);
        let client_id = client.client_id;

        match packet.payload {
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(client_id, combined_salt);
            }
            PacketType::Ready => self.handle_ready(client_id),
            PacketType::ClientState(state) => self.handle_client_state(client_id, state),
            PacketType::RequestFull => {
                if let Some(client) = self.connections.get_mut(client_id) {
                    log::info!("Client {} requested a full snapshot", client_id);
                    client.encoder.require_keyframe();
                }
            }
            PacketType::Ping { timestamp } => {
                self.send_to_client(client_id, PacketType::Pong { timestamp }, PacketFlags::empty());
            }
            PacketType::Pong { .. } => {}
            PacketType::Disconnect => {
                if self.connections.remove(client_id).is_some() {
                    self.drop_peer(client_id, DisconnectReason::Graceful);
                }
            }
            other => log::debug!("Ignoring {:?} from client {}", other.tag(), client_id),
        }

        Ok(())
    }

    fn handle_connection_request(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
        session_token: Option<u64>,
    ) -> io::Result<()> {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        let known = self
            .connections
            .get_by_addr(&addr)
            .filter(|c| c.is_connected())
            .map(|c| (c.client_id, c.session_token));
        if let Some((client_id, token)) = known {
            if session_token != Some(token) {
                log::debug!("Ignoring stale connection request from {}", addr);
                return Ok(());
            }
            // the client lost us and starts over: keep its identity for the
            // resume below
            self.connections.suspend(client_id);
            self.drop_peer(client_id, DisconnectReason::Replaced);
        }

        let client = match self
            .connections
            .get_or_create_pending(addr, client_salt, session_token)
        {
            Ok(c) => c,
            Err(reason) => {
                let mut channel = Channel::new();
                self.endpoint.send(
                    &mut channel,
                    PacketType::ConnectionDenied {
                        reason: reason.to_string(),
                    },
                    self.tick,
                    PacketFlags::empty(),
                    addr,
                )?;
                self.pending_events
                    .push_back(ServerEvent::ConnectionDenied {
                        addr,
                        reason: reason.to_string(),
                    });
                return Ok(());
            }
        };

        client.client_salt = client_salt;
        client.touch();
        let server_salt = client.server_salt;
        let challenge = client.combined_salt();

        self.endpoint.send(
            &mut client.channel,
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            },
            self.tick,
            PacketFlags::empty(),
            addr,
        )?;

        Ok(())
    }

    fn handle_challenge_response(&mut self, client_id: u32, combined_salt: u64) {
        let Some(client) = self.connections.get_mut(client_id) else {
            return;
        };
        if client.state != ConnectionState::Connecting {
            return;
        }
        if combined_salt != client.combined_salt() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Invalid challenge response from {}", client.addr),
            });
            return;
        }

        client.state = ConnectionState::Connected;
        client.send_rate = SendRate::new(self.config.max_send_fps);
        let addr = client.addr;
        let player_id = client.player_id;
        let resumed = client.resumed;
        let accepted = PacketType::ConnectionAccepted {
            client_id,
            player_id,
            session_token: client.session_token,
            resumed,
        };

        let peer = self.peers.insert(Peer {
            client_id,
            player_id,
            actor: None,
        });
        self.peer_handles.insert(client_id, peer);

        self.pending_events.push_back(ServerEvent::ClientConnected {
            client_id,
            addr,
            player_id,
            resumed,
        });
        self.send_to_client(client_id, accepted, PacketFlags::RELIABLE);

        if matches!(self.phase, Phase::Prepare | Phase::Play) {
            self.send_prepare(client_id);
            if resumed {
                // the client keeps its content and only needs the world again
                self.handle_ready(client_id);
            }
        }
        self.broadcast_roster();
    }

    fn handle_ready(&mut self, client_id: u32) {
        let Some(client) = self.connections.get_mut(client_id) else {
            return;
        };
        if !client.is_connected() {
            return;
        }
        client.ready = true;
        client.encoder.reset();
        client.encoder.require_keyframe();
        let player_id = client.player_id;

        if let Some(&peer) = self.peer_handles.get(&client_id) {
            let actor = self.world.adopt(peer, player_id);
            if let Some(peer) = self.peers.get_mut(peer) {
                peer.actor = Some(actor);
            }
        }

        self.pending_events
            .push_back(ServerEvent::ClientReady { client_id });
        self.broadcast_roster();
    }

    fn handle_client_state(&mut self, client_id: u32, state: WorldSnapshot) {
        if self.phase != Phase::Play {
            return;
        }
        let Some(&handle) = self.peer_handles.get(&client_id) else {
            return;
        };
        let Some(peer) = self.peers.get(handle) else {
            return;
        };
        if peer.actor.is_none() {
            return;
        }
        let player_id = peer.player_id;

        self.world.apply_client_state(handle, player_id, &state);

        if let Some(mut message) = state.message {
            message.sender = player_id;
            self.relay_chat(message);
        }
    }

    fn relay_chat(&mut self, message: ChatMessage) {
        log::info!("[chat] {}: {}", message.sender, message.text);
        for client in self.connections.iter_mut().filter(|c| c.ready) {
            client.encoder.set_message(message.clone());
        }
        self.pending_events.push_back(ServerEvent::Chat {
            sender: message.sender,
            text: message.text,
        });
    }

    /// Forgets the world-side peer of a client that already left the
    /// connection manager.
    fn drop_peer(&mut self, client_id: u32, reason: DisconnectReason) {
        if let Some(handle) = self.peer_handles.remove(&client_id) {
            if let Some(peer) = self.peers.remove(handle) {
                log::debug!("Peer of client {} (player {}) gone", peer.client_id, peer.player_id);
            }
        }
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { client_id, reason });
        self.broadcast_roster();
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            phase: self.phase,
            client_count: self.connections.connected_count(),
            max_clients: self.config.max_clients,
            entity_count: self.store.len(),
            network_stats: self.endpoint.stats().clone(),
        }
    }

    fn log_stats(&self) {
        let stats = self.stats();
        log::info!(
            "tick {} (frame {}) | {} | clients {}/{} | entities {} | sent {} recv {} resent {} dropped {}",
            stats.tick,
            self.world.frame(),
            stats.phase.as_str(),
            stats.client_count,
            stats.max_clients,
            stats.entity_count,
            stats.network_stats.packets_sent,
            stats.network_stats.packets_received,
            stats.network_stats.packets_resent,
            stats.network_stats.packets_dropped,
        );
    }

    pub fn final_result(&self) -> FinalResult {
        self.world.result(self.config.duration_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: i64,
    pub phase: Phase,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub network_stats: NetworkStats,
}

/// Full records of the controls that fit one datagram. The rest reach the
/// client with its first keyframe, which every ready client is owed.
fn control_snapshot<'a>(
    controls: impl Iterator<Item = (&'a BaseData, &'a Body)>,
    tick: i64,
) -> WorldSnapshot {
    let mut snapshot = WorldSnapshot::new(tick);
    let mut deferred = 0;
    for (base, body) in controls {
        if snapshot.record_count() < MAX_RECORDS_PER_SNAPSHOT {
            snapshot.push(EntityRecord::full(base, tick, body));
        } else {
            deferred += 1;
        }
    }
    if deferred > 0 {
        log::debug!("{} controls left for the first keyframe", deferred);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rpgsync::{AdapterEvent, EntityId, EntityKind, GameState, TransportAdapter, TransportConfig};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_server(min_players: usize) -> GameServer {
        let config = ServerConfig {
            min_players,
            enemies: 2,
            duration_secs: 0,
            ..Default::default()
        };
        GameServer::new("127.0.0.1:0", config).unwrap()
    }

    fn loopback_adapter() -> TransportAdapter {
        TransportAdapter::spawn(TransportConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    /// Runs the server on this thread until `condition` holds.
    fn pump(
        server: &mut GameServer,
        adapter: &mut TransportAdapter,
        mut condition: impl FnMut(&GameServer, &TransportAdapter) -> bool,
    ) -> bool {
        let start = Instant::now();
        while start.elapsed() < WAIT {
            server.tick_once();
            for event in adapter.poll_events() {
                if matches!(event, AdapterEvent::ContentRequired(_)) {
                    adapter.content_ready().unwrap();
                }
            }
            if condition(server, adapter) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_client_joins_and_receives_world() {
        let mut server = test_server(1);
        let mut adapter = loopback_adapter();
        adapter.connect(server.local_addr()).unwrap();

        assert!(pump(&mut server, &mut adapter, |_, a| a.state() == GameState::Play));
        assert_eq!(server.phase(), Phase::Play);

        assert!(pump(&mut server, &mut adapter, |_, a| {
            let current = a.current_snapshot();
            current
                .entries
                .iter()
                .filter(|e| e.base.id.kind == EntityKind::Enemy)
                .count()
                == 2
        }));

        let player_id = adapter.player_id().unwrap();
        let current = adapter.current_snapshot();
        assert!(current.get(&EntityId::player(player_id)).is_some());
        assert!(current.get(&EntityId::new(EntityKind::Gate, 0, 0)).is_some());
        adapter.shutdown();
    }

    #[test]
    fn test_prepare_caps_controls_at_one_datagram() {
        let controls: Vec<(BaseData, Body)> = (0..8)
            .map(|index| {
                (
                    BaseData::new(EntityId::new(EntityKind::Gate, 0, index)),
                    Body::new(1, 0),
                )
            })
            .collect();

        let snapshot = control_snapshot(controls.iter().map(|(base, body)| (base, body)), 40);
        assert_eq!(snapshot.tick, 40);
        assert_eq!(snapshot.record_count(), MAX_RECORDS_PER_SNAPSHOT);
        assert!(snapshot.controls.iter().all(|record| record.tick == 40));

        let few = control_snapshot(controls.iter().take(2).map(|(base, body)| (base, body)), 40);
        assert_eq!(few.controls.len(), 2);
    }

    #[test]
    fn test_lobby_waits_for_min_players() {
        let mut server = test_server(2);
        let mut adapter = loopback_adapter();
        adapter.connect(server.local_addr()).unwrap();

        assert!(pump(&mut server, &mut adapter, |_, a| {
            a.state() == GameState::CharacterSelect
        }));
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(200) {
            server.tick_once();
        }
        assert_eq!(server.phase(), Phase::Lobby);
        assert_eq!(adapter.state(), GameState::CharacterSelect);
    }

    #[test]
    fn test_server_full_is_denied() {
        let config = ServerConfig {
            max_clients: 0,
            ..Default::default()
        };
        let mut server = GameServer::new("127.0.0.1:0", config).unwrap();
        let mut adapter = loopback_adapter();
        adapter.connect(server.local_addr()).unwrap();

        assert!(pump(&mut server, &mut adapter, |_, a| a.state() == GameState::Error));
        let denied = server
            .drain_events()
            .any(|e| matches!(e, ServerEvent::ConnectionDenied { .. }));
        assert!(denied);
    }

    #[test]
    fn test_chat_is_relayed() {
        let mut server = test_server(1);
        let mut adapter = loopback_adapter();
        adapter.connect(server.local_addr()).unwrap();
        assert!(pump(&mut server, &mut adapter, |_, a| a.state() == GameState::Play));

        adapter.send_message("hello");
        let mut chat = None;
        let start = Instant::now();
        while start.elapsed() < WAIT && chat.is_none() {
            server.tick_once();
            adapter.advance_frame();
            adapter.flush(Instant::now()).unwrap();
            for event in adapter.poll_events() {
                if let AdapterEvent::Chat(message) = event {
                    chat = Some(message);
                }
            }
            thread::sleep(Duration::from_millis(1));
        }

        let message = chat.expect("no chat relayed");
        assert_eq!(message.text, "hello");
        assert_eq!(Some(message.sender), adapter.player_id());
    }
}
