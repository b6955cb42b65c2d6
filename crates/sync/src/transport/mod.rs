mod session;
mod state;
mod worker;

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use crate::config::{SyncConfig, TransportConfig};
use crate::delta::{DeltaEncoder, KeyframeClock, SnapshotSource};
use crate::net::{
    CharacterSelectData, ChatMessage, FinalResult, GameConfigData, NetworkEndpoint, PacketFlags,
    PacketType, RosterEntry,
};
use crate::snapshot::{CurrentSnapshot, FullSnapshot, SnapshotStore};

pub use session::{Reaction, Session};
pub use state::GameState;

use worker::{Worker, WorkerChannels};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("transport worker is gone")]
    WorkerGone,
}

/// Notifications from the worker, drained with [`TransportAdapter::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    StateChanged(GameState),
    Connected {
        client_id: u32,
        player_id: i32,
        resumed: bool,
    },
    Denied(String),
    Disconnected,
    Roster(Vec<RosterEntry>),
    Selection(CharacterSelectData),
    ContentRequired(GameConfigData),
    /// The authority's tick replaces the local one.
    TickSync(i64),
    Chat(ChatMessage),
    Result(FinalResult),
    Finished(FinalResult),
    Error(String),
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect(SocketAddr),
    Disconnect,
    Reset,
    ContentReady,
    Send {
        payload: PacketType,
        flags: PacketFlags,
        tick: i64,
    },
    Shutdown,
}

pub(crate) fn lock(store: &Mutex<SnapshotStore>) -> MutexGuard<'_, SnapshotStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client side of the data plane. Socket I/O runs on a worker thread; this
/// half lives on the simulation thread and never blocks on the network.
pub struct TransportAdapter {
    commands: UnboundedSender<Command>,
    events: UnboundedReceiver<AdapterEvent>,
    state: watch::Receiver<GameState>,
    rtt: watch::Receiver<f32>,
    store: Arc<Mutex<SnapshotStore>>,
    encoder: DeltaEncoder,
    keyframes: KeyframeClock,
    config: SyncConfig,
    local_addr: SocketAddr,
    player_id: Option<i32>,
    tick: i64,
    worker: Option<JoinHandle<()>>,
}

impl TransportAdapter {
    pub fn spawn(config: TransportConfig) -> Result<Self, TransportError> {
        let mut endpoint = NetworkEndpoint::bind(config.bind.as_str())?;
        endpoint.set_loss_simulation(config.loss_simulation.clone());
        let local_addr = endpoint.local_addr();

        let store = Arc::new(Mutex::new(SnapshotStore::new(&config.sync)));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(GameState::Invalid);
        let (rtt_tx, rtt_rx) = watch::channel(0.0);

        let sync = config.sync.clone();
        let worker = Worker::new(
            endpoint,
            Session::new(Arc::clone(&store)),
            config,
            WorkerChannels {
                commands: command_rx,
                events: event_tx,
                state_tx,
                rtt_tx,
            },
        );
        let handle = thread::Builder::new()
            .name("rpgsync-transport".to_string())
            .spawn(move || worker.run())?;

        log::info!("Transport bound to {}", local_addr);

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            state: state_rx,
            rtt: rtt_rx,
            store,
            encoder: DeltaEncoder::new(),
            keyframes: KeyframeClock::new(sync.keyframe_interval),
            config: sync,
            local_addr,
            player_id: None,
            tick: 0,
            worker: Some(handle),
        })
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::WorkerGone)
    }

    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        self.command(Command::Connect(addr))
    }

    /// Clears the target address. In-flight reliable packets are dropped.
    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        self.command(Command::Disconnect)
    }

    /// Leaves `Error` (or any state) and forgets the session and the store.
    pub fn reset(&mut self) -> Result<(), TransportError> {
        self.encoder.reset();
        self.tick = 0;
        self.player_id = None;
        self.command(Command::Reset)
    }

    pub fn content_ready(&mut self) -> Result<(), TransportError> {
        self.command(Command::ContentReady)
    }

    pub fn send_message(&mut self, text: impl Into<String>) {
        self.encoder.set_message(ChatMessage {
            sender: self.player_id.unwrap_or_default(),
            text: text.into(),
        });
    }

    pub fn state(&self) -> GameState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<GameState> {
        self.state.clone()
    }

    pub fn rtt_ms(&self) -> f32 {
        *self.rtt.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn player_id(&self) -> Option<i32> {
        self.player_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn tick(&self) -> i64 {
        self.tick
    }

    /// Moves the local tick one logical frame forward.
    pub fn advance_frame(&mut self) -> i64 {
        self.tick += self.config.tick_scale;
        self.tick
    }

    pub fn store(&self) -> Arc<Mutex<SnapshotStore>> {
        Arc::clone(&self.store)
    }

    /// Drains worker events, keeping the local tick and keyframe policy in
    /// step with the session.
    pub fn poll_events(&mut self) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match &event {
                AdapterEvent::Connected {
                    player_id, resumed, ..
                } => {
                    self.player_id = Some(*player_id);
                    if !resumed {
                        self.encoder.reset();
                    }
                    self.encoder.require_keyframe();
                    self.keyframes.force();
                }
                AdapterEvent::StateChanged(GameState::Play) => {
                    self.encoder.require_keyframe();
                }
                AdapterEvent::TickSync(tick) => {
                    log::info!("Local tick {} -> {}", self.tick, tick);
                    self.tick = *tick;
                }
                _ => {}
            }
            out.push(event);
        }
        out
    }

    /// Queues the local state of `source` at the current tick.
    pub fn append_snapshot<S: SnapshotSource + ?Sized>(&mut self, source: &S, forced: bool) -> bool {
        self.encoder.append_snapshot(source, self.tick, forced)
    }

    /// Hands everything appended since the last flush to the worker.
    /// Keyframe chunks go reliably. Returns the number of packets queued.
    pub fn flush(&mut self, now: Instant) -> Result<usize, TransportError> {
        if self.keyframes.due(now) {
            self.encoder.require_keyframe();
        }
        if !self.encoder.has_pending() {
            return Ok(0);
        }

        let batch = self.encoder.take_batch();
        if self.state() != GameState::Play {
            return Ok(0);
        }

        let count = batch.len();
        for outbound in batch {
            let flags = if outbound.keyframe {
                PacketFlags::RELIABLE | PacketFlags::KEYFRAME
            } else {
                PacketFlags::empty()
            };
            self.command(Command::Send {
                payload: PacketType::ClientState(outbound.snapshot),
                flags,
                tick: self.tick,
            })?;
        }
        Ok(count)
    }

    pub fn full_snapshot(&self, target: i64, find_last: bool) -> FullSnapshot {
        lock(&self.store).get_full_snapshot(target, find_last)
    }

    /// Brackets at the current tick minus the jitter buffer.
    pub fn render_snapshot(&self) -> FullSnapshot {
        self.full_snapshot(self.config.render_tick(self.tick), false)
    }

    pub fn current_snapshot(&self) -> CurrentSnapshot {
        lock(&self.store).get_current_snapshot()
    }

    /// Zaps history older than the retention window.
    pub fn prune(&self) -> usize {
        lock(&self.store).zap_snapshots(self.tick - self.config.history_retention_ticks)
    }

    pub fn shutdown(&mut self) {
        let _ = self.command(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Transport worker panicked");
            }
        }
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
