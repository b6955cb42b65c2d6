use std::sync::{Arc, Mutex};

use crate::net::{
    GameConfigData, PacketFlags, PacketHeader, PacketType, PrepareData, RosterEntry,
    WorldSnapshot, rand_u64,
};
use crate::snapshot::SnapshotStore;

use super::{AdapterEvent, GameState, lock};

/// What the worker has to do after the session saw a packet.
#[derive(Debug, Default)]
pub struct Reaction {
    pub replies: Vec<(PacketType, PacketFlags)>,
    pub events: Vec<AdapterEvent>,
}

impl Reaction {
    fn reply(&mut self, payload: PacketType, flags: PacketFlags) {
        self.replies.push((payload, flags));
    }

    fn emit(&mut self, event: AdapterEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.events.is_empty()
    }
}

/// Client session state machine. Performs no I/O: every inbound payload is
/// turned into replies and events for the worker to act on.
#[derive(Debug)]
pub struct Session {
    state: GameState,
    store: Arc<Mutex<SnapshotStore>>,
    client_salt: u64,
    session_token: Option<u64>,
    client_id: Option<u32>,
    player_id: Option<i32>,
    config: Option<GameConfigData>,
    roster: Vec<RosterEntry>,
    tick_sync_pending: bool,
}

impl Session {
    pub fn new(store: Arc<Mutex<SnapshotStore>>) -> Self {
        Self {
            state: GameState::Invalid,
            store,
            client_salt: rand_u64(),
            session_token: None,
            client_id: None,
            player_id: None,
            config: None,
            roster: Vec::new(),
            tick_sync_pending: false,
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn player_id(&self) -> Option<i32> {
        self.player_id
    }

    pub fn session_token(&self) -> Option<u64> {
        self.session_token
    }

    pub fn config(&self) -> Option<&GameConfigData> {
        self.config.as_ref()
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    fn transition(&mut self, next: GameState, reaction: &mut Reaction) {
        if self.state == next {
            return;
        }
        log::info!("Session state {} -> {}", self.state, next);
        self.state = next;
        reaction.emit(AdapterEvent::StateChanged(next));
    }

    fn fail(&mut self, reason: impl Into<String>, reaction: &mut Reaction) {
        let reason = reason.into();
        log::error!("Session error in state {}: {}", self.state, reason);
        self.transition(GameState::Error, reaction);
        reaction.emit(AdapterEvent::Error(reason));
    }

    /// Starts (or restarts) the handshake. A held session token is offered
    /// again so the authority can resume us.
    pub fn connect(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if self.state.is_terminal() {
            log::warn!("Connect ignored in error state, reset first");
            return reaction;
        }
        self.client_salt = rand_u64();
        self.transition(GameState::Connect, &mut reaction);
        reaction
    }

    pub fn connection_request(&self) -> PacketType {
        PacketType::ConnectionRequest {
            client_salt: self.client_salt,
            session_token: self.session_token,
        }
    }

    /// The authority went quiet. Back to the handshake, keeping what a
    /// resume needs.
    pub fn lost(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if !self.state.is_joined() {
            return reaction;
        }
        reaction.emit(AdapterEvent::Disconnected);
        self.client_salt = rand_u64();
        self.transition(GameState::Connect, &mut reaction);
        reaction
    }

    pub fn disconnect(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if self.state.is_joined() {
            reaction.emit(AdapterEvent::Disconnected);
        }
        self.session_token = None;
        self.client_id = None;
        self.transition(GameState::Invalid, &mut reaction);
        reaction
    }

    /// Leaves any state, `Error` included, and forgets the session.
    pub fn reset(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        self.session_token = None;
        self.client_id = None;
        self.player_id = None;
        self.config = None;
        self.roster.clear();
        self.tick_sync_pending = false;
        lock(&self.store).clear();
        self.transition(GameState::Invalid, &mut reaction);
        reaction
    }

    pub fn content_ready(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if self.state != GameState::DownloadContent {
            log::warn!("Content ready ignored in state {}", self.state);
            return reaction;
        }
        self.transition(GameState::Prepare, &mut reaction);
        reaction.reply(PacketType::Ready, PacketFlags::RELIABLE);
        reaction
    }

    pub fn handle(&mut self, header: &PacketHeader, payload: PacketType) -> Reaction {
        let mut reaction = Reaction::default();

        if self.state.is_terminal() && payload.is_game_data() {
            log::debug!("Ignoring {:?} until reset", payload.tag());
            return reaction;
        }

        match (self.state, payload) {
            (state, PacketType::Ping { timestamp }) if state.is_joined() => {
                reaction.reply(PacketType::Pong { timestamp }, PacketFlags::empty());
            }
            (_, PacketType::Pong { .. }) => {}
            (
                GameState::Connect,
                PacketType::ConnectionChallenge {
                    server_salt,
                    challenge,
                },
            ) => {
                let expected = self.client_salt ^ server_salt;
                if challenge != expected {
                    log::warn!("Challenge mismatch");
                } else {
                    log::debug!("Answering challenge");
                    reaction.reply(
                        PacketType::ChallengeResponse {
                            combined_salt: expected,
                        },
                        PacketFlags::RELIABLE,
                    );
                }
            }
            (
                GameState::Connect,
                PacketType::ConnectionAccepted {
                    client_id,
                    player_id,
                    session_token,
                    resumed,
                },
            ) => self.on_accepted(client_id, player_id, session_token, resumed, &mut reaction),
            (GameState::Connect, PacketType::ConnectionDenied { reason }) => {
                reaction.emit(AdapterEvent::Denied(reason.clone()));
                self.fail(format!("connection denied: {}", reason), &mut reaction);
            }
            (GameState::CharacterSelect, PacketType::Roster(entries)) => {
                self.roster = entries.clone();
                reaction.emit(AdapterEvent::Roster(entries));
            }
            (GameState::CharacterSelect, PacketType::CharacterSelect(selection)) => {
                reaction.emit(AdapterEvent::Selection(selection));
            }
            (GameState::CharacterSelect, PacketType::Prepare(prepare)) => {
                self.on_prepare(prepare, &mut reaction);
            }
            (GameState::Prepare, PacketType::Prepare(prepare)) => {
                self.on_prepare_refresh(prepare, &mut reaction);
            }
            (GameState::Prepare, PacketType::WorldSnapshot(snapshot)) => {
                self.tick_sync_pending = true;
                self.transition(GameState::Play, &mut reaction);
                self.on_world(header, snapshot, &mut reaction);
            }
            (GameState::Play, PacketType::WorldSnapshot(snapshot)) => {
                self.on_world(header, snapshot, &mut reaction);
            }
            (GameState::Play, PacketType::Finished(result)) => {
                self.transition(GameState::Finished, &mut reaction);
                reaction.emit(AdapterEvent::Finished(result));
            }
            (state, PacketType::Disconnect) if state != GameState::Invalid => {
                log::info!("Disconnected by server");
                reaction = self.disconnect();
            }
            (state, payload) => {
                log::debug!("Dropping {:?} in state {}", payload.tag(), state);
            }
        }

        reaction
    }

    fn on_accepted(
        &mut self,
        client_id: u32,
        player_id: i32,
        session_token: u64,
        resumed: bool,
        reaction: &mut Reaction,
    ) {
        log::info!(
            "Accepted as client {} (player {}), resumed: {}",
            client_id,
            player_id,
            resumed
        );
        self.client_id = Some(client_id);
        self.player_id = Some(player_id);
        self.session_token = Some(session_token);
        reaction.emit(AdapterEvent::Connected {
            client_id,
            player_id,
            resumed,
        });

        if !resumed {
            self.config = None;
            self.transition(GameState::CharacterSelect, reaction);
            return;
        }

        lock(&self.store).clear();
        self.tick_sync_pending = true;
        reaction.reply(PacketType::RequestFull, PacketFlags::RELIABLE);
        let next = if self.config.is_some() {
            GameState::Prepare
        } else {
            GameState::CharacterSelect
        };
        self.transition(next, reaction);
    }

    fn on_prepare(&mut self, prepare: PrepareData, reaction: &mut Reaction) {
        if let Err(reason) = check_config(&prepare.config) {
            self.fail(reason, reaction);
            return;
        }

        let stored = lock(&self.store).apply_world(&prepare.snapshot);
        log::debug!(
            "Prepare for map {} with {} initial states",
            prepare.config.map,
            stored
        );
        self.config = Some(prepare.config.clone());
        self.transition(GameState::DownloadContent, reaction);
        reaction.emit(AdapterEvent::ContentRequired(prepare.config));
    }

    /// A resumed session already has its content; a repeated `Prepare` only
    /// refreshes the config and the initial control states.
    fn on_prepare_refresh(&mut self, prepare: PrepareData, reaction: &mut Reaction) {
        if let Err(reason) = check_config(&prepare.config) {
            self.fail(reason, reaction);
            return;
        }

        let stored = lock(&self.store).apply_world(&prepare.snapshot);
        log::debug!("Prepare refreshed with {} initial states", stored);
        self.config = Some(prepare.config);
    }

    fn on_world(&mut self, header: &PacketHeader, snapshot: WorldSnapshot, reaction: &mut Reaction) {
        if self.tick_sync_pending {
            self.tick_sync_pending = false;
            reaction.emit(AdapterEvent::TickSync(header.tick.max(snapshot.tick)));
        }

        let stored = lock(&self.store).apply_world(&snapshot);
        log::debug!(
            "World snapshot at tick {}: {} of {} records stored",
            snapshot.tick,
            stored,
            snapshot.record_count()
        );

        if let Some(message) = snapshot.message {
            reaction.emit(AdapterEvent::Chat(message));
        }
        if let Some(result) = snapshot.result {
            reaction.emit(AdapterEvent::Result(result));
        }
    }
}

fn check_config(config: &GameConfigData) -> Result<(), &'static str> {
    if config.map.is_empty() {
        return Err("game config names no map");
    }
    if config.tick_scale <= 0 {
        return Err("game config has no tick scale");
    }
    if config.frame_rate == 0 {
        return Err("game config has no frame rate");
    }
    Ok(())
}
