use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use rpgsync::{
    AdapterEvent, BaseData, Body, EntityId, FinalResult, GameState, TransportAdapter,
    TransportConfig,
};

use crate::pilot::Pilot;
use crate::stats::FrameStats;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub server: SocketAddr,
    pub transport: TransportConfig,
    /// Stop after this long; `None` runs until the game finishes.
    pub run_for: Option<Duration>,
    pub log_interval: Duration,
    pub greeting: Option<String>,
}

/// Headless game loop: walks the local player, streams it to the authority
/// and samples the interpolated world once per frame.
pub struct Driver {
    adapter: TransportAdapter,
    pilot: Pilot,
    stats: FrameStats,
    config: DriverConfig,
    frame_rate: u32,
    greeting: Option<String>,
    result: Option<FinalResult>,
    last_frame: Instant,
    last_log: Instant,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Result<Self> {
        let adapter = TransportAdapter::spawn(config.transport.clone())?;
        log::info!("Client bound to {}", adapter.local_addr());

        let now = Instant::now();
        Ok(Self {
            adapter,
            pilot: Pilot::new(),
            stats: FrameStats::new(),
            frame_rate: config.transport.sync.frame_rate.max(1),
            greeting: config.greeting.clone(),
            result: None,
            last_frame: now,
            last_log: now,
            config,
        })
    }

    pub fn run(&mut self) -> Result<Option<FinalResult>> {
        self.adapter.connect(self.config.server)?;
        let started = Instant::now();

        loop {
            let now = Instant::now();

            for event in self.adapter.poll_events() {
                self.on_event(event)?;
            }

            match self.adapter.state() {
                GameState::Play => self.frame(now)?,
                GameState::Finished => break,
                GameState::Error => bail!("session failed"),
                _ => {}
            }

            if self
                .config
                .run_for
                .is_some_and(|limit| now.duration_since(started) >= limit)
            {
                log::info!("Run time over, leaving");
                break;
            }

            let frame = self.frame_duration();
            let spent = now.elapsed();
            thread::sleep(frame.saturating_sub(spent));
        }

        // results may still sit in the last snapshots
        for event in self.adapter.poll_events() {
            self.on_event(event)?;
        }
        self.adapter.disconnect()?;
        log::info!("Ran {} frames", self.stats.frames());
        Ok(self.result.take())
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate as f64)
    }

    fn on_event(&mut self, event: AdapterEvent) -> Result<()> {
        match event {
            AdapterEvent::StateChanged(state) => log::info!("State now {}", state),
            AdapterEvent::Connected {
                client_id,
                player_id,
                resumed,
            } => {
                log::info!(
                    "Joined as client {} (player {}), resumed: {}",
                    client_id,
                    player_id,
                    resumed
                );
                if !resumed {
                    self.pilot.reset();
                }
            }
            AdapterEvent::Denied(reason) => log::error!("Denied: {}", reason),
            AdapterEvent::Disconnected => {
                log::warn!("Lost the server, reconnecting");
            }
            AdapterEvent::Roster(entries) => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                log::info!("Roster: {}", names.join(", "));
            }
            AdapterEvent::Selection(selection) => {
                log::debug!(
                    "{} of {} characters chosen",
                    selection.players.len(),
                    selection.max_players
                );
            }
            AdapterEvent::ContentRequired(config) => {
                log::info!(
                    "Loading map {} ({} s, {} fps)",
                    config.map,
                    config.duration_secs,
                    config.frame_rate
                );
                self.frame_rate = config.frame_rate.max(1);
                self.adapter.content_ready()?;
            }
            AdapterEvent::TickSync(tick) => log::debug!("Tick synced to {}", tick),
            AdapterEvent::Chat(message) => {
                log::info!("[chat] {}: {}", message.sender, message.text);
            }
            AdapterEvent::Result(result) | AdapterEvent::Finished(result) => {
                self.result = Some(result);
            }
            AdapterEvent::Error(message) => log::error!("{}", message),
        }
        Ok(())
    }

    fn frame(&mut self, now: Instant) -> Result<()> {
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.stats.record_frame(dt);

        let tick = self.adapter.advance_frame();
        let Some(player_id) = self.adapter.player_id() else {
            return Ok(());
        };
        let id = EntityId::player(player_id);

        let authority = self.adapter.current_snapshot().get(&id).map(|e| e.body.clone());
        if let Some(body) = &authority {
            self.pilot.place(body.position);
        }

        let frame = tick / self.adapter.config().tick_scale.max(1);
        let dt = 1.0 / self.frame_rate as f32;
        let base = authority.unwrap_or_else(|| Body::new(frame, 0));
        if let Some(body) = self.pilot.steer(base, frame, dt) {
            self.adapter
                .append_snapshot(&(BaseData::new(id), body), false);
        }

        if let Some(text) = self.greeting.take() {
            self.adapter.send_message(text);
        }
        self.adapter.flush(now)?;
        self.adapter.prune();

        let render = self.adapter.render_snapshot();
        let sample = self.stats.record_render(&render);

        if now.duration_since(self.last_log) >= self.config.log_interval {
            self.last_log = now;
            let own = render
                .get(&id)
                .and_then(|sip| sip.sample(self.adapter.config()));
            log::info!(
                "tick {} | fps {:.0} | rtt {:.0} ms | {} entities, {} bracketed, {} holding, {} early",
                tick,
                self.stats.fps(),
                self.adapter.rtt_ms(),
                sample.entities,
                sample.bracketed,
                sample.holding,
                sample.early,
            );
            if let Some(body) = own {
                let local = self.pilot.position().unwrap_or_default();
                log::info!(
                    "player {} rendered at ({:.2}, {:.2}), local ({:.2}, {:.2}), hp {}/{} ammo {}",
                    player_id,
                    body.position.x,
                    body.position.y,
                    local.x,
                    local.y,
                    body.hp,
                    body.max_hp,
                    body.ammo
                );
            }
        }
        Ok(())
    }
}
