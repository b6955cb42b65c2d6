use std::time::Duration;

use rpgsync::{GameConfigData, PacketLossSimulation, SyncConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// World steps per second; also the logical frame rate clients see.
    pub tick_rate: u32,
    pub max_clients: usize,
    pub map: String,
    /// Zero plays forever.
    pub duration_secs: u32,
    pub min_players: usize,
    pub enemies: usize,
    pub timeout: Duration,
    pub max_resends: u32,
    pub max_send_fps: u32,
    pub loss_simulation: Option<PacketLossSimulation>,
    pub sync: SyncConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_clients: 4,
            map: "forest".to_string(),
            duration_secs: 120,
            min_players: 1,
            enemies: 4,
            timeout: Duration::from_secs(10),
            max_resends: 10,
            max_send_fps: 30,
            loss_simulation: None,
            sync: SyncConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn game_config(&self) -> GameConfigData {
        GameConfigData {
            map: self.map.clone(),
            duration_secs: self.duration_secs,
            tick_scale: self.sync.tick_scale,
            frame_rate: self.tick_rate,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
