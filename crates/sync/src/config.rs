use std::time::Duration;

use crate::net::PacketLossSimulation;

pub const DEFAULT_TICK_SCALE: i64 = 10;
pub const DEFAULT_JITTER_BUFFER_TICKS: i64 = 6;
pub const DEFAULT_KEYFRAME_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Network ticks per logical frame.
    pub tick_scale: i64,
    /// Logical frames per second of the authority's world step.
    pub frame_rate: u32,
    pub jitter_buffer_ticks: i64,
    pub max_tick_probe: i64,
    pub position_tolerance: f32,
    pub history_retention_ticks: i64,
    pub keyframe_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_scale: DEFAULT_TICK_SCALE,
            frame_rate: 60,
            jitter_buffer_ticks: DEFAULT_JITTER_BUFFER_TICKS,
            max_tick_probe: 1024,
            position_tolerance: 0.5,
            history_retention_ticks: 600,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
        }
    }
}

impl SyncConfig {
    pub fn ticks_per_second(&self) -> f32 {
        (self.frame_rate as i64 * self.tick_scale.max(1)) as f32
    }

    pub fn tick_to_secs(&self, ticks: i64) -> f32 {
        ticks as f32 / self.ticks_per_second()
    }

    pub fn render_tick(&self, current_tick: i64) -> i64 {
        current_tick - self.jitter_buffer_ticks
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind: String,
    pub timeout: Duration,
    pub connect_retry: Duration,
    pub ping_interval: Duration,
    pub max_resends: u32,
    pub max_send_fps: u32,
    pub loss_simulation: Option<PacketLossSimulation>,
    pub sync: SyncConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:0".to_string(),
            timeout: Duration::from_secs(10),
            connect_retry: Duration::from_millis(1000),
            ping_interval: Duration::from_secs(1),
            max_resends: 10,
            max_send_fps: 30,
            loss_simulation: None,
            sync: SyncConfig::default(),
        }
    }
}
