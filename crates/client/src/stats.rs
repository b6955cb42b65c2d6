use std::collections::VecDeque;

use rpgsync::FullSnapshot;

const SAMPLE_COUNT: usize = 60;

/// How the last render snapshot looked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSample {
    pub entities: usize,
    /// Both sides of the bracket known.
    pub bracketed: usize,
    /// Reader caught up with the newest state.
    pub holding: usize,
    /// Nothing at or before the render tick yet.
    pub early: usize,
}

pub struct FrameStats {
    frame_times: VecDeque<f32>,
    fps: f32,
    frames: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(SAMPLE_COUNT),
            fps: 0.0,
            frames: 0,
        }
    }

    pub fn record_frame(&mut self, dt: f32) {
        self.frames += 1;
        if dt <= 0.0 {
            return;
        }

        if self.frame_times.len() >= SAMPLE_COUNT {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(dt);

        let avg_dt: f32 = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        self.fps = 1.0 / avg_dt;
    }

    pub fn record_render(&self, snapshot: &FullSnapshot) -> RenderSample {
        let mut sample = RenderSample {
            entities: snapshot.entries.len(),
            ..Default::default()
        };
        for entry in &snapshot.entries {
            let sip = &entry.interpolation;
            if sip.s1.is_none() {
                sample.early += 1;
            } else if sip.s2.is_some() {
                sample.bracketed += 1;
            }
            if sip.lead() == 0 {
                sample.holding += 1;
            }
        }
        sample
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
