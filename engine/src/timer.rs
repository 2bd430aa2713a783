use std::time::{Duration, Instant};

use log::*;

const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Frame pacing clock for the main loop.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
    delta: f32,
    frame_count: u64,
    window_start: Instant,
    window_frames: u32,
    show_fps: bool,
}

impl FrameTimer {
    pub fn new(show_fps: bool) -> Self {
        Self::starting_at(Instant::now(), show_fps)
    }

    fn starting_at(now: Instant, show_fps: bool) -> Self {
        Self {
            start: now,
            last_frame: now,
            delta: 0.0,
            frame_count: 0,
            window_start: now,
            window_frames: 0,
            show_fps,
        }
    }

    /// Advances the clock by one loop iteration.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) -> Option<f32> {
        self.delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;
        self.window_frames += 1;

        let window = now.duration_since(self.window_start);
        if window < FPS_REPORT_INTERVAL {
            return None;
        }

        let fps = self.window_frames as f32 / window.as_secs_f32();
        self.window_start = now;
        self.window_frames = 0;
        if self.show_fps {
            info!("{:.1} fps ({:.2} ms/frame)", fps, 1000.0 / fps);
        }
        Some(fps)
    }

    /// Seconds between the last two ticks.
    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn elapsed(&self) -> Duration {
        self.last_frame.duration_since(self.start)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
