use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::camera_profile::CameraType;
use crate::gains::GainVector;
use crate::settings::WbMode;

/// Side-channel output of one processed frame, for overlays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticsRecord {
    pub gains: GainVector,
    pub camera_type: CameraType,
    pub mode: WbMode,
    pub fps: f32,
}

impl std::fmt::Display for DiagnosticsRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} wb={} gains B{:.2} G{:.2} R{:.2} {:.1} fps",
            self.camera_type,
            self.mode,
            self.gains.blue(),
            self.gains.green(),
            self.gains.red(),
            self.fps
        )
    }
}

/// Frame rate over a sliding window of recent frame timestamps.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    stamps: VecDeque<Instant>,
    window: usize,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(30)
    }
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            stamps: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f32 {
        if self.stamps.len() == self.window {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
        self.fps()
    }

    pub fn fps(&self) -> f32 {
        match (self.stamps.front(), self.stamps.back()) {
            (Some(first), Some(last)) if self.stamps.len() > 1 => {
                let span = last.duration_since(*first);
                if span < Duration::from_micros(1) {
                    0.0
                } else {
                    (self.stamps.len() - 1) as f32 / span.as_secs_f32()
                }
            }
            _ => 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.stamps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_from_regular_ticks() {
        let mut meter = FpsMeter::new(10);
        let start = Instant::now();
        assert_eq!(meter.tick_at(start), 0.0);
        let mut fps = 0.0;
        for i in 1..20u64 {
            fps = meter.tick_at(start + Duration::from_millis(40 * i));
        }
        assert!((fps - 25.0).abs() < 0.1, "fps {fps}");

        meter.reset();
        assert_eq!(meter.fps(), 0.0);
    }

    #[test]
    fn test_display_record() {
        let record = DiagnosticsRecord {
            gains: GainVector::identity(),
            camera_type: CameraType::External,
            mode: WbMode::Auto,
            fps: 29.97,
        };
        assert_eq!(record.to_string(), "external wb=auto gains B1.00 G1.00 R1.00 30.0 fps");
    }
}
