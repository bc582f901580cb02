//! Automatic white balance.
//!
//! Gray-world estimation over well-exposed pixels, blended with a per-camera
//! prior and smoothed over a short history so the correction does not
//! flicker from frame to frame.

use std::collections::VecDeque;

use log::{debug, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::camera_profile::CameraProfile;
use crate::error::{PipelineError, StageResult};
use crate::frame::{Frame, BLUE, GREEN, RED};
use crate::gains::GainVector;

pub const MIN_HISTORY: usize = 3;
pub const MAX_HISTORY: usize = 10;

/// Smallest channel mean we are willing to divide by.
const MIN_CHANNEL_MEAN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Number of past estimates averaged together (clamped to 3..=10).
    pub history_capacity: usize,
    /// Pixel stride in both directions when gathering statistics.
    pub sample_step: u32,
    /// Pixels with any channel below this fraction of full scale are shadows.
    pub dark_fraction: f32,
    /// Pixels with any channel above this fraction of full scale are clipped.
    pub bright_fraction: f32,
    /// Minimum share of valid pixels before falling back to the centre crop.
    pub min_valid_fraction: f32,
    /// Gray-world target scale; below 1.0 biases warm.
    pub target_scale: f32,
    /// Weight growth per step toward the newest history entry.
    pub recency_ratio: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 5,
            sample_step: 2,
            dark_fraction: 0.12,
            bright_fraction: 0.86,
            min_valid_fraction: 0.10,
            target_scale: 0.95,
            recency_ratio: 1.5,
        }
    }
}

pub struct WhiteBalanceEstimator {
    config: EstimatorConfig,
    profile: CameraProfile,
    history: VecDeque<GainVector>,
    last_good: Option<GainVector>,
}

impl WhiteBalanceEstimator {
    pub fn new(profile: CameraProfile, config: EstimatorConfig) -> Self {
        let capacity = config.history_capacity.clamp(MIN_HISTORY, MAX_HISTORY);
        Self {
            config: EstimatorConfig {
                history_capacity: capacity,
                sample_step: config.sample_step.max(1),
                ..config
            },
            profile,
            history: VecDeque::with_capacity(capacity),
            last_good: None,
        }
    }

    /// Smoothed gains for `frame`.
    ///
    /// Never fails: frames that cannot be measured yield the last good
    /// estimate, or the camera's fallback vector before the first one.
    pub fn estimate(&mut self, frame: &Frame) -> GainVector {
        match self.raw_estimate(frame) {
            Ok(gains) => {
                if self.history.len() == self.config.history_capacity {
                    self.history.pop_front();
                }
                self.history.push_back(gains);
                let smoothed = self.smoothed().unwrap_or(gains);
                self.last_good = Some(smoothed);
                smoothed
            }
            Err(err) => {
                if err.is_degenerate_input() {
                    debug!("Auto white balance skipped: {}", err);
                } else {
                    warn!("Auto white balance failed: {}", err);
                }
                self.last_good.unwrap_or(self.profile.fallback)
            }
        }
    }

    /// Drops all history, e.g. after a camera or resolution change.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_good = None;
        debug!("White balance history reset");
    }

    pub fn set_profile(&mut self, profile: CameraProfile) {
        self.profile = profile;
        self.reset();
    }

    pub fn profile(&self) -> &CameraProfile {
        &self.profile
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_good(&self) -> Option<GainVector> {
        self.last_good
    }

    fn raw_estimate(&self, frame: &Frame) -> StageResult<GainVector> {
        let means = match self.valid_means(frame) {
            Ok(means) => means,
            Err(PipelineError::DegenerateFrame(_)) => {
                let (w, h) = frame.dimensions();
                let centre = frame.crop(w / 4, h / 4, w / 2, h / 2);
                self.valid_means(&centre)?
            }
            Err(err) => return Err(err),
        };

        for &m in &means {
            if !m.is_finite() {
                return Err(PipelineError::NonFinite {
                    what: "channel mean",
                    value: m as f32,
                });
            }
            if m < MIN_CHANNEL_MEAN {
                return Err(PipelineError::DegenerateFrame("channel mean near zero"));
            }
        }

        let target = (means.iter().sum::<f64>() / 3.0) * self.config.target_scale as f64;
        let raw = GainVector::try_from_raw(Vector3::new(
            (target / means[BLUE]) as f32,
            (target / means[GREEN]) as f32,
            (target / means[RED]) as f32,
        ))?;

        let raw_weight = if raw.deviation_from_neutral() <= self.profile.deviation_limit {
            0.7
        } else {
            0.3
        };
        let mut blended = raw.as_vector() * raw_weight
            + self.profile.base_correction.as_vector() * (1.0 - raw_weight);

        if means[BLUE] > means[GREEN] * self.profile.blue_cast_ratio as f64 {
            blended[BLUE] *= self.profile.blue_reduction;
        }

        GainVector::try_from_raw(blended)
    }

    /// Channel means over pixels that are neither crushed nor clipped.
    fn valid_means(&self, frame: &Frame) -> StageResult<[f64; 3]> {
        if frame.is_empty() {
            return Err(PipelineError::DegenerateFrame("empty frame"));
        }

        let low = (self.config.dark_fraction * 255.0).round() as u8;
        let high = (self.config.bright_fraction * 255.0).round() as u8;
        let step = self.config.sample_step;

        let mut sums = [0u64; 3];
        let mut valid = 0usize;
        let mut sampled = 0usize;
        for y in (0..frame.height()).step_by(step as usize) {
            for x in (0..frame.width()).step_by(step as usize) {
                sampled += 1;
                let px = frame.pixel(x, y);
                if px.iter().all(|&c| c >= low && c <= high) {
                    valid += 1;
                    sums[BLUE] += px[BLUE] as u64;
                    sums[GREEN] += px[GREEN] as u64;
                    sums[RED] += px[RED] as u64;
                }
            }
        }

        if valid == 0 || (valid as f32) < sampled as f32 * self.config.min_valid_fraction {
            return Err(PipelineError::DegenerateFrame("too few well-exposed pixels"));
        }

        let n = valid as f64;
        Ok([sums[0] as f64 / n, sums[1] as f64 / n, sums[2] as f64 / n])
    }

    fn smoothed(&self) -> Option<GainVector> {
        let ratio = self.config.recency_ratio.max(1.0);
        GainVector::weighted_average(
            self.history
                .iter()
                .enumerate()
                .map(|(age_rank, gain)| (*gain, ratio.powi(age_rank as i32))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_profile::CameraType;

    fn estimator(camera: CameraType) -> WhiteBalanceEstimator {
        WhiteBalanceEstimator::new(camera.profile(), EstimatorConfig::default())
    }

    #[test]
    fn test_blue_cast_is_corrected() {
        let mut wb = estimator(CameraType::External);
        let gains = wb.estimate(&Frame::filled(64, 48, [200, 120, 100]));
        assert!(gains.blue() < 1.0, "blue gain {}", gains.blue());
        assert!(gains.red() > 1.0, "red gain {}", gains.red());
        assert_eq!(wb.history_len(), 1);
    }

    #[test]
    fn test_neutral_frames_converge() {
        let mut wb = estimator(CameraType::Macbook);
        let gray = Frame::filled(64, 48, [128, 128, 128]);
        let mut gains = GainVector::identity();
        for _ in 0..wb.config().history_capacity {
            gains = wb.estimate(&gray);
        }
        let normalized = gains.normalized_to_mean(1.0);
        assert!(normalized.is_identity(0.01), "{:?}", normalized);
    }

    #[test]
    fn test_external_neutral_frames_keep_blue_bias_correction() {
        // 0.7 * 0.95 + 0.3 * base, renormalized.
        let mut wb = estimator(CameraType::External);
        let gray = Frame::filled(64, 48, [128, 128, 128]);
        let mut gains = GainVector::identity();
        for _ in 0..wb.config().history_capacity {
            gains = wb.estimate(&gray);
        }
        let normalized = gains.normalized_to_mean(1.0);
        let expected = [0.92 / 0.965, 1.0, 1.01 / 0.965];
        for (got, want) in normalized.as_array().iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{:?} vs {:?}", normalized, expected);
        }
        assert!(!normalized.is_identity(0.04));
    }

    #[test]
    fn test_overexposed_first_frame_returns_fallback() {
        let mut wb = estimator(CameraType::External);
        let gains = wb.estimate(&Frame::filled(32, 32, [255, 255, 255]));
        assert_eq!(gains, CameraType::External.profile().fallback);
        assert!(gains.as_array().iter().all(|g| g.is_finite()));
        assert_eq!(wb.history_len(), 0);
    }

    #[test]
    fn test_degenerate_frame_keeps_last_good() {
        let mut wb = estimator(CameraType::External);
        let good = wb.estimate(&Frame::filled(32, 32, [150, 128, 110]));
        let after = wb.estimate(&Frame::filled(32, 32, [0, 0, 0]));
        assert_eq!(after, good);
        assert_eq!(wb.history_len(), 1);

        let empty = Frame::new(0, 0, Vec::new()).unwrap();
        assert_eq!(wb.estimate(&empty), good);
    }

    #[test]
    fn test_centre_crop_fallback() {
        // Only a 30x30 centre patch is well exposed: 9% of the frame, 36% of
        // the centre crop.
        let frame = Frame::from_fn(100, 100, |x, y| {
            if (35..65).contains(&x) && (35..65).contains(&y) {
                [150, 128, 110]
            } else {
                [5, 5, 5]
            }
        });
        let mut wb = WhiteBalanceEstimator::new(
            CameraType::External.profile(),
            EstimatorConfig {
                sample_step: 1,
                ..EstimatorConfig::default()
            },
        );
        let gains = wb.estimate(&frame);
        assert_eq!(wb.history_len(), 1);
        assert_ne!(gains, CameraType::External.profile().fallback);
        assert!(gains.blue() < gains.red());
    }

    #[test]
    fn test_history_is_bounded_and_resettable() {
        let mut wb = WhiteBalanceEstimator::new(
            CameraType::Macbook.profile(),
            EstimatorConfig {
                history_capacity: 50,
                ..EstimatorConfig::default()
            },
        );
        assert_eq!(wb.config().history_capacity, MAX_HISTORY);

        let frame = Frame::filled(16, 16, [140, 128, 120]);
        for _ in 0..25 {
            wb.estimate(&frame);
        }
        assert_eq!(wb.history_len(), MAX_HISTORY);

        wb.reset();
        assert_eq!(wb.history_len(), 0);
        assert!(wb.last_good().is_none());
    }

    #[test]
    fn test_smoothing_weights_recent_frames() {
        let mut wb = estimator(CameraType::Macbook);
        let blue_cast = Frame::filled(16, 16, [200, 120, 100]);
        let neutral = Frame::filled(16, 16, [128, 128, 128]);

        let first = wb.estimate(&blue_cast);
        let second = wb.estimate(&neutral);

        let mut alone = estimator(CameraType::Macbook);
        let neutral_only = alone.estimate(&neutral);

        assert!(second.blue() > first.blue());
        assert!(second.blue() < neutral_only.blue());
        // The newer neutral frame dominates the blend.
        assert!((second.blue() - neutral_only.blue()).abs() < (second.blue() - first.blue()).abs());
    }

    #[test]
    fn test_all_outputs_respect_invariants() {
        let mut wb = estimator(CameraType::External);
        let frames = [
            Frame::filled(8, 8, [219, 31, 31]),
            Frame::filled(8, 8, [31, 219, 31]),
            Frame::filled(8, 8, [31, 31, 219]),
            Frame::from_fn(8, 8, |x, y| [(x * 30) as u8, (y * 30) as u8, 100]),
        ];
        for frame in &frames {
            let g = wb.estimate(frame);
            for c in g.as_array() {
                assert!((0.4..=3.0).contains(&c));
            }
            assert!(g.mean() <= 1.5 + 1e-5);
        }
    }
}
