//! Per-frame color correction.
//!
//! Stage order is fixed: white balance, tone (brightness, contrast, gamma),
//! color (saturation, vibrance), local contrast, dehaze. Neutral stages are
//! skipped. A stage that fails hands its input to the next stage unchanged.

use log::{debug, info, warn};

use crate::adjustments::{adjust_saturation, apply_gains, apply_lut, gamma_lut, tone_lut, Lut};
use crate::camera_profile::CameraType;
use crate::dehaze::{DehazeConfig, DehazeStage};
use crate::diagnostics::{DiagnosticsRecord, FpsMeter};
use crate::error::{PipelineError, StageResult};
use crate::frame::Frame;
use crate::gain_model::gains_for;
use crate::gains::GainVector;
use crate::local_contrast::enhance_local_contrast;
use crate::settings::{ProcessingSettings, WbMode};
use crate::white_balance::{EstimatorConfig, WhiteBalanceEstimator};

/// Gains this close to 1.0 are not worth a pass over the frame.
const GAIN_SKIP_TOLERANCE: f32 = 1e-4;

pub struct FrameProcessor {
    camera_type: CameraType,
    estimator: WhiteBalanceEstimator,
    dehaze: DehazeStage,
    fps: FpsMeter,
    last_gains: GainVector,
}

impl FrameProcessor {
    pub fn new(camera_type: CameraType, estimator: EstimatorConfig, dehaze: DehazeConfig) -> Self {
        let profile = camera_type.profile();
        Self {
            camera_type,
            estimator: WhiteBalanceEstimator::new(profile, estimator),
            dehaze: DehazeStage::new(dehaze),
            fps: FpsMeter::default(),
            last_gains: profile.fallback,
        }
    }

    pub fn with_defaults(camera_type: CameraType) -> Self {
        Self::new(camera_type, EstimatorConfig::default(), DehazeConfig::default())
    }

    /// Corrects one frame. The output always has the input's dimensions and
    /// a diagnostics record is always produced.
    pub fn process(&mut self, frame: &Frame, settings: &ProcessingSettings) -> (Frame, DiagnosticsRecord) {
        let settings = settings.clamped();
        let fps = self.fps.tick();

        let mut out = frame.clone();
        if !frame.is_empty() {
            let gains = self.white_balance_gains(frame, &settings);
            self.last_gains = gains;

            if !gains.is_identity(GAIN_SKIP_TOLERANCE) {
                apply_gains(&mut out, &gains);
            }
            if !settings.tone_is_neutral() || !settings.gamma_is_neutral() {
                apply_lut(&mut out, &tone_curve(&settings));
            }
            if !settings.color_is_neutral() {
                adjust_saturation(&mut out, 1.0 + settings.saturation / 100.0, settings.vibrance / 100.0);
            }

            if settings.clahe_enabled {
                let config = self.dehaze.config().local_contrast;
                out = run_stage("local contrast", out, |f| enhance_local_contrast(f, &config, 1.0));
            }
            if settings.dehaze_amount > 0.0 {
                let stage = &self.dehaze;
                out = run_stage("dehaze", out, |f| stage.try_dehaze(f, settings.dehaze_amount));
            }
        }

        let record = DiagnosticsRecord {
            gains: self.last_gains,
            camera_type: self.camera_type,
            mode: settings.wb_mode,
            fps,
        };
        (out, record)
    }

    /// Call when the device or its resolution changes.
    pub fn on_camera_changed(&mut self, camera_type: CameraType) {
        info!("Camera changed to {}, resetting white balance history", camera_type);
        self.camera_type = camera_type;
        let profile = camera_type.profile();
        self.estimator.set_profile(profile);
        self.last_gains = profile.fallback;
        self.fps.reset();
    }

    pub fn camera_type(&self) -> CameraType {
        self.camera_type
    }

    pub fn estimator(&self) -> &WhiteBalanceEstimator {
        &self.estimator
    }

    pub fn last_gains(&self) -> GainVector {
        self.last_gains
    }

    fn white_balance_gains(&mut self, frame: &Frame, settings: &ProcessingSettings) -> GainVector {
        match settings.wb_mode {
            WbMode::Auto => self.estimator.estimate(frame),
            WbMode::Manual => gains_for(settings.temperature_kelvin, settings.tint),
        }
    }
}

/// Brightness/contrast followed by gamma, folded into one lookup table.
fn tone_curve(settings: &ProcessingSettings) -> Lut {
    let tone = tone_lut(settings.contrast_multiplier(), settings.level_offset());
    if settings.gamma_is_neutral() {
        return tone;
    }
    let gamma = gamma_lut(settings.gamma);
    tone.map(|v| gamma[v as usize])
}

/// Runs a stage that builds a new frame; on failure or a shape change the
/// input is passed on.
fn run_stage<F>(name: &str, input: Frame, stage: F) -> Frame
where
    F: FnOnce(&Frame) -> StageResult<Frame>,
{
    match stage(&input) {
        Ok(out) if out.dimensions() == input.dimensions() && out.as_bytes().len() == input.as_bytes().len() => out,
        Ok(out) => {
            let err = PipelineError::ShapeMismatch {
                width: input.width(),
                height: input.height(),
                actual: out.as_bytes().len(),
            };
            warn!("Stage {} changed frame shape, skipping: {}", name, err);
            input
        }
        Err(err) if err.is_degenerate_input() => {
            debug!("Stage {} skipped: {}", name, err);
            input
        }
        Err(err) => {
            warn!("Stage {} failed, skipping: {}", name, err);
            input
        }
    }
}
