//! Haze removal based on the dark channel prior.
//!
//! Haze-free patches almost always contain a pixel that is dark in at least
//! one channel; where the dark channel is bright, the scene is veiled by
//! atmospheric light. This stage estimates that veil and inverts it.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, StageResult};
use crate::frame::Frame;
use crate::local_contrast::{enhance_local_contrast, LocalContrastConfig};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DehazeConfig {
    /// Half-width of the square minimum filter (7 gives 15x15 patches).
    pub patch_radius: u32,
    /// Haze removal factor at full strength.
    pub max_omega: f32,
    /// Transmission floor.
    pub min_transmission: f32,
    /// Share of dark-channel pixels used to locate the atmospheric light.
    pub top_fraction: f32,
    /// Strength above which local contrast is restored.
    pub contrast_threshold: f32,
    /// Mix of the equalized luminance in the contrast pass.
    pub contrast_blend: f32,
    pub local_contrast: LocalContrastConfig,
}

impl Default for DehazeConfig {
    fn default() -> Self {
        Self {
            patch_radius: 7,
            max_omega: 0.95,
            min_transmission: 0.1,
            top_fraction: 0.001,
            contrast_threshold: 50.0,
            contrast_blend: 0.5,
            local_contrast: LocalContrastConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DehazeStage {
    config: DehazeConfig,
}

/// Dehazes with the default configuration.
pub fn dehaze(frame: Frame, strength: f32) -> Frame {
    DehazeStage::default().apply(frame, strength)
}

impl DehazeStage {
    pub fn new(config: DehazeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DehazeConfig {
        &self.config
    }

    /// Removes haze at `strength` in `[0, 100]`.
    ///
    /// Zero strength hands the buffer straight back. Any failure also
    /// returns the input unmodified.
    pub fn apply(&self, frame: Frame, strength: f32) -> Frame {
        let strength = if strength.is_finite() { strength.clamp(0.0, 100.0) } else { 0.0 };
        if strength == 0.0 {
            return frame;
        }

        match self.try_dehaze(&frame, strength) {
            Ok(out) => out,
            Err(err) if err.is_degenerate_input() => {
                debug!("Dehaze skipped: {}", err);
                frame
            }
            Err(err) => {
                warn!("Dehaze failed, keeping frame: {}", err);
                frame
            }
        }
    }

    pub fn try_dehaze(&self, frame: &Frame, strength: f32) -> StageResult<Frame> {
        if frame.is_empty() {
            return Err(PipelineError::DegenerateFrame("empty frame"));
        }

        let dark = self.dark_channel(frame)?;
        let atmosphere = self.atmospheric_light(frame, &dark)?;
        let transmission = self.transmission(frame, &atmosphere, strength)?;

        let (t_min, t_max) = transmission
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
        if t_max - t_min < 1e-6 {
            return Err(PipelineError::FlatTransmission(t_min));
        }

        let out = self.recover(frame, &transmission, &atmosphere)?;
        if strength > self.config.contrast_threshold {
            return enhance_local_contrast(&out, &self.config.local_contrast, self.config.contrast_blend);
        }
        Ok(out)
    }

    /// Per-pixel channel minimum, then a square minimum filter.
    fn dark_channel(&self, frame: &Frame) -> StageResult<GrayImage> {
        let min_channel = frame.to_gray(|px| px.iter().copied().min().unwrap_or(0))?;
        Ok(min_filter(&min_channel, self.config.patch_radius))
    }

    /// Per-channel maximum of the original frame at the brightest
    /// dark-channel locations. The coordinates come from the filtered map.
    fn atmospheric_light(&self, frame: &Frame, dark: &GrayImage) -> StageResult<[f32; 3]> {
        let values = dark.as_raw();
        if values.is_empty() || values.len() != frame.pixel_count() {
            return Err(PipelineError::ShapeMismatch {
                width: dark.width(),
                height: dark.height(),
                actual: frame.as_bytes().len(),
            });
        }
        let count = ((values.len() as f32 * self.config.top_fraction) as usize).clamp(1, values.len());

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.select_nth_unstable_by(count - 1, |&a, &b| values[b].cmp(&values[a]));

        let bytes = frame.as_bytes();
        let mut atmosphere = [0.0f32; 3];
        for &i in &order[..count] {
            for (c, a) in atmosphere.iter_mut().enumerate() {
                *a = a.max(bytes[i * 3 + c] as f32);
            }
        }

        if atmosphere.iter().any(|&a| a < 1.0) {
            return Err(PipelineError::DegenerateFrame("atmospheric light is black"));
        }
        Ok(atmosphere)
    }

    /// `t = 1 - omega * dark(I / A)`, with omega scaled by strength.
    fn transmission(&self, frame: &Frame, atmosphere: &[f32; 3], strength: f32) -> StageResult<Vec<f32>> {
        let normalized = frame.to_gray(|px| {
            let v = (0..3)
                .map(|c| px[c] as f32 / atmosphere[c])
                .fold(f32::INFINITY, f32::min);
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        })?;
        let normalized_dark = min_filter(&normalized, self.config.patch_radius);

        let omega = self.config.max_omega * strength / 100.0;
        Ok(normalized_dark
            .as_raw()
            .iter()
            .map(|&d| 1.0 - omega * d as f32 / 255.0)
            .collect())
    }

    /// `J = (I - A) / max(t, t0) + A`.
    fn recover(&self, frame: &Frame, transmission: &[f32], atmosphere: &[f32; 3]) -> StageResult<Frame> {
        let (width, height) = frame.dimensions();
        let t0 = self.config.min_transmission;
        let mut data = Vec::with_capacity(frame.as_bytes().len());
        for (px, &t) in frame.pixels().zip(transmission) {
            let t = t.max(t0);
            for c in 0..3 {
                let a = atmosphere[c];
                let j = (px[c] as f32 - a) / t + a;
                data.push(j.round().clamp(0.0, 255.0) as u8);
            }
        }
        Frame::new(width, height, data)
    }
}

/// Grayscale erosion with a `(2r + 1)` square window, clipped at the
/// borders. Runs as two sliding-window passes.
fn min_filter(image: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = radius as usize;
    let mut rows = GrayImage::new(width, height);
    let mut line = Vec::with_capacity(width.max(height) as usize);

    for y in 0..height {
        line.clear();
        line.extend((0..width).map(|x| image.get_pixel(x, y)[0]));
        for (x, v) in sliding_min(&line, radius).into_iter().enumerate() {
            rows.put_pixel(x as u32, y, Luma([v]));
        }
    }

    let mut out = GrayImage::new(width, height);
    for x in 0..width {
        line.clear();
        line.extend((0..height).map(|y| rows.get_pixel(x, y)[0]));
        for (y, v) in sliding_min(&line, radius).into_iter().enumerate() {
            out.put_pixel(x, y as u32, Luma([v]));
        }
    }
    out
}

fn sliding_min(values: &[u8], radius: usize) -> Vec<u8> {
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    // Indices with increasing values; the front is the window minimum.
    let mut window: VecDeque<usize> = VecDeque::with_capacity(2 * radius + 1);
    let mut next = 0;

    for i in 0..n {
        let hi = (i + radius).min(n - 1);
        while next <= hi {
            while window.back().map_or(false, |&j| values[j] >= values[next]) {
                window.pop_back();
            }
            window.push_back(next);
            next += 1;
        }
        let lo = i.saturating_sub(radius);
        while window.front().map_or(false, |&j| j < lo) {
            window.pop_front();
        }
        out.push(window.front().map_or(values[i], |&j| values[j]));
    }
    out
}
