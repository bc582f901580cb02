//! Contrast-limited adaptive histogram equalization (CLAHE) on luma.
//!
//! The frame is split into a grid of tiles. Each tile gets its own
//! equalization curve from a clipped histogram, and every pixel is mapped
//! through a bilinear mix of the four nearest tile curves.

use image::imageops::crop_imm;
use image::GrayImage;
use imageproc::stats::histogram;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, StageResult};
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalContrastConfig {
    /// Histogram bin limit as a multiple of the uniform bin height.
    /// Zero disables clipping.
    pub clip_limit: f32,
    /// Tiles along each axis.
    pub tile_grid: u32,
}

impl Default for LocalContrastConfig {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tile_grid: 8,
        }
    }
}

type Curve = [u8; 256];

/// Runs CLAHE on the frame's luma and shifts every channel by the luma
/// change scaled by `blend`, so hue is left alone.
pub fn enhance_local_contrast(frame: &Frame, config: &LocalContrastConfig, blend: f32) -> StageResult<Frame> {
    if frame.is_empty() {
        return Err(PipelineError::DegenerateFrame("empty frame"));
    }
    let blend = if blend.is_finite() { blend.clamp(0.0, 1.0) } else { 0.0 };
    let luma = frame.luma()?;
    let equalized = clahe(&luma, config)?;

    let mut out = frame.clone();
    for ((px, y), eq) in out.pixels_mut().zip(luma.as_raw()).zip(equalized.as_raw()) {
        let delta = (*eq as f32 - *y as f32) * blend;
        for c in px.iter_mut() {
            *c = (*c as f32 + delta).round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

pub fn clahe(image: &GrayImage, config: &LocalContrastConfig) -> StageResult<GrayImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::DegenerateFrame("empty luma plane"));
    }
    if !config.clip_limit.is_finite() || config.clip_limit < 0.0 {
        return Err(PipelineError::NonFinite {
            what: "clip limit",
            value: config.clip_limit,
        });
    }

    let grid = config.tile_grid.max(1);
    let tile_w = (width + grid.min(width) - 1) / grid.min(width);
    let tile_h = (height + grid.min(height) - 1) / grid.min(height);
    let tiles_x = (width + tile_w - 1) / tile_w;
    let tiles_y = (height + tile_h - 1) / tile_h;

    let mut curves = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let tile = crop_imm(image, x0, y0, tile_w.min(width - x0), tile_h.min(height - y0)).to_image();
            curves.push(tile_curve(&tile, config.clip_limit));
        }
    }
    let curve_at = |tx: usize, ty: usize| &curves[ty * tiles_x as usize + tx];

    let axis = |pos: u32, size: u32, count: u32| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / size as f32 - 0.5;
        let lo = (f.floor().max(0.0) as usize).min(count as usize - 1);
        let hi = (lo + 1).min(count as usize - 1);
        (lo, hi, (f - lo as f32).clamp(0.0, 1.0))
    };

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let v = image.get_pixel(x, y)[0] as usize;
        let (x0, x1, ax) = axis(x, tile_w, tiles_x);
        let (y0, y1, ay) = axis(y, tile_h, tiles_y);

        let top = curve_at(x0, y0)[v] as f32 * (1.0 - ax) + curve_at(x1, y0)[v] as f32 * ax;
        let bottom = curve_at(x0, y1)[v] as f32 * (1.0 - ax) + curve_at(x1, y1)[v] as f32 * ax;
        pixel[0] = (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8;
    }
    Ok(out)
}

/// Equalization curve of one tile after clipping and redistributing the
/// histogram excess.
fn tile_curve(tile: &GrayImage, clip_limit: f32) -> Curve {
    let mut bins = histogram(tile).channels[0];
    let area: u32 = bins.iter().sum();

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in bins.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let batch = excess / 256;
        let residual = (excess % 256) as usize;
        for bin in bins.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for bin in bins.iter_mut().step_by(step).take(residual) {
                *bin += 1;
            }
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut curve = [0u8; 256];
    let mut cumulative = 0u32;
    for (out, bin) in curve.iter_mut().zip(bins.iter()) {
        cumulative += bin;
        *out = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    curve
}
