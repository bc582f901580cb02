//! Per-pixel tone and color adjustments used by the frame processor.

use crate::frame::{Frame, BLUE, GREEN, RED};
use crate::gains::GainVector;

pub type Lut = [u8; 256];

/// Multiplies each channel by its gain, clipping to the byte range.
pub fn apply_gains(frame: &mut Frame, gains: &GainVector) {
    let luts = gains.as_array().map(|g| build_lut(|v| v * g));
    for px in frame.pixels_mut() {
        for c in 0..3 {
            px[c] = luts[c][px[c] as usize];
        }
    }
}

/// `out = in * multiplier + offset`, clipped.
pub fn tone_lut(multiplier: f32, offset: f32) -> Lut {
    build_lut(|v| v * multiplier + offset)
}

/// `out = 255 * (in / 255) ^ (1 / gamma)`.
pub fn gamma_lut(gamma: f32) -> Lut {
    let inv = 1.0 / gamma.max(0.01);
    build_lut(|v| 255.0 * (v / 255.0).powf(inv))
}

pub fn apply_lut(frame: &mut Frame, lut: &Lut) {
    for v in frame.as_bytes_mut() {
        *v = lut[*v as usize];
    }
}

fn build_lut<F: Fn(f32) -> f32>(f: F) -> Lut {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let v = f(i as f32);
        *slot = if v.is_finite() { v.round().clamp(0.0, 255.0) as u8 } else { i as u8 };
    }
    lut
}

/// Saturation below which vibrance applies.
const VIBRANCE_CUTOFF: f32 = 0.5;
/// Saturation added at full vibrance.
const VIBRANCE_BOOST: f32 = 0.12;

/// Scales HSL saturation by `scale`, then lifts muted colors by `vibrance`
/// (0..=1). Lightness and hue are preserved.
pub fn adjust_saturation(frame: &mut Frame, scale: f32, vibrance: f32) {
    let scale = scale.max(0.0);
    let vibrance = vibrance.clamp(0.0, 1.0);
    if scale == 1.0 && vibrance == 0.0 {
        return;
    }

    for px in frame.pixels_mut() {
        let (r, g, b) = (px[RED] as f32 / 255.0, px[GREEN] as f32 / 255.0, px[BLUE] as f32 / 255.0);
        let mut hsl = rgb_to_hsl(r, g, b);
        if hsl.s == 0.0 {
            continue;
        }
        hsl.s = (hsl.s * scale).clamp(0.0, 1.0);
        if vibrance > 0.0 && hsl.s < VIBRANCE_CUTOFF {
            hsl.s = (hsl.s + vibrance * VIBRANCE_BOOST).min(1.0);
        }
        let (r, g, b) = hsl_to_rgb(hsl);
        px[RED] = to_byte(r);
        px[GREEN] = to_byte(g);
        px[BLUE] = to_byte(b);
    }
}

#[inline]
fn to_byte(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hsl {
    h: f32,
    s: f32,
    l: f32,
}

fn rgb_to_hsl(r: f32, g: f32, b: f32) -> Hsl {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let l = (max + min) / 2.0;

    if delta < 1e-6 {
        return Hsl { h: 0.0, s: 0.0, l };
    }

    let s = if l < 0.5 { delta / (max + min) } else { delta / (2.0 - max - min) };
    let h = if max == r {
        let h = (g - b) / delta;
        if h < 0.0 { h + 6.0 } else { h }
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };

    Hsl { h: h * 60.0, s, l }
}

fn hsl_to_rgb(hsl: Hsl) -> (f32, f32, f32) {
    let Hsl { h, s, l } = hsl;
    if s < 1e-6 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let h = h / 360.0;
    (
        hue_to_channel(p, q, h + 1.0 / 3.0),
        hue_to_channel(p, q, h),
        hue_to_channel(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
