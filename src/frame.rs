use image::{GrayImage, ImageBuffer, Rgb, RgbImage};

use crate::error::{PipelineError, StageResult};

pub const BLUE: usize = 0;
pub const GREEN: usize = 1;
pub const RED: usize = 2;

/// A captured video frame: tightly packed 8-bit BGR, row-major.
///
/// The channel order is the capture source's and is kept through the whole
/// pipeline. Conversion to RGB only happens at the display/save boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> StageResult<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(PipelineError::ShapeMismatch {
                width,
                height,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Frame filled with one BGR color.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, data }
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> [u8; 3],
    {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self { width, height, data }
    }

    pub fn from_rgb_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for pixel in image.pixels() {
            data.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
        }
        Self { width, height, data }
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            let [b, g, r] = self.pixel(x, y);
            Rgb([r, g, b])
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(3)
    }

    pub fn pixels_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        self.data.chunks_exact_mut(3)
    }

    /// Copy of the rectangle `[x0, x0 + w) x [y0, y0 + h)`, clipped to the frame.
    pub fn crop(&self, x0: u32, y0: u32, w: u32, h: u32) -> Frame {
        let x1 = x0.saturating_add(w).min(self.width);
        let y1 = y0.saturating_add(h).min(self.height);
        let x0 = x0.min(x1);
        let y0 = y0.min(y1);
        let mut data = Vec::with_capacity((x1 - x0) as usize * (y1 - y0) as usize * 3);
        for y in y0..y1 {
            let start = self.offset(x0, y);
            let end = start + (x1 - x0) as usize * 3;
            data.extend_from_slice(&self.data[start..end]);
        }
        Frame {
            width: x1 - x0,
            height: y1 - y0,
            data,
        }
    }

    /// Per-channel mean over the whole frame, in BGR order.
    pub fn channel_means(&self) -> [f64; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        let mut sums = [0u64; 3];
        for px in self.pixels() {
            sums[BLUE] += px[BLUE] as u64;
            sums[GREEN] += px[GREEN] as u64;
            sums[RED] += px[RED] as u64;
        }
        let n = self.pixel_count() as f64;
        [sums[0] as f64 / n, sums[1] as f64 / n, sums[2] as f64 / n]
    }

    /// Population variance of all samples, all channels pooled.
    pub fn variance(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let n = self.data.len() as f64;
        let mean = self.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        self.data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n
    }

    /// Single-channel image computed from each pixel.
    pub fn to_gray<F>(&self, f: F) -> StageResult<GrayImage>
    where
        F: Fn(&[u8]) -> u8,
    {
        let raw: Vec<u8> = self.pixels().map(f).collect();
        GrayImage::from_raw(self.width, self.height, raw).ok_or(PipelineError::ShapeMismatch {
            width: self.width,
            height: self.height,
            actual: self.data.len(),
        })
    }

    /// Rec. 601 luma.
    pub fn luma(&self) -> StageResult<GrayImage> {
        self.to_gray(|px| {
            (0.114 * px[BLUE] as f32 + 0.587 * px[GREEN] as f32 + 0.299 * px[RED] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        })
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Frame::new(2, 2, vec![0; 11]).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { actual: 11, .. }));
        assert!(Frame::new(2, 2, vec![0; 12]).is_ok());
        assert!(Frame::new(0, 0, Vec::new()).is_ok());
    }

    #[test]
    fn test_rgb_conversion_swaps_channels() {
        let frame = Frame::filled(3, 2, [10, 20, 30]);
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([30, 20, 10]));

        let back = Frame::from_rgb_image(&rgb);
        assert_eq!(back, frame);
    }

    #[test]
    fn test_crop_is_clipped() {
        let frame = Frame::from_fn(4, 4, |x, y| [x as u8, y as u8, 0]);
        let crop = frame.crop(2, 1, 10, 2);
        assert_eq!(crop.dimensions(), (2, 2));
        assert_eq!(crop.pixel(0, 0), [2, 1, 0]);
        assert_eq!(crop.pixel(1, 1), [3, 2, 0]);

        let empty = frame.crop(9, 9, 2, 2);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_channel_means_and_variance() {
        let frame = Frame::filled(5, 5, [200, 120, 100]);
        assert_eq!(frame.channel_means(), [200.0, 120.0, 100.0]);

        let flat = Frame::filled(5, 5, [90, 90, 90]);
        assert_eq!(flat.variance(), 0.0);
        assert!(frame.variance() > 0.0);
    }
}
