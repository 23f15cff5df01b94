//! RGBA pixel buffer with PNG export.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};
use std::path::Path;

pub type Rgba = [u8; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Bitmap {
    /// A fully transparent bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![0u8; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| ((y * self.width + x) * 4) as usize)
    }

    /// Out-of-bounds writes are ignored.
    pub fn put(&mut self, x: u32, y: u32, color: Rgba) {
        if let Some(idx) = self.index(x, y) {
            self.rgba[idx..idx + 4].copy_from_slice(&color);
        }
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let idx = self.index(x, y)?;
        let mut color = [0u8; 4];
        color.copy_from_slice(&self.rgba[idx..idx + 4]);
        Some(color)
    }

    /// Fills the half-open rectangle `[x0, x1) x [y0, y1)`.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba) {
        for y in y0..y1.min(self.height) {
            for x in x0..x1.min(self.width) {
                self.put(x, y, color);
            }
        }
    }

    /// One-pixel outline of the half-open rectangle.
    pub fn stroke_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba) {
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        self.fill_rect(x0, y0, x1, y0 + 1, color);
        self.fill_rect(x0, y1 - 1, x1, y1, color);
        self.fill_rect(x0, y0, x0 + 1, y1, color);
        self.fill_rect(x1 - 1, y0, x1, y1, color);
    }

    #[cfg(test)]
    pub fn count_pixels(&self, color: Rgba) -> usize {
        self.rgba.chunks_exact(4).filter(|px| *px == color).count()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out).write_image(
            &self.rgba,
            self.width,
            self.height,
            ExtendedColorType::Rgba8,
        )?;
        Ok(out)
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let png = self.encode_png().context("Failed to encode PNG")?;
        std::fs::write(path, png)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_bounds() {
        let mut bitmap = Bitmap::new(4, 3);
        bitmap.put(3, 2, [1, 2, 3, 4]);
        bitmap.put(4, 0, [9, 9, 9, 9]);
        assert_eq!(bitmap.pixel(3, 2), Some([1, 2, 3, 4]));
        assert_eq!(bitmap.pixel(4, 0), None);
        assert_eq!(bitmap.count_pixels([9, 9, 9, 9]), 0);
    }

    #[test]
    fn test_stroke_rect_outline_only() {
        let mut bitmap = Bitmap::new(5, 5);
        bitmap.stroke_rect(0, 0, 5, 5, [255, 0, 0, 255]);
        assert_eq!(bitmap.count_pixels([255, 0, 0, 255]), 16);
        assert_eq!(bitmap.pixel(2, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_png_signature() {
        let png = Bitmap::new(2, 2).encode_png().unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
