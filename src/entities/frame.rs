//! Immutable RGBA frame shared between the pipeline stages
//!
//! **Why**: A frame travels from the decoder through the compositor and the
//! transform chain to the device worker thread. Frames are never mutated once
//! built, so they live behind an `Arc` and clone in O(1).
//!
//! **Used by**: Player (decoded video frames), OverlayCompositor, transform,
//! Session (payload encoding), DeviceChannel (via payload bytes)
//!
//! # Identity
//!
//! No-op transforms hand back a clone of the same `Arc`. `Frame::ptr_eq`
//! tells a reused frame apart from a freshly allocated copy with equal pixels.

use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Device pixel packing for outgoing payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// 16 bits per pixel, 5-6-5, little-endian
    #[default]
    Rgb565,
    /// 24 bits per pixel, R, G, B
    Rgb888,
}

impl PayloadFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PayloadFormat::Rgb565 => 2,
            PayloadFormat::Rgb888 => 3,
        }
    }
}

/// Frame loading errors
#[derive(Debug)]
pub enum FrameError {
    Image(String),
    Io(String),
    SizeMismatch { expected: usize, actual: usize },
    LoadError(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Image(e) => write!(f, "Image error: {}", e),
            FrameError::Io(e) => write!(f, "I/O error: {}", e),
            FrameError::SizeMismatch { expected, actual } => {
                write!(f, "Buffer size mismatch: expected {} bytes, got {}", expected, actual)
            }
            FrameError::LoadError(e) => write!(f, "Load error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

/// Single RGBA8 frame
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<RgbaImage>,
}

impl Frame {
    /// Create opaque black frame
    pub fn new(width: u32, height: u32) -> Self {
        Self::solid(width, height, [0, 0, 0, 255])
    }

    /// Create frame filled with one RGBA color
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let img = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        Self::from_image(img)
    }

    pub fn from_image(img: RgbaImage) -> Self {
        Self { data: Arc::new(img) }
    }

    pub fn from_dynamic(img: DynamicImage) -> Self {
        Self::from_image(img.into_rgba8())
    }

    /// Wrap a raw RGBA buffer (row-major, 4 bytes per pixel)
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        let actual = pixels.len();
        RgbaImage::from_raw(width, height, pixels)
            .map(Self::from_image)
            .ok_or(FrameError::SizeMismatch { expected, actual })
    }

    /// Decode any format the `image` crate understands
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let img = image::open(path)
            .map_err(|e| FrameError::Image(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_dynamic(img))
    }

    pub fn width(&self) -> u32 {
        self.data.width()
    }

    pub fn height(&self) -> u32 {
        self.data.height()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.data.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.data
    }

    /// Owned copy of the pixels for in-place editing
    pub fn to_image(&self) -> RgbaImage {
        (*self.data).clone()
    }

    pub fn pixels(&self) -> &[u8] {
        self.data.as_raw()
    }

    /// True if both frames share the same storage
    pub fn ptr_eq(a: &Frame, b: &Frame) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }

    /// Pack pixels for the device (alpha dropped)
    pub fn to_payload(&self, format: PayloadFormat) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.width() as usize * self.height() as usize * format.bytes_per_pixel(),
        );
        for px in self.data.as_raw().chunks_exact(4) {
            match format {
                PayloadFormat::Rgb565 => {
                    let v = rgb565(px[0], px[1], px[2]);
                    out.extend_from_slice(&v.to_le_bytes());
                }
                PayloadFormat::Rgb888 => out.extend_from_slice(&px[..3]),
            }
        }
        out
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        Frame::ptr_eq(self, other) || *self.data == *other.data
    }
}

#[inline]
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}
