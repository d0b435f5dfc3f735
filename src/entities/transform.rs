//! Geometry and brightness transforms applied before every device send.
//!
//! All functions are pure. The no-op cases (matching size, 0° rotation,
//! 100% brightness) return a clone of the input `Frame`, which shares the
//! same storage: callers can test for it with `Frame::ptr_eq`.
//!
//! Rotation is clockwise in 90° steps.

use image::imageops::{self, FilterType};
use rayon::prelude::*;

use super::frame::Frame;

/// Supported panel rotations in degrees
pub const ROTATIONS: [u16; 4] = [0, 90, 180, 270];

/// Wrap any angle into `[0, 360)`
pub fn wrap_degrees(degrees: i32) -> u16 {
    degrees.rem_euclid(360) as u16
}

/// Map any angle to the nearest supported quadrant in `[0, 360)`.
pub fn normalize_rotation(degrees: i32) -> u16 {
    let wrapped = degrees.rem_euclid(360);
    (((wrapped + 45) / 90 % 4) * 90) as u16
}

/// True when rotating by `degrees` swaps width and height
#[inline]
pub fn swaps_axes(degrees: u16) -> bool {
    matches!(normalize_rotation(degrees as i32), 90 | 270)
}

/// Resample to exactly `width` x `height` (bilinear).
pub fn resize(frame: &Frame, width: u32, height: u32) -> Frame {
    if frame.resolution() == (width, height) {
        return frame.clone();
    }
    Frame::from_image(imageops::resize(frame.image(), width, height, FilterType::Triangle))
}

/// Rotate clockwise by a quadrant angle. Other angles snap to the nearest quadrant.
pub fn rotate(frame: &Frame, degrees: u16) -> Frame {
    match normalize_rotation(degrees as i32) {
        0 => frame.clone(),
        90 => Frame::from_image(imageops::rotate90(frame.image())),
        180 => Frame::from_image(imageops::rotate180(frame.image())),
        _ => Frame::from_image(imageops::rotate270(frame.image())),
    }
}

/// Scale RGB samples by `percent / 100`. Alpha is left as is.
pub fn scale_brightness(frame: &Frame, percent: u8) -> Frame {
    let percent = percent.min(100);
    if percent == 100 {
        return frame.clone();
    }

    let mut img = frame.to_image();
    let row_bytes = img.width() as usize * 4;
    if row_bytes == 0 {
        return Frame::from_image(img);
    }

    let factor = percent as u32;
    let buf: &mut [u8] = &mut img;
    buf.par_chunks_mut(row_bytes).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = ((*c as u32 * factor) / 100).min(255) as u8;
            }
        }
    });

    Frame::from_image(img)
}
