//! Entities module - frames and what produces or transforms them
//!
//! - `frame`: shared RGBA frame and device payload encoding
//! - `transform`: resize, rotate, brightness
//! - `overlay`: element list composited over a background
//! - `video`: numbered-still and container decoding into a `VideoSource`

pub mod frame;
pub mod overlay;
pub mod transform;
pub mod video;

pub use frame::{Frame, FrameError, PayloadFormat};
pub use overlay::{ElementKind, OverlayCompositor, OverlayElement, OverlayError};
