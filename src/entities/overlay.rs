//! Overlay compositor - layers text, images and live metrics onto a background.
//!
//! Elements are kept in an ordered list; later elements draw on top. Metric
//! elements resolve their text from the latest snapshot at render time.
//!
//! Text is shaped with cosmic-text using a process-wide `FontSystem`. When the
//! host has no font faces at all, the built-in embedded-graphics mono font is
//! used instead so overlay text never silently disappears.

use cosmic_text::{Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache};
use embedded_graphics::{
    mono_font::{
        MonoTextStyle,
        ascii::{FONT_6X10, FONT_10X20},
    },
    pixelcolor::Rgb888,
    prelude::*,
    text::{Baseline, Text},
};
use image::RgbaImage;
use lazy_static::lazy_static;
use log::{debug, trace};
use std::sync::Mutex;

use super::frame::Frame;
use super::transform;
use crate::core::event_bus::EventEmitter;
use crate::core::events::{OverlayConfigChangedEvent, OverlayToggledEvent};
use crate::metrics::{MetricsSnapshot, format_metric};

lazy_static! {
    static ref FONT_SYSTEM: Mutex<FontSystem> = Mutex::new(FontSystem::new());
    static ref SWASH_CACHE: Mutex<SwashCache> = Mutex::new(SwashCache::new());
}

pub const DEFAULT_FONT_SIZE: f32 = 16.0;

/// Placeholder for a metric key absent from the snapshot
const MISSING_METRIC: &str = "--";

#[derive(Clone, Debug)]
pub enum ElementKind {
    Text { text: String },
    Image { frame: Frame },
    Metric { key: String, label: String },
}

#[derive(Clone, Debug)]
pub struct OverlayElement {
    pub kind: ElementKind,
    pub x: i32,
    pub y: i32,
    pub visible: bool,
    /// RGBA
    pub color: [u8; 4],
    pub font_size: f32,
}

impl OverlayElement {
    fn with_kind(kind: ElementKind, x: i32, y: i32) -> Self {
        Self {
            kind,
            x,
            y,
            visible: true,
            color: [255, 255, 255, 255],
            font_size: DEFAULT_FONT_SIZE,
        }
    }

    pub fn text(text: impl Into<String>, x: i32, y: i32) -> Self {
        Self::with_kind(ElementKind::Text { text: text.into() }, x, y)
    }

    pub fn image(frame: Frame, x: i32, y: i32) -> Self {
        Self::with_kind(ElementKind::Image { frame }, x, y)
    }

    pub fn metric(key: impl Into<String>, label: impl Into<String>, x: i32, y: i32) -> Self {
        Self::with_kind(
            ElementKind::Metric {
                key: key.into(),
                label: label.into(),
            },
            x,
            y,
        )
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = size.max(1.0);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Text this element draws, resolved against `metrics`. None for images.
    pub fn resolve_text(&self, metrics: &MetricsSnapshot) -> Option<String> {
        match &self.kind {
            ElementKind::Text { text } => Some(text.clone()),
            ElementKind::Metric { key, label } => Some(match metrics.get(key) {
                Some(v) => format!("{}{}", label, format_metric(key, v)),
                None => format!("{}{}", label, MISSING_METRIC),
            }),
            ElementKind::Image { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    InvalidIndex { index: usize, len: usize },
}

impl std::fmt::Display for OverlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayError::InvalidIndex { index, len } => {
                write!(f, "Overlay element index {} out of range (len {})", index, len)
            }
        }
    }
}

impl std::error::Error for OverlayError {}

pub struct OverlayCompositor {
    enabled: bool,
    elements: Vec<OverlayElement>,
    metrics: MetricsSnapshot,
    target_size: (u32, u32),
    emitter: EventEmitter,
}

impl OverlayCompositor {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            enabled: false,
            elements: Vec::new(),
            metrics: MetricsSnapshot::new(),
            target_size: (320, 320),
            emitter,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self, enabled: bool) {
        if self.enabled != enabled {
            debug!("Overlay {}", if enabled { "enabled" } else { "disabled" });
            self.enabled = enabled;
            self.emitter.emit(OverlayToggledEvent(enabled));
        }
    }

    pub fn set_target_size(&mut self, width: u32, height: u32) {
        self.target_size = (width, height);
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    pub fn elements(&self) -> &[OverlayElement] {
        &self.elements
    }

    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    // === Element list ===

    pub fn add_element(&mut self, element: OverlayElement) {
        self.elements.push(element);
        self.changed();
    }

    pub fn update_element(
        &mut self,
        index: usize,
        element: OverlayElement,
    ) -> Result<(), OverlayError> {
        let len = self.elements.len();
        let slot = self
            .elements
            .get_mut(index)
            .ok_or(OverlayError::InvalidIndex { index, len })?;
        *slot = element;
        self.changed();
        Ok(())
    }

    pub fn remove_element(&mut self, index: usize) -> Result<OverlayElement, OverlayError> {
        if index >= self.elements.len() {
            return Err(OverlayError::InvalidIndex {
                index,
                len: self.elements.len(),
            });
        }
        let removed = self.elements.remove(index);
        self.changed();
        Ok(removed)
    }

    pub fn clear(&mut self) {
        if !self.elements.is_empty() {
            self.elements.clear();
            self.changed();
        }
    }

    /// Replace the snapshot. Takes effect on the next `render`.
    pub fn update_metrics(&mut self, snapshot: MetricsSnapshot) {
        self.metrics = snapshot;
    }

    fn changed(&self) {
        self.emitter.emit(OverlayConfigChangedEvent);
    }

    // === Rendering ===

    /// Disabled: `background` itself. Enabled: a new frame at target size with
    /// visible elements drawn in list order.
    pub fn render(&self, background: &Frame) -> Frame {
        if !self.enabled {
            return background.clone();
        }

        let (tw, th) = self.target_size;
        let mut canvas = transform::resize(background, tw, th).to_image();
        for element in self.elements.iter().filter(|e| e.visible) {
            match &element.kind {
                ElementKind::Image { frame } => {
                    image::imageops::overlay(
                        &mut canvas,
                        frame.image(),
                        element.x as i64,
                        element.y as i64,
                    );
                }
                _ => {
                    if let Some(text) = element.resolve_text(&self.metrics) {
                        draw_text(&mut canvas, &text, element);
                    }
                }
            }
        }
        trace!("Overlay rendered {} elements", self.elements.len());
        Frame::from_image(canvas)
    }
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new(EventEmitter::detached())
    }
}

fn draw_text(canvas: &mut RgbaImage, text: &str, element: &OverlayElement) {
    if text.is_empty() {
        return;
    }
    let mut font_system = FONT_SYSTEM.lock().unwrap_or_else(|e| e.into_inner());
    if font_system.db().faces().next().is_none() {
        drop(font_system);
        draw_mono_text(canvas, text, element);
        return;
    }
    let mut swash_cache = SWASH_CACHE.lock().unwrap_or_else(|e| e.into_inner());

    let metrics = Metrics::new(element.font_size, element.font_size * 1.2);
    let mut buffer = Buffer::new(&mut font_system, metrics);
    buffer.set_size(&mut font_system, Some(canvas.width() as f32), None);
    buffer.set_text(
        &mut font_system,
        text,
        &Attrs::new().family(Family::SansSerif),
        Shaping::Advanced,
        None,
    );
    buffer.shape_until_scroll(&mut font_system, false);

    let [r, g, b, a] = element.color;
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    buffer.draw(
        &mut font_system,
        &mut swash_cache,
        Color::rgba(r, g, b, a),
        |gx, gy, w, h, color| {
            if color.a() == 0 {
                return;
            }
            for dy in 0..h as i32 {
                for dx in 0..w as i32 {
                    let px = element.x + gx + dx;
                    let py = element.y + gy + dy;
                    if px < 0 || py < 0 || px >= cw || py >= ch {
                        continue;
                    }
                    let dst = canvas.get_pixel_mut(px as u32, py as u32);
                    blend(&mut dst.0, [color.r(), color.g(), color.b()], color.a());
                }
            }
        },
    );
}

/// Source-over with opaque destination
fn blend(dst: &mut [u8; 4], src: [u8; 3], alpha: u8) {
    let a = alpha as u32;
    for i in 0..3 {
        dst[i] = ((src[i] as u32 * a + dst[i] as u32 * (255 - a)) / 255) as u8;
    }
    dst[3] = dst[3].max(alpha);
}

/// Adapts an RGBA canvas to an embedded-graphics draw target
struct MonoCanvas<'a>(&'a mut RgbaImage);

impl OriginDimensions for MonoCanvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for MonoCanvas<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (w, h) = (self.0.width() as i32, self.0.height() as i32);
        for Pixel(pt, color) in pixels {
            if pt.x >= 0 && pt.y >= 0 && pt.x < w && pt.y < h {
                let rgba = image::Rgba([color.r(), color.g(), color.b(), 255]);
                self.0.put_pixel(pt.x as u32, pt.y as u32, rgba);
            }
        }
        Ok(())
    }
}

fn draw_mono_text(canvas: &mut RgbaImage, text: &str, element: &OverlayElement) {
    let [r, g, b, _] = element.color;
    let font = if element.font_size >= 18.0 { &FONT_10X20 } else { &FONT_6X10 };
    let style = MonoTextStyle::new(font, Rgb888::new(r, g, b));
    let mut target = MonoCanvas(canvas);
    let _ = Text::with_baseline(text, Point::new(element.x, element.y), style, Baseline::Top)
        .draw(&mut target);
}
