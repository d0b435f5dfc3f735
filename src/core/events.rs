//! Notification types emitted through the event bus.
//!
//! One type per notification. Payloads are small and `Clone`; frames are
//! shared `Arc`s, not copies.

use crate::core::player::PlaybackState;
use crate::device::DeviceInfo;
use crate::entities::Frame;
use crate::theme::{ThemeFilter, ThemeInfo};

// === Panel geometry ===

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionChangedEvent {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationChangedEvent(pub u16);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrightnessChangedEvent(pub u8);

// === Playback ===

#[derive(Clone, Debug, PartialEq)]
pub struct VideoLoadedEvent {
    pub frame_count: usize,
    pub fps: f32,
    pub width: u32,
    pub height: u32,
    pub state: PlaybackState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackStateEvent(pub PlaybackState);

/// Frame produced by a playback tick, offered downstream
#[derive(Clone, Debug)]
pub struct SendFrameEvent(pub Frame);

// === Overlay ===

#[derive(Clone, Debug)]
pub struct OverlayConfigChangedEvent;

#[derive(Clone, Debug)]
pub struct OverlayToggledEvent(pub bool);

// === Device ===

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendStartedEvent {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendFinishedEvent {
    pub width: u32,
    pub height: u32,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug)]
pub struct DevicesChangedEvent(pub usize);

#[derive(Clone, Debug)]
pub struct DeviceSelectedEvent(pub DeviceInfo);

// === Themes ===

#[derive(Clone, Debug)]
pub struct ThemesLoadedEvent(pub usize);

#[derive(Clone, Debug)]
pub struct ThemeSelectedEvent(pub ThemeInfo);

#[derive(Clone, Debug)]
pub struct ThemeFilterChangedEvent(pub ThemeFilter);

// === User feedback ===

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent(pub String);
