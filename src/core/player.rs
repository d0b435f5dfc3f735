//! Playback engine: state machine and frame-time accounting for video sources.
//!
//! **Architecture**: Player does NOT own a timer. An external scheduler calls
//! `tick()` every `frame_interval_ms()`; each tick while playing advances one
//! frame (looping) and emits `SendFrameEvent` with that frame.
//!
//! **Used by**: Session (per-tick send decision), CLI play loop
//!
//! # States
//!
//! ```text
//! Stopped --play--> Playing --pause--> Paused
//!    ^                 |                  |
//!    +------stop-------+------stop--------+
//! ```
//!
//! `play()` requires at least one frame. `load()` always lands in Stopped at
//! frame 0. Target size is pushed in by the session; the player never reads
//! device geometry itself.

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::event_bus::EventEmitter;
use crate::core::events::{PlaybackStateEvent, SendFrameEvent, VideoLoadedEvent};
use crate::entities::Frame;
use crate::entities::video;

/// Default playback rate (62 ms per frame)
pub const DEFAULT_FPS: f32 = 16.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Decoded frames plus the rate they should play at
#[derive(Clone, Debug)]
pub struct VideoSource {
    frames: Vec<Frame>,
    fps: f32,
}

impl VideoSource {
    pub fn from_frames(frames: Vec<Frame>, fps: f32) -> Self {
        Self { frames, fps }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Size of the first frame
    pub fn size(&self) -> Option<(u32, u32)> {
        self.frames.first().map(Frame::resolution)
    }
}

#[derive(Debug)]
pub enum PlaybackError {
    EmptySource,
    Decode(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::EmptySource => write!(f, "Video source has no frames"),
            PlaybackError::Decode(e) => write!(f, "Failed to decode video: {}", e),
        }
    }
}

impl std::error::Error for PlaybackError {}

pub struct Player {
    state: PlaybackState,
    frames: Vec<Frame>,
    current_frame: usize,
    fps: f32,
    target_size: (u32, u32),
    emitter: EventEmitter,
}

impl Player {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            state: PlaybackState::Stopped,
            frames: Vec::new(),
            current_frame: 0,
            fps: DEFAULT_FPS,
            target_size: (320, 320),
            emitter,
        }
    }

    // === Source ===

    /// Swap in a new source. On error nothing changes.
    pub fn load(&mut self, source: VideoSource) -> Result<(), PlaybackError> {
        if source.frames.is_empty() {
            return Err(PlaybackError::EmptySource);
        }

        let (width, height) = source.size().unwrap_or(self.target_size);
        self.frames = source.frames;
        if source.fps > 0.0 {
            self.fps = source.fps;
        }
        self.current_frame = 0;
        self.set_state(PlaybackState::Stopped);

        info!(
            "Video loaded: {} frames, {:.1} fps, {}x{}",
            self.frames.len(),
            self.fps,
            width,
            height
        );
        self.emitter.emit(VideoLoadedEvent {
            frame_count: self.frames.len(),
            fps: self.fps,
            width,
            height,
            state: self.state,
        });
        Ok(())
    }

    /// Decode a video file or frame-sequence directory at the current target size
    pub fn load_path(&mut self, path: &Path) -> Result<(), PlaybackError> {
        let source = video::load_source(path, self.target_size, self.fps)
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;
        self.load(source)
    }

    /// Drop all frames and stop
    pub fn unload(&mut self) {
        self.frames.clear();
        self.current_frame = 0;
        self.set_state(PlaybackState::Stopped);
    }

    // === Transport controls ===

    pub fn play(&mut self) {
        if self.frames.is_empty() || self.state == PlaybackState::Playing {
            return;
        }
        self.set_state(PlaybackState::Playing);
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.set_state(PlaybackState::Paused);
        }
    }

    pub fn stop(&mut self) {
        self.current_frame = 0;
        self.set_state(PlaybackState::Stopped);
    }

    pub fn toggle(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to `percent` of the source. Play state is kept.
    pub fn seek(&mut self, percent: f32) {
        let count = self.frames.len();
        if count == 0 {
            self.current_frame = 0;
            return;
        }
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        let target = (percent / 100.0 * count as f32).round_ties_even() as usize;
        self.current_frame = target.min(count - 1);
        debug!("Seek {:.1}% -> frame {}/{}", percent, self.current_frame, count);
    }

    /// Advance one frame while playing and offer it downstream.
    pub fn tick(&mut self) -> Option<Frame> {
        if self.state != PlaybackState::Playing || self.frames.is_empty() {
            return None;
        }
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        let frame = self.frames[self.current_frame].clone();
        trace!("Tick -> frame {}", self.current_frame);
        self.emitter.emit(SendFrameEvent(frame.clone()));
        Some(frame)
    }

    // === Timing ===

    /// Tick cadence for the external scheduler
    pub fn frame_interval_ms(&self) -> u64 {
        (1000.0 / self.fps).round_ties_even() as u64
    }

    pub fn set_fps(&mut self, fps: f32) {
        self.fps = if fps.is_finite() { fps.max(1.0) } else { DEFAULT_FPS };
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    // === Queries ===

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Frame under the cursor, without advancing
    pub fn current(&self) -> Option<Frame> {
        self.frames.get(self.current_frame).cloned()
    }

    pub fn progress_percent(&self) -> f32 {
        match self.frames.len() {
            0 => 0.0,
            n => self.current_frame as f32 * 100.0 / n as f32,
        }
    }

    pub fn set_target_size(&mut self, width: u32, height: u32) {
        self.target_size = (width, height);
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("Playback {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emitter.emit(PlaybackStateEvent(state));
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(EventEmitter::detached())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventBus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(n: usize) -> VideoSource {
        let frames = (0..n)
            .map(|i| Frame::solid(2, 2, [i as u8, 0, 0, 255]))
            .collect();
        VideoSource::from_frames(frames, DEFAULT_FPS)
    }

    fn send_counter(bus: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe::<SendFrameEvent, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_initial_state() {
        let player = Player::default();
        assert!(!player.is_playing());
        assert!(!player.has_frames());
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_set_target_size() {
        let mut player = Player::default();
        player.set_target_size(480, 480);
        assert_eq!(player.target_size(), (480, 480));
    }

    #[test]
    fn test_play_pause_stop() {
        let mut player = Player::default();
        player.load(source(10)).unwrap();

        player.play();
        assert!(player.is_playing());
        player.pause();
        assert_eq!(player.state(), PlaybackState::Paused);
        player.play();
        player.tick();
        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert_eq!(player.current_frame(), 0);
    }

    #[test]
    fn test_play_without_frames_is_noop() {
        let mut player = Player::default();
        player.play();
        assert!(!player.is_playing());
        player.toggle();
        assert!(!player.is_playing());
    }

    #[test]
    fn test_toggle() {
        let mut player = Player::default();
        player.load(source(10)).unwrap();
        player.toggle();
        assert!(player.is_playing());
        player.toggle();
        assert_eq!(player.state(), PlaybackState::Paused);
        player.toggle();
        assert!(player.is_playing());
    }

    #[test]
    fn test_pause_from_stopped_is_noop() {
        let mut player = Player::default();
        player.load(source(3)).unwrap();
        player.pause();
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_seek() {
        let mut player = Player::default();
        player.load(source(100)).unwrap();
        player.seek(50.0);
        assert_eq!(player.current_frame(), 50);
        player.seek(100.0);
        assert_eq!(player.current_frame(), 99);
        player.seek(-5.0);
        assert_eq!(player.current_frame(), 0);
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_tick_when_not_playing() {
        let bus = EventBus::new();
        let sent = send_counter(&bus);
        let mut player = Player::new(bus.emitter());
        assert!(player.tick().is_none());

        player.load(source(2)).unwrap();
        assert!(player.tick().is_none());
        player.play();
        player.pause();
        assert!(player.tick().is_none());
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tick_advances_frame() {
        let bus = EventBus::new();
        let sent = send_counter(&bus);
        let mut player = Player::new(bus.emitter());
        let src = source(2);
        let second = src.frames()[1].clone();
        player.load(src).unwrap();
        player.play();

        let frame = player.tick().unwrap();
        assert!(Frame::ptr_eq(&frame, &second));
        assert_eq!(player.current_frame(), 1);
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        // Loops back to the first frame
        player.tick();
        assert_eq!(player.current_frame(), 0);
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_frame_interval() {
        let mut player = Player::default();
        assert_eq!(player.frame_interval_ms(), 62);
        player.set_fps(25.0);
        assert_eq!(player.frame_interval_ms(), 40);
        player.set_fps(0.0);
        assert_eq!(player.frame_interval_ms(), 1000);
    }

    #[test]
    fn test_load_resets_cursor_and_state() {
        let mut player = Player::default();
        player.load(source(5)).unwrap();
        player.play();
        player.tick();
        player.tick();

        player.load(source(3)).unwrap();
        assert_eq!(player.current_frame(), 0);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert_eq!(player.frame_count(), 3);
    }

    #[test]
    fn test_failed_load_keeps_state() {
        let bus = EventBus::new();
        let loaded = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&loaded);
        bus.subscribe::<VideoLoadedEvent, _>(move |_| {
            l.fetch_add(1, Ordering::SeqCst);
        });

        let mut player = Player::new(bus.emitter());
        player.load(source(4)).unwrap();
        player.play();
        player.tick();

        assert!(player.load(source(0)).is_err());
        assert!(player.is_playing());
        assert_eq!(player.current_frame(), 1);
        assert_eq!(player.frame_count(), 4);
        assert_eq!(loaded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_video_loaded_event() {
        let bus = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = Arc::clone(&seen);
        bus.subscribe::<VideoLoadedEvent, _>(move |e| {
            *s.lock().unwrap() = Some(e.clone());
        });

        let mut player = Player::new(bus.emitter());
        player.load(source(7)).unwrap();

        let event = seen.lock().unwrap().clone().unwrap();
        assert_eq!(event.frame_count, 7);
        assert_eq!(event.state, PlaybackState::Stopped);
        assert_eq!((event.width, event.height), (2, 2));
    }
}
