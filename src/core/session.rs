//! Session orchestrator: panel geometry, working area and the per-tick send.
//!
//! Owns the player, the overlay compositor, both selection adapters and the
//! channel to the selected device, and is the single place panel size is
//! fanned out to them.
//!
//! # Per-tick pipeline
//!
//! ```text
//! background (video frame | static image)
//!   -> resize to logical size (axes swapped for 90/270)
//!   -> overlay render
//!   -> rotate
//!   -> brightness
//!   -> payload -> DeviceChannel::submit_async   (only if auto_send)
//! ```
//!
//! Everything except the device transfer runs on the caller's thread.

use log::{debug, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::core::event_bus::{EventBus, EventEmitter};
use crate::core::events::{
    BrightnessChangedEvent, ErrorEvent, ResolutionChangedEvent, RotationChangedEvent, StatusEvent,
};
use crate::core::player::{PlaybackError, PlaybackState, Player, VideoSource};
use crate::core::workers::Workers;
use crate::device::{
    Connector, DeviceChannel, DeviceError, DeviceInfo, DeviceSelection, DeviceSlot,
};
use crate::entities::overlay::OverlayCompositor;
use crate::entities::{Frame, FrameError, transform, video};
use crate::metrics::MetricsSnapshot;
use crate::settings::{KEY_BRIGHTNESS, KEY_RESOLUTION, KEY_ROTATION, SettingsStore};
use crate::theme::{ThemeInfo, ThemeSelection};

/// Physical panel size plus the transforms applied before every send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelGeometry {
    pub width: u32,
    pub height: u32,
    pub rotation: u16,
    pub brightness: u8,
}

impl PanelGeometry {
    /// Size content is composed at, before rotation
    pub fn logical_size(&self) -> (u32, u32) {
        if transform::swaps_axes(self.rotation) {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    InvalidHex(String),
}

impl std::fmt::Display for ColorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorError::InvalidHex(s) => {
                write!(f, "Invalid color '{}': expected 6 hex digits (#rrggbb)", s)
            }
        }
    }
}

impl std::error::Error for ColorError {}

/// `#rrggbb` or `rrggbb`
pub fn parse_hex_color(s: &str) -> Result<[u8; 3], ColorError> {
    let hex = s.trim().strip_prefix('#').unwrap_or(s.trim());
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ColorError::InvalidHex(s.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorError::InvalidHex(s.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[derive(Debug)]
pub enum SessionError {
    Color(ColorError),
    Device(DeviceError),
    Playback(PlaybackError),
    Frame(FrameError),
    Io(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Color(e) => write!(f, "{}", e),
            SessionError::Device(e) => write!(f, "{}", e),
            SessionError::Playback(e) => write!(f, "{}", e),
            SessionError::Frame(e) => write!(f, "{}", e),
            SessionError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ColorError> for SessionError {
    fn from(e: ColorError) -> Self {
        SessionError::Color(e)
    }
}

impl From<DeviceError> for SessionError {
    fn from(e: DeviceError) -> Self {
        SessionError::Device(e)
    }
}

impl From<PlaybackError> for SessionError {
    fn from(e: PlaybackError) -> Self {
        SessionError::Playback(e)
    }
}

impl From<FrameError> for SessionError {
    fn from(e: FrameError) -> Self {
        SessionError::Frame(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e.to_string())
    }
}

pub struct Session {
    config: SessionConfig,
    geometry: PanelGeometry,
    auto_send: bool,
    settings: SettingsStore,
    bus: EventBus,
    emitter: EventEmitter,

    player: Player,
    overlay: OverlayCompositor,
    devices: DeviceSelection,
    themes: ThemeSelection,

    connector: Connector,
    workers: Arc<Workers>,
    channel: Option<DeviceChannel>,
    /// One slot per device path, outliving the channels opened on it
    slots: HashMap<PathBuf, Arc<DeviceSlot>>,

    background: Option<Frame>,
    preview: Option<Frame>,
    working_dir: PathBuf,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        settings: SettingsStore,
        connector: Connector,
    ) -> Result<Self, SessionError> {
        Self::with_bus(config, settings, connector, EventBus::new())
    }

    /// Like `new`, publishing on an existing bus
    pub fn with_bus(
        config: SessionConfig,
        settings: SettingsStore,
        connector: Connector,
        bus: EventBus,
    ) -> Result<Self, SessionError> {
        let (width, height) = settings
            .get_resolution()
            .unwrap_or((config.width.max(1), config.height.max(1)));
        let rotation = settings
            .get_u64(KEY_ROTATION)
            .map(|r| transform::wrap_degrees((r % 360) as i32))
            .unwrap_or_else(|| transform::wrap_degrees(config.rotation as i32));
        let brightness = settings
            .get_u64(KEY_BRIGHTNESS)
            .map(|b| b.min(100) as u8)
            .unwrap_or(config.brightness.min(100));
        let geometry = PanelGeometry {
            width,
            height,
            rotation,
            brightness,
        };

        let working_dir =
            std::env::temp_dir().join(format!("panelcast_session_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&working_dir)
            .map_err(|e| SessionError::Io(format!("{}: {}", working_dir.display(), e)))?;

        let emitter = bus.emitter();
        let mut player = Player::new(emitter.clone());
        player.set_fps(config.fps);
        let overlay = OverlayCompositor::new(emitter.clone());
        let devices = DeviceSelection::new(emitter.clone()).with_settings(settings.clone());
        let mut themes = ThemeSelection::new(emitter.clone()).with_settings(settings.clone());
        if let Some(dir) = &config.theme_dir {
            themes.set_directory(dir);
        }
        let workers = Arc::new(Workers::new(config.transfer_workers));

        info!(
            "Session started: {}x{} rot {} bright {}%, working dir {}",
            width,
            height,
            rotation,
            brightness,
            working_dir.display()
        );

        let mut session = Self {
            auto_send: config.auto_send,
            config,
            geometry,
            settings,
            bus,
            emitter,
            player,
            overlay,
            devices,
            themes,
            connector,
            workers,
            channel: None,
            slots: HashMap::new(),
            background: None,
            preview: None,
            working_dir,
        };
        session.fan_out_size();
        Ok(session)
    }

    // === Accessors ===

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    pub fn overlay(&self) -> &OverlayCompositor {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut OverlayCompositor {
        &mut self.overlay
    }

    pub fn devices(&self) -> &DeviceSelection {
        &self.devices
    }

    pub fn themes(&self) -> &ThemeSelection {
        &self.themes
    }

    pub fn themes_mut(&mut self) -> &mut ThemeSelection {
        &mut self.themes
    }

    pub fn channel(&self) -> Option<&DeviceChannel> {
        self.channel.as_ref()
    }

    pub fn auto_send(&self) -> bool {
        self.auto_send
    }

    pub fn set_auto_send(&mut self, enabled: bool) {
        self.auto_send = enabled;
    }

    // === Geometry ===

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring empty resolution {}x{}", width, height);
            return;
        }
        if (self.geometry.width, self.geometry.height) == (width, height) {
            return;
        }
        info!(
            "Resolution {}x{} -> {}x{}",
            self.geometry.width, self.geometry.height, width, height
        );
        self.geometry.width = width;
        self.geometry.height = height;
        self.fan_out_size();
        self.persist(KEY_RESOLUTION, json!([width, height]));
        self.emitter.emit(ResolutionChangedEvent { width, height });
    }

    pub fn set_rotation(&mut self, degrees: i32) {
        let rotation = transform::wrap_degrees(degrees);
        if rotation == self.geometry.rotation {
            return;
        }
        self.geometry.rotation = rotation;
        self.fan_out_size();
        self.persist(KEY_ROTATION, json!(rotation));
        self.emitter.emit(RotationChangedEvent(rotation));
    }

    pub fn set_brightness(&mut self, percent: i32) {
        let brightness = percent.clamp(0, 100) as u8;
        if brightness == self.geometry.brightness {
            return;
        }
        self.geometry.brightness = brightness;
        self.persist(KEY_BRIGHTNESS, json!(brightness));
        self.emitter.emit(BrightnessChangedEvent(brightness));
    }

    /// Push the composition size to the player and overlay
    fn fan_out_size(&mut self) {
        let (w, h) = self.geometry.logical_size();
        self.player.set_target_size(w, h);
        self.overlay.set_target_size(w, h);
    }

    fn persist(&self, key: &str, value: serde_json::Value) {
        if let Err(e) = self.settings.set(key, value) {
            warn!("Failed to persist {}: {:#}", key, e);
        }
    }

    // === Devices ===

    /// New device list. Restores the persisted device if nothing is selected.
    pub fn set_devices(&mut self, devices: Vec<DeviceInfo>) {
        self.devices.set_devices(devices);
        if self
            .channel
            .as_ref()
            .is_some_and(|c| self.devices.selected().is_none_or(|d| d.path != c.device().path))
        {
            info!("Closing channel to vanished device");
            self.channel = None;
        }
        if self.devices.selected().is_none()
            && let Some(device) = self.devices.restore()
        {
            self.select_device(device);
        }
    }

    /// Open a channel to `device`. Reselecting a device reuses its slot, so a
    /// transfer still in flight keeps blocking new ones.
    pub fn select_device(&mut self, device: DeviceInfo) {
        self.devices.select(device.clone());
        let slot = Arc::clone(self.slots.entry(device.path.clone()).or_default());
        self.channel = Some(DeviceChannel::with_slot(
            device.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.workers),
            self.emitter.clone(),
            self.config.transfer_timeout(),
            slot,
        ));
        self.on_device_selected(&device);
    }

    /// Adopt the device's native resolution when it differs
    pub fn on_device_selected(&mut self, device: &DeviceInfo) {
        if let Some((w, h)) = device.resolution
            && (w, h) != (self.geometry.width, self.geometry.height)
        {
            self.set_resolution(w, h);
        }
    }

    // === Themes ===

    /// Stage `theme` and make it current.
    ///
    /// Everything that can fail (decoding the background and any animation,
    /// staging the files) happens before the selection, background or player
    /// change. On error the previous theme stays in effect.
    pub fn select_theme(&mut self, theme: ThemeInfo) -> Result<(), SessionError> {
        let (background, animation) = match self.decode_theme(&theme) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.report_error(format!("Theme {} unusable: {}", theme.name, e));
                return Err(e);
            }
        };
        if let Err(e) = self.stage_theme(&theme) {
            self.report_error(format!("Failed to stage theme {}: {}", theme.name, e));
            return Err(e);
        }

        self.themes.select(theme.clone());
        self.background = Some(background);
        match animation {
            Some(source) => {
                self.player.load(source)?;
                self.player.play();
            }
            None => self.player.unload(),
        }
        self.status(format!("Theme: {}", theme.name));
        self.refresh();
        Ok(())
    }

    /// Background frame plus the animation to play, read from the theme source
    fn decode_theme(
        &self,
        theme: &ThemeInfo,
    ) -> Result<(Frame, Option<VideoSource>), SessionError> {
        let background = Frame::open(&theme.background())?;
        let target = self.geometry.logical_size();
        let fps = self.player.fps();

        if video::numbered_images(&theme.source_dir).len() > 1 {
            let source = video::load_sequence(&theme.source_dir, target, fps)?;
            return Ok((background, Some(source)));
        }
        let animation = video::find_video(&theme.source_dir).and_then(|path| {
            match video::load_source(&path, target, fps) {
                Ok(source) if source.frame_count() > 0 => Some(source),
                Ok(_) => {
                    warn!("Theme video {} has no frames", path.display());
                    None
                }
                Err(e) => {
                    warn!("Theme video {} unusable: {}", path.display(), e);
                    None
                }
            }
        });
        Ok((background, animation))
    }

    fn stage_theme(&self, theme: &ThemeInfo) -> Result<(), SessionError> {
        self.clear_working_dir()?;
        let copied = self.copy_to_working_dir(&theme.source_dir)?;
        debug!("Staged {} files from theme {}", copied, theme.name);
        Ok(())
    }

    // === Playback ===

    pub fn load_video(&mut self, path: &Path) -> Result<(), SessionError> {
        match self.player.load_path(path) {
            Ok(()) => {
                self.status(format!(
                    "Loaded {} ({} frames)",
                    path.display(),
                    self.player.frame_count()
                ));
                Ok(())
            }
            Err(e) => {
                self.report_error(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn play_pause(&mut self) {
        self.player.toggle();
    }

    pub fn stop_video(&mut self) {
        self.player.stop();
    }

    pub fn seek_video(&mut self, percent: f32) {
        self.player.seek(percent);
    }

    pub fn is_video_playing(&self) -> bool {
        self.player.is_playing()
    }

    /// One scheduler tick. Returns the composed frame when one was produced.
    ///
    /// While playing, the next video frame is composed and offered to the
    /// device. Otherwise an enabled overlay refreshes over the current
    /// background so live metrics stay current.
    pub fn tick(&mut self) -> Option<Frame> {
        let background = match self.player.tick() {
            Some(frame) => frame,
            None if self.overlay.is_enabled() => self.current_background()?,
            None => return None,
        };
        let frame = self.compose(&background);
        if self.auto_send {
            self.submit(&frame);
        }
        Some(frame)
    }

    // === Images ===

    pub fn set_background(&mut self, frame: Frame) {
        self.background = Some(frame);
        self.refresh();
    }

    /// Static image (theme background or one set explicitly)
    pub fn current_image(&self) -> Option<&Frame> {
        self.background.as_ref()
    }

    /// Last composed frame
    pub fn preview(&self) -> Option<&Frame> {
        self.preview.as_ref()
    }

    pub fn update_metrics(&mut self, snapshot: MetricsSnapshot) {
        self.overlay.update_metrics(snapshot);
    }

    /// Background for composition: paused/playing video frame, else the static image
    fn current_background(&self) -> Option<Frame> {
        if self.player.state() != PlaybackState::Stopped
            && let Some(frame) = self.player.current()
        {
            return Some(frame);
        }
        self.background.clone()
    }

    /// Full transform chain for one background frame
    pub fn compose(&mut self, background: &Frame) -> Frame {
        let (lw, lh) = self.geometry.logical_size();
        let sized = transform::resize(background, lw, lh);
        let layered = self.overlay.render(&sized);
        let rotated = transform::rotate(&layered, self.geometry.rotation);
        let frame = transform::scale_brightness(&rotated, self.geometry.brightness);
        self.preview = Some(frame.clone());
        frame
    }

    /// Recompose the preview and, with auto_send, offer it to the device
    fn refresh(&mut self) {
        if self.player.is_playing() {
            return;
        }
        if let Some(background) = self.current_background() {
            let frame = self.compose(&background);
            if self.auto_send {
                self.submit(&frame);
            }
        }
    }

    // === Sending ===

    /// Async busy-drop submit. False when dropped or no device is selected.
    fn submit(&self, frame: &Frame) -> bool {
        let Some(channel) = &self.channel else {
            debug!("No device selected, frame not sent");
            return false;
        };
        let payload = frame.to_payload(self.config.payload_format);
        channel.submit_async(payload, frame.width(), frame.height())
    }

    /// Compose the current image and offer it to the device. No image: no-op.
    pub fn send_current_image(&mut self) -> bool {
        let Some(background) = self.current_background() else {
            debug!("No current image to send");
            return false;
        };
        let frame = self.compose(&background);
        self.submit(&frame)
    }

    /// Fill the panel with one color, waiting for the device if it is busy
    pub fn send_color(&mut self, hex: &str) -> Result<(), SessionError> {
        let [r, g, b] = parse_hex_color(hex)?;
        let Some(channel) = &self.channel else {
            self.report_error(DeviceError::NoDevice.to_string());
            return Err(DeviceError::NoDevice.into());
        };

        let solid = Frame::solid(self.geometry.width, self.geometry.height, [r, g, b, 255]);
        let frame = transform::scale_brightness(&solid, self.geometry.brightness);
        let payload = frame.to_payload(self.config.payload_format);
        match channel.send_now(&payload, frame.width(), frame.height()) {
            Ok(()) => {
                self.status(format!("Sent color #{:02x}{:02x}{:02x}", r, g, b));
                self.preview = Some(frame);
                Ok(())
            }
            // The channel already reported the failure on the bus
            Err(e) => Err(e.into()),
        }
    }

    fn status(&self, message: String) {
        debug!("Status: {}", message);
        self.emitter.emit(StatusEvent(message));
    }

    fn report_error(&self, message: String) {
        warn!("{}", message);
        self.emitter.emit(ErrorEvent(message));
    }

    // === Working area ===

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Remove and recreate the working directory empty
    pub fn clear_working_dir(&self) -> Result<(), SessionError> {
        match std::fs::remove_dir_all(&self.working_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&self.working_dir)?;
        Ok(())
    }

    /// Flat copy of the regular files in `src`. Subdirectories are skipped.
    pub fn copy_to_working_dir(&self, src: &Path) -> Result<usize, SessionError> {
        std::fs::create_dir_all(&self.working_dir)?;
        let mut copied = 0;
        for entry in std::fs::read_dir(src)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name() {
                std::fs::copy(&path, self.working_dir.join(name))?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// Remove the working directory. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        match std::fs::remove_dir_all(&self.working_dir) {
            Ok(()) => debug!("Removed {}", self.working_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.working_dir.display(), e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cleanup();
    }
}
