//! PANELCAST - frame production and streaming for small LCD panels
//!
//! Re-exports all modules for use by the binary target.

// Core engine (events, player, session, workers)
pub mod core;

// Frames, transforms, overlay, video sources
pub mod entities;

// Device channel, transport, selection
pub mod device;

// App modules
pub mod cli;
pub mod config;
pub mod metrics;
pub mod settings;
pub mod theme;

// Re-export commonly used types from core
pub use core::event_bus::{BoxedEvent, EventBus, EventEmitter, downcast_event};
pub use core::player::{PlaybackState, Player};
pub use core::session::{PanelGeometry, Session, SessionError};

// Re-export entities
pub use entities::{Frame, OverlayCompositor, OverlayElement, PayloadFormat};
