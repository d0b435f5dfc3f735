//! Core engine modules - events, player, session, workers
//!
//! Everything here except the transfer workers runs on the caller's thread.

pub mod event_bus;
pub mod events;
pub mod player;
pub mod session;
pub mod workers;

// Re-exports for convenience
pub use event_bus::EventBus;
pub use player::Player;
pub use session::Session;
pub use workers::Workers;
