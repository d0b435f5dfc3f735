//! Display peripheral access: descriptors, transports, the send channel and
//! the device selection adapter.
//!
//! Command framing for a particular panel lives inside a `Transport`
//! implementation. Everything above it deals in packed pixel payloads.

pub mod channel;
pub mod selection;
pub mod transport;

pub use channel::{Connector, DeviceChannel, DeviceSlot};
pub use selection::DeviceSelection;
pub use transport::FileTransport;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Device descriptor as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    /// Native panel size, if the device reports one
    pub resolution: Option<(u32, u32)>,
}

impl DeviceInfo {
    pub fn new(path: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            path: path.into(),
            name: name.to_string(),
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }
}

/// Device transfer errors
#[derive(Debug)]
pub enum DeviceError {
    NoDevice,
    Open { path: PathBuf, reason: String },
    Write(String),
    InvalidFrame { width: u32, height: u32, len: usize },
    Timeout,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NoDevice => write!(f, "No device selected"),
            DeviceError::Open { path, reason } => {
                write!(f, "Failed to open {}: {}", path.display(), reason)
            }
            DeviceError::Write(e) => write!(f, "Write failed: {}", e),
            DeviceError::InvalidFrame { width, height, len } => {
                write!(f, "Invalid frame {}x{} ({} bytes)", width, height, len)
            }
            DeviceError::Timeout => write!(f, "Device transfer timed out"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Physical write path to one device.
///
/// A transport is used by one thread at a time; the channel hands it to the
/// worker that owns the current transfer.
pub trait Transport: Send {
    fn send(&mut self, payload: &[u8], width: u32, height: u32) -> Result<(), DeviceError>;
}
