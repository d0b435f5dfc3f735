//! Block-device transport: raw payload writes to a device node.

use log::debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{DeviceError, DeviceInfo, Transport};

pub struct FileTransport {
    path: PathBuf,
    file: File,
}

impl FileTransport {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| DeviceError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!("Opened device {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Connector-compatible constructor
    pub fn connect(device: &DeviceInfo) -> Result<Box<dyn Transport>, DeviceError> {
        Ok(Box::new(Self::open(&device.path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for FileTransport {
    fn send(&mut self, payload: &[u8], width: u32, height: u32) -> Result<(), DeviceError> {
        if payload.is_empty() || width == 0 || height == 0 {
            return Err(DeviceError::InvalidFrame {
                width,
                height,
                len: payload.len(),
            });
        }
        self.file
            .write_all(payload)
            .and_then(|_| self.file.flush())
            .map_err(|e| DeviceError::Write(e.to_string()))
    }
}
