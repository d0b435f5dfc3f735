//! Device selection adapter.
//!
//! Holds the device list handed in by enumeration and the current selection.
//! The selected path is persisted through the settings store.

use log::{info, warn};

use super::DeviceInfo;
use crate::core::event_bus::EventEmitter;
use crate::core::events::{DeviceSelectedEvent, DevicesChangedEvent};
use crate::settings::{KEY_SELECTED_DEVICE, SettingsStore};

pub struct DeviceSelection {
    devices: Vec<DeviceInfo>,
    selected: Option<DeviceInfo>,
    settings: Option<SettingsStore>,
    emitter: EventEmitter,
}

impl DeviceSelection {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            devices: Vec::new(),
            selected: None,
            settings: None,
            emitter,
        }
    }

    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn selected(&self) -> Option<&DeviceInfo> {
        self.selected.as_ref()
    }

    /// Replace the device list. A selection that vanished from the list is cleared.
    pub fn set_devices(&mut self, devices: Vec<DeviceInfo>) {
        self.devices = devices;
        if let Some(sel) = &self.selected
            && !self.devices.iter().any(|d| d.path == sel.path)
        {
            info!("Selected device {} disappeared", sel.path.display());
            self.selected = None;
        }
        self.emitter.emit(DevicesChangedEvent(self.devices.len()));
    }

    pub fn select(&mut self, device: DeviceInfo) {
        info!("Device selected: {} ({})", device.name, device.path.display());
        if let Some(settings) = &self.settings
            && let Err(e) = settings.set(
                KEY_SELECTED_DEVICE,
                serde_json::Value::String(device.path.to_string_lossy().into_owned()),
            )
        {
            warn!("Failed to persist selected device: {:#}", e);
        }
        self.selected = Some(device.clone());
        self.emitter.emit(DeviceSelectedEvent(device));
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Device from the list matching the persisted selection, if any
    pub fn restore(&self) -> Option<DeviceInfo> {
        let path = self.settings.as_ref()?.get_str(KEY_SELECTED_DEVICE)?;
        self.devices
            .iter()
            .find(|d| d.path.to_string_lossy() == path)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventBus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[test]
    fn test_initial_state() {
        let sel = DeviceSelection::new(EventEmitter::detached());
        assert!(sel.devices().is_empty());
        assert!(sel.selected().is_none());
    }

    #[test]
    fn test_select_fires_event() {
        let bus = EventBus::new();
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        bus.subscribe::<DeviceSelectedEvent, _>(move |e| {
            f.lock().unwrap().push(e.0.path.clone());
        });

        let mut sel = DeviceSelection::new(bus.emitter());
        sel.select(DeviceInfo::new("/dev/sg0", "LCD"));

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].to_string_lossy(), "/dev/sg0");
    }

    #[test]
    fn test_devices_changed_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(usize::MAX));
        let c = Arc::clone(&count);
        bus.subscribe::<DevicesChangedEvent, _>(move |e| {
            c.store(e.0, Ordering::SeqCst);
        });

        let mut sel = DeviceSelection::new(bus.emitter());
        sel.set_devices(vec![DeviceInfo::new("/dev/sg0", "A")]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_selection_cleared_when_device_removed() {
        let mut sel = DeviceSelection::new(EventEmitter::detached());
        sel.set_devices(vec![DeviceInfo::new("/dev/sg0", "A")]);
        sel.select(DeviceInfo::new("/dev/sg0", "A"));
        sel.set_devices(vec![DeviceInfo::new("/dev/sg1", "B")]);
        assert!(sel.selected().is_none());
    }

    #[test]
    fn test_restore_persisted_selection() {
        let dir = std::env::temp_dir().join(format!("panelcast_sel_{}", Uuid::new_v4()));
        let store = SettingsStore::new(dir.join("settings.json"));

        let mut sel = DeviceSelection::new(EventEmitter::detached()).with_settings(store.clone());
        sel.select(DeviceInfo::new("/dev/sg1", "B"));

        let mut fresh = DeviceSelection::new(EventEmitter::detached()).with_settings(store);
        fresh.set_devices(vec![
            DeviceInfo::new("/dev/sg0", "A"),
            DeviceInfo::new("/dev/sg1", "B"),
        ]);
        assert_eq!(fresh.restore().map(|d| d.name), Some("B".to_string()));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
