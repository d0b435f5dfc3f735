//! Host metrics for METRIC overlay elements
//!
//! The compositor only reads a `MetricsSnapshot`; a `MetricsSource` produces
//! them. `SystemMetrics` polls the host through `sysinfo`.

use log::trace;
use std::collections::BTreeMap;
use sysinfo::{Components, System};

pub type MetricValue = f64;

/// Metric key -> current value, replaced wholesale on each update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    values: BTreeMap<String, MetricValue>,
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: MetricValue) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn insert(&mut self, key: &str, value: MetricValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<MetricValue> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, MetricValue)> for MetricsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, MetricValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Anything that can report current metrics on demand
pub trait MetricsSource {
    fn snapshot(&mut self) -> MetricsSnapshot;
}

/// Host metrics via sysinfo
pub struct SystemMetrics {
    sys: System,
    components: Components,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMetrics {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl MetricsSource for SystemMetrics {
    fn snapshot(&mut self) -> MetricsSnapshot {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.components.refresh(false);

        let mut snap = MetricsSnapshot::new();
        snap.insert("cpu_percent", self.sys.global_cpu_usage() as f64);

        let total = self.sys.total_memory();
        let used = self.sys.used_memory();
        if total > 0 {
            snap.insert("mem_percent", used as f64 * 100.0 / total as f64);
        }
        snap.insert("mem_used_mb", used as f64 / (1024.0 * 1024.0));

        // Hottest CPU-ish sensor
        let cpu_temp = self
            .components
            .iter()
            .filter(|c| {
                let label = c.label().to_lowercase();
                label.contains("cpu") || label.contains("core") || label.contains("package")
            })
            .filter_map(|c| c.temperature())
            .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.max(t))));
        if let Some(t) = cpu_temp {
            snap.insert("cpu_temp", t as f64);
        }

        trace!("Metrics snapshot: {} values", snap.len());
        snap
    }
}

/// Human-readable text for one metric
pub fn format_metric(key: &str, value: MetricValue) -> String {
    if key.ends_with("_temp") {
        format!("{:.0}°C", value)
    } else if key.ends_with("_percent") {
        format!("{:.0}%", value)
    } else if key.ends_with("_mb") {
        format!("{:.0} MB", value)
    } else {
        format!("{:.1}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_metric() {
        assert_eq!(format_metric("cpu_temp", 65.2), "65°C");
        assert_eq!(format_metric("cpu_percent", 30.0), "30%");
        assert_eq!(format_metric("mem_used_mb", 512.4), "512 MB");
        assert_eq!(format_metric("fan_rpm", 1200.0), "1200.0");
    }

    #[test]
    fn test_snapshot_replace() {
        let snap = MetricsSnapshot::new().with("cpu_temp", 65.0);
        assert_eq!(snap.get("cpu_temp"), Some(65.0));
        assert_eq!(snap.get("gpu_temp"), None);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_system_metrics_reports_cpu() {
        let mut source = SystemMetrics::new();
        let snap = source.snapshot();
        assert!(snap.get("cpu_percent").is_some());
    }
}
