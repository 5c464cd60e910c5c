//! Domain types shared by the capability layer and the hub

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// How a device is attached to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    #[default]
    Usb,
    Network,
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Usb => write!(f, "USB"),
            Connection::Network => write!(f, "Network"),
        }
    }
}

/// An attached iOS device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Device {
    /// Unique device identifier
    pub udid: String,

    /// User-assigned device name, when the device reports one
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub connection: Connection,
}

impl Device {
    pub fn new(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            name: None,
            connection: Connection::Usb,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = connection;
        self
    }

    /// Name if known, otherwise the UDID
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.udid)
    }
}

/// The set of devices known at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DeviceSnapshot {
    devices: Vec<Device>,
}

impl DeviceSnapshot {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<Device> {
        self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn udids(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.udid.as_str())
    }

    pub fn find(&self, udid: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.udid == udid)
    }

    pub fn contains(&self, udid: &str) -> bool {
        self.find(udid).is_some()
    }

    /// True when both snapshots hold the same set of UDIDs (order ignored).
    ///
    /// Name or connection changes alone do not count as a device change.
    pub fn same_devices(&self, other: &DeviceSnapshot) -> bool {
        self.len() == other.len() && self.udids().all(|udid| other.contains(udid))
    }
}

impl From<Vec<Device>> for DeviceSnapshot {
    fn from(devices: Vec<Device>) -> Self {
        Self::new(devices)
    }
}

/// One line of a device's system log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    pub udid: String,
    pub line: String,
    pub received_at: DateTime<Local>,
}

impl LogMessage {
    pub fn new(udid: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            line: line.into(),
            received_at: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_udid() {
        let device = Device::new("00008101-000A");
        assert_eq!(device.display_name(), "00008101-000A");

        let device = device.with_name("Jane's iPhone");
        assert_eq!(device.display_name(), "Jane's iPhone");
    }

    #[test]
    fn test_same_devices_ignores_order_and_names() {
        let a = DeviceSnapshot::new(vec![Device::new("a"), Device::new("b")]);
        let b = DeviceSnapshot::new(vec![Device::new("b").with_name("iPad"), Device::new("a")]);
        assert!(a.same_devices(&b));
    }

    #[test]
    fn test_same_devices_detects_connect_and_disconnect() {
        let before = DeviceSnapshot::new(vec![Device::new("a")]);
        let after = DeviceSnapshot::new(vec![Device::new("a"), Device::new("b")]);
        assert!(!before.same_devices(&after));
        assert!(!after.same_devices(&before));
        assert!(!before.same_devices(&DeviceSnapshot::default()));
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot: DeviceSnapshot = vec![
            Device::new("a"),
            Device::new("b").with_connection(Connection::Network),
        ]
        .into();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("b"));
        assert_eq!(snapshot.find("b").map(|d| d.connection), Some(Connection::Network));
        assert_eq!(snapshot.udids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_snapshot_serializes_as_array() {
        let snapshot = DeviceSnapshot::new(vec![Device::new("a").with_name("Phone")]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"[{"udid":"a","name":"Phone","connection":"usb"}]"#);
    }
}
