//! Types describing hosts found by network discovery

use chrono::{DateTime, Duration, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Hardware vendor inferred from SNMP identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Cisco,
    Juniper,
    #[serde(rename = "HPE")]
    Hpe,
    Arista,
    Dell,
    Unknown,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Cisco => "Cisco",
            Vendor::Juniper => "Juniper",
            Vendor::Hpe => "HPE",
            Vendor::Arista => "Arista",
            Vendor::Dell => "Dell",
            Vendor::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a discovered host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Switch,
    Router,
    Firewall,
    AccessPoint,
    Server,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Switch => "Switch",
            DeviceType::Router => "Router",
            DeviceType::Firewall => "Firewall",
            DeviceType::AccessPoint => "AccessPoint",
            DeviceType::Server => "Server",
            DeviceType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisionally identified host, not yet registered anywhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub ip_address: IpAddr,
    pub mac_address: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<Vendor>,
    pub device_type: Option<DeviceType>,
    pub model: Option<String>,
    pub software_version: Option<String>,
    pub is_reachable: bool,
    pub discovered_at: DateTime<Utc>,
    /// Raw identity data (SNMP system group values, keyed by name)
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,
}

impl DiscoveredDevice {
    /// Create an empty record for an address, stamped with the current time
    pub fn new(ip_address: IpAddr) -> Self {
        Self {
            ip_address,
            mac_address: None,
            hostname: None,
            vendor: None,
            device_type: None,
            model: None,
            software_version: None,
            is_reachable: false,
            discovered_at: Utc::now(),
            additional_info: BTreeMap::new(),
        }
    }

    /// Name to register the device under when DNS gave us nothing,
    /// e.g. `device-10-0-0-2`
    pub fn display_name(&self) -> String {
        match &self.hostname {
            Some(name) => name.clone(),
            None => format!(
                "device-{}",
                self.ip_address.to_string().replace(['.', ':'], "-")
            ),
        }
    }

    /// Build the bus event describing this device
    pub fn to_event(&self) -> DeviceDiscoveredEvent {
        DeviceDiscoveredEvent {
            ip_address: self.ip_address,
            mac_address: self.mac_address.clone(),
            hostname: self.hostname.clone(),
            detected_vendor: self.vendor,
            detected_type: self.device_type,
            is_reachable: self.is_reachable,
            occurred_at: Utc::now(),
        }
    }
}

/// Event published once per discovered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDiscoveredEvent {
    pub ip_address: IpAddr,
    pub mac_address: Option<String>,
    pub hostname: Option<String>,
    pub detected_vendor: Option<Vendor>,
    pub detected_type: Option<DeviceType>,
    pub is_reachable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of one discovery run over a CIDR range.
///
/// `devices_found` is always derived from the device list.
#[derive(Debug, Clone)]
pub struct DeviceDiscoveryResult {
    /// Estimated number of candidate addresses in the range
    pub total_scanned: usize,
    /// Filled in by auto-registration
    pub devices_registered: usize,
    pub discovery_started_at: DateTime<Utc>,
    pub discovery_completed_at: DateTime<Utc>,
    devices: Vec<DiscoveredDevice>,
}

impl DeviceDiscoveryResult {
    pub fn new(
        total_scanned: usize,
        devices: Vec<DiscoveredDevice>,
        discovery_started_at: DateTime<Utc>,
        discovery_completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            total_scanned,
            devices_registered: 0,
            discovery_started_at,
            discovery_completed_at,
            devices,
        }
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<DiscoveredDevice> {
        self.devices
    }

    pub fn devices_found(&self) -> usize {
        self.devices.len()
    }

    /// Devices that answered the reachability probe
    pub fn reachable(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.iter().filter(|d| d.is_reachable)
    }

    pub fn duration(&self) -> Duration {
        self.discovery_completed_at - self.discovery_started_at
    }
}

impl Serialize for DeviceDiscoveryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DeviceDiscoveryResult", 7)?;
        s.serialize_field("totalScanned", &self.total_scanned)?;
        s.serialize_field("devicesFound", &self.devices_found())?;
        s.serialize_field("devicesRegistered", &self.devices_registered)?;
        s.serialize_field("devices", &self.devices)?;
        s.serialize_field("discoveryStartedAt", &self.discovery_started_at)?;
        s.serialize_field("discoveryCompletedAt", &self.discovery_completed_at)?;
        s.serialize_field("durationMs", &self.duration().num_milliseconds())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn device(last: u8, reachable: bool) -> DiscoveredDevice {
        let mut d = DiscoveredDevice::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)));
        d.is_reachable = reachable;
        d
    }

    #[test]
    fn test_devices_found_tracks_list() {
        let now = Utc::now();
        let result = DeviceDiscoveryResult::new(6, vec![device(2, true), device(5, false)], now, now);
        assert_eq!(result.devices_found(), 2);
        assert_eq!(result.devices_found(), result.devices().len());
        assert_eq!(result.reachable().count(), 1);
    }

    #[test]
    fn test_result_serialization() {
        let started = Utc::now();
        let completed = started + Duration::milliseconds(1500);
        let result = DeviceDiscoveryResult::new(254, vec![device(7, true)], started, completed);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalScanned"], 254);
        assert_eq!(json["devicesFound"], 1);
        assert_eq!(json["devicesRegistered"], 0);
        assert_eq!(json["durationMs"], 1500);
        assert_eq!(json["devices"][0]["ipAddress"], "10.0.0.7");
        assert_eq!(json["devices"][0]["isReachable"], true);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&Vendor::Hpe).unwrap(), "\"HPE\"");
        assert_eq!(
            serde_json::to_string(&DeviceType::AccessPoint).unwrap(),
            "\"AccessPoint\""
        );
        assert_eq!(Vendor::Hpe.to_string(), "HPE");
    }

    #[test]
    fn test_display_name_fallback() {
        let mut d = device(2, true);
        assert_eq!(d.display_name(), "device-10-0-0-2");
        d.hostname = Some("core-sw1.example.net".to_string());
        assert_eq!(d.display_name(), "core-sw1.example.net");
    }

    #[test]
    fn test_event_mirrors_device() {
        let mut d = device(9, true);
        d.vendor = Some(Vendor::Juniper);
        d.device_type = Some(DeviceType::Firewall);
        let event = d.to_event();
        assert_eq!(event.ip_address, d.ip_address);
        assert_eq!(event.detected_vendor, Some(Vendor::Juniper));
        assert_eq!(event.detected_type, Some(DeviceType::Firewall));
        assert!(event.is_reachable);
    }
}
