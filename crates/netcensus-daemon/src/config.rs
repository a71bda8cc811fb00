//! Configuration loading and validation

use anyhow::{Context, Result};
use netcensus_core::{Cidr, CidrError, Credentials, NetworkSegment};
use netcensus_discovery::{ProbeOptions, ScheduleSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("segment #{0} has an empty name")]
    EmptySegmentName(usize),
    #[error("duplicate segment name {0:?}")]
    DuplicateSegment(String),
    #[error("segment {name:?}: {source}")]
    InvalidSegmentCidr { name: String, source: CidrError },
    #[error("segment {0:?}: username and password must be set together")]
    PartialCredentials(String),
    #[error("{0} must be greater than zero")]
    NotPositive(String),
    #[error("{name} must be at most {max}")]
    TooLarge { name: String, max: u64 },
}

/// Longest accepted scheduler check interval (one week)
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default, rename = "segment")]
    pub segments: Vec<SegmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the API server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Delay before the scheduler's first check
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// How often the scheduler looks for due segments
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
    #[serde(default = "default_community")]
    pub default_community: String,
    /// Credentials handed to the registrar when a segment has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_password: Option<String>,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_snmp_timeout")]
    pub snmp_timeout_ms: u64,
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_ms: u64,
    /// Bound on one neighbor-table (MAC) lookup
    #[serde(default = "default_neighbor_timeout")]
    pub neighbor_timeout_ms: u64,
    /// Upper bound on concurrently running device identifications
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_discoveries: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            check_interval_minutes: default_check_interval(),
            default_community: default_community(),
            default_username: None,
            default_password: None,
            ping_timeout_ms: default_ping_timeout(),
            snmp_timeout_ms: default_snmp_timeout(),
            dns_timeout_ms: default_dns_timeout(),
            neighbor_timeout_ms: default_neighbor_timeout(),
            max_concurrent_discoveries: default_max_concurrent(),
        }
    }
}

fn default_initial_delay() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    5
}

fn default_community() -> String {
    "public".to_string()
}

fn default_ping_timeout() -> u64 {
    1000
}

fn default_snmp_timeout() -> u64 {
    3000
}

fn default_dns_timeout() -> u64 {
    2000
}

fn default_neighbor_timeout() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Device registry base URL; without one, registrations are only logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_registration_timeout")]
    pub timeout_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_registration_timeout(),
        }
    }
}

fn default_registration_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub name: String,
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enable_auto_discovery: bool,
    #[serde(default = "default_segment_interval")]
    pub discovery_interval_minutes: u32,
    /// SNMP community override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_segment_interval() -> u32 {
    60
}

impl SegmentConfig {
    fn to_segment(&self) -> Result<NetworkSegment, ConfigError> {
        let cidr: Cidr = self.cidr.parse().map_err(|source| ConfigError::InvalidSegmentCidr {
            name: self.name.clone(),
            source,
        })?;

        let credential_override = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCredentials(self.name.clone())),
        };

        Ok(NetworkSegment {
            name: self.name.clone(),
            cidr,
            description: self.description.clone(),
            auto_discovery_enabled: self.enable_auto_discovery,
            interval_minutes: self.discovery_interval_minutes,
            community_override: self.community.clone(),
            credential_override,
        })
    }
}

impl Config {
    /// Check everything that would otherwise fail later at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.discovery;
        let positive = [
            ("discovery.check_interval_minutes", d.check_interval_minutes),
            ("discovery.ping_timeout_ms", d.ping_timeout_ms),
            ("discovery.snmp_timeout_ms", d.snmp_timeout_ms),
            ("discovery.dns_timeout_ms", d.dns_timeout_ms),
            ("discovery.neighbor_timeout_ms", d.neighbor_timeout_ms),
            ("discovery.max_concurrent_discoveries", d.max_concurrent_discoveries as u64),
            ("registration.timeout_secs", self.registration.timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::NotPositive(name.to_string()));
        }
        if d.check_interval_minutes > MAX_CHECK_INTERVAL_MINUTES {
            return Err(ConfigError::TooLarge {
                name: "discovery.check_interval_minutes".to_string(),
                max: MAX_CHECK_INTERVAL_MINUTES,
            });
        }

        self.network_segments().map(|_| ())
    }

    /// Parsed segments, in file order
    pub fn network_segments(&self) -> Result<Vec<NetworkSegment>, ConfigError> {
        let mut seen = HashSet::new();
        self.segments
            .iter()
            .enumerate()
            .map(|(index, s)| {
                if s.name.trim().is_empty() {
                    return Err(ConfigError::EmptySegmentName(index + 1));
                }
                if !seen.insert(s.name.as_str()) {
                    return Err(ConfigError::DuplicateSegment(s.name.clone()));
                }
                if s.discovery_interval_minutes == 0 {
                    return Err(ConfigError::NotPositive(format!(
                        "segment {:?} discovery_interval_minutes",
                        s.name
                    )));
                }
                s.to_segment()
            })
            .collect()
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            ping_timeout: Duration::from_millis(self.discovery.ping_timeout_ms),
            snmp_timeout: Duration::from_millis(self.discovery.snmp_timeout_ms),
            community: self.discovery.default_community.clone(),
        }
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.dns_timeout_ms)
    }

    pub fn neighbor_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.neighbor_timeout_ms)
    }

    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            initial_delay: Duration::from_secs(self.discovery.initial_delay_secs),
            check_interval: Duration::from_secs(self.discovery.check_interval_minutes.saturating_mul(60)),
            default_username: self.discovery.default_username.clone(),
            default_password: self.discovery.default_password.clone(),
        }
    }
}

/// Load and validate configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), segments = config.segments.len(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Example configuration written by `--write-default-config`
pub const DEFAULT_CONFIG: &str = r#"# netcensus configuration

[daemon]
bind = "0.0.0.0:8080"

[discovery]
# Wait this long after startup before the first scheduled check
initial_delay_secs = 30
# How often to look for segments that are due
check_interval_minutes = 5
default_community = "public"
# Credentials passed to the device registry when a segment has none
# default_username = "admin"
# default_password = "secret"
ping_timeout_ms = 1000
snmp_timeout_ms = 3000
dns_timeout_ms = 2000
neighbor_timeout_ms = 1000
# Concurrent device identifications (ping sweeps are not limited)
max_concurrent_discoveries = 50

[registration]
# Without a URL, discovered devices are only logged
# url = "http://device-management:5000"
timeout_secs = 30

[[segment]]
name = "lab"
cidr = "192.168.1.0/24"
description = "Lab network"
enable_auto_discovery = true
discovery_interval_minutes = 60
# community = "private"
# username = "netops"
# password = "changeme"
"#;

/// Write the example configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
