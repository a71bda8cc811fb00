//! Discovery over a CIDR range: sweep, identify, report

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use netcensus_core::{
    classify, extract_software_version, Cidr, DeviceDiscoveredEvent, DeviceDiscoveryResult,
    DiscoveredDevice,
};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::arp::NeighborTableResolver;
use crate::dns::DnsResolver;
use crate::probe::{HostnameResolver, IdentityProber, LinkLayerResolver, PingProber, ReachabilityProber};
use crate::scanner::NetworkScanner;
use crate::snmp::SnmpIdentityProber;
use crate::DiscoveryError;

/// Per-run probe parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub ping_timeout: Duration,
    pub snmp_timeout: Duration,
    pub community: String,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(1000),
            snmp_timeout: Duration::from_millis(netcensus_snmp::DEFAULT_TIMEOUT_MS),
            community: netcensus_snmp::DEFAULT_COMMUNITY.to_string(),
        }
    }
}

/// Discovery event for real-time updates.
///
/// Per-device events are only sent once a whole run has finished, so a
/// consumer never sees devices from a run that later failed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    ScanStarted { cidr: String },
    DeviceDiscovered(DeviceDiscoveredEvent),
    ScanCompleted { cidr: String, found: usize, scanned: usize },
    ScanFailed { cidr: String, error: String },
    DeviceRegistered { ip: IpAddr },
    SegmentCompleted { segment: String, found: usize, registered: usize },
}

/// The four probing capabilities discovery is built from
#[derive(Clone)]
pub struct Probers {
    pub reachability: Arc<dyn ReachabilityProber>,
    pub hostname: Arc<dyn HostnameResolver>,
    pub link_layer: Arc<dyn LinkLayerResolver>,
    pub identity: Arc<dyn IdentityProber>,
}

impl Probers {
    /// ICMP ping, the system resolver, the kernel neighbor table and SNMP
    pub fn system(dns_timeout: Duration, neighbor_timeout: Duration) -> Self {
        Self {
            reachability: Arc::new(PingProber),
            hostname: Arc::new(DnsResolver::new(dns_timeout)),
            link_layer: Arc::new(NeighborTableResolver::new(neighbor_timeout)),
            identity: Arc::new(SnmpIdentityProber),
        }
    }

    /// Full identification pipeline for one address. Never fails; missing
    /// data just stays unset.
    async fn identify(&self, ip: IpAddr, options: &ProbeOptions) -> DiscoveredDevice {
        let mut device = DiscoveredDevice::new(ip);

        device.is_reachable = self.reachability.is_reachable(ip, options.ping_timeout).await;
        if !device.is_reachable {
            debug!(ip = %ip, "Device not responding to ping, continuing identification");
        }

        let (hostname, mac) = tokio::join!(self.hostname.resolve(ip), self.link_layer.mac_address(ip));
        device.hostname = hostname.filter(|h| !h.is_empty());
        device.mac_address = mac;

        let info = self.identity.query(ip, &options.community, options.snmp_timeout).await;
        apply_identity(&mut device, info);

        info!(
            ip = %ip,
            hostname = ?device.hostname,
            vendor = ?device.vendor,
            device_type = ?device.device_type,
            model = ?device.model,
            reachable = device.is_reachable,
            "Device identified"
        );
        device
    }
}

/// Fold an identity table into the device record
fn apply_identity(device: &mut DiscoveredDevice, info: HashMap<String, String>) {
    if let Some(descr) = info.get("sysDescr") {
        let classification = classify(descr, info.get("sysObjectID").map(String::as_str));
        device.vendor = Some(classification.vendor);
        device.device_type = Some(classification.device_type);
        device.model = classification.model;
        device.software_version = extract_software_version(descr);
    }

    if device.hostname.is_none() {
        device.hostname = info.get("sysName").filter(|n| !n.trim().is_empty()).cloned();
    }

    device.additional_info.extend(info);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Runs discoveries and identifications, and publishes their events
pub struct DiscoveryEngine {
    probers: Probers,
    scanner: NetworkScanner,
    defaults: ProbeOptions,
    /// Bounds concurrent identification pipelines (not ping sweeps)
    identify_permits: Arc<Semaphore>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryEngine {
    pub fn new(probers: Probers, defaults: ProbeOptions, max_concurrent_identifications: usize) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            scanner: NetworkScanner::new(Arc::clone(&probers.reachability)),
            probers,
            defaults,
            identify_permits: Arc::new(Semaphore::new(max_concurrent_identifications.max(1))),
            event_tx,
        }
    }

    /// Options used when a caller has nothing more specific
    pub fn defaults(&self) -> &ProbeOptions {
        &self.defaults
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn publish(&self, event: DiscoveryEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Single liveness probe with the default timeout
    pub async fn is_device_reachable(&self, ip: IpAddr) -> bool {
        self.probers.reachability.is_reachable(ip, self.defaults.ping_timeout).await
    }

    /// Like [`Self::is_device_reachable`] for an unparsed address
    pub async fn is_address_reachable(&self, address: &str) -> Result<bool, DiscoveryError> {
        let ip = parse_address(address)?;
        Ok(self.is_device_reachable(ip).await)
    }

    /// Discover every live device in `cidr`.
    ///
    /// Devices come back in ascending address order. An identification
    /// failure drops only the affected address; anything else fails the run.
    pub async fn discover_devices(
        &self,
        cidr: &str,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<DeviceDiscoveryResult, DiscoveryError> {
        let started = Utc::now();
        let cidr: Cidr = match cidr.parse() {
            Ok(c) => c,
            Err(e) => {
                warn!(cidr = cidr, error = %e, "Rejected discovery range");
                return Err(e.into());
            }
        };

        info!(cidr = %cidr, community = %options.community, "Starting device discovery");
        self.publish(DiscoveryEvent::ScanStarted { cidr: cidr.to_string() });

        match self.run_discovery(&cidr, started, options, cancel).await {
            Ok(result) => {
                for device in result.devices() {
                    self.publish(DiscoveryEvent::DeviceDiscovered(device.to_event()));
                }
                self.publish(DiscoveryEvent::ScanCompleted {
                    cidr: cidr.to_string(),
                    found: result.devices_found(),
                    scanned: result.total_scanned,
                });
                info!(
                    cidr = %cidr,
                    found = result.devices_found(),
                    scanned = result.total_scanned,
                    duration_ms = result.duration().num_milliseconds(),
                    "Device discovery complete"
                );
                Ok(result)
            }
            Err(e) => {
                match e {
                    DiscoveryError::Cancelled => info!(cidr = %cidr, "Device discovery cancelled"),
                    _ => error!(cidr = %cidr, error = %e, "Device discovery failed"),
                }
                self.publish(DiscoveryEvent::ScanFailed {
                    cidr: cidr.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_discovery(
        &self,
        cidr: &Cidr,
        started: DateTime<Utc>,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<DeviceDiscoveryResult, DiscoveryError> {
        let live = self.scanner.scan(cidr, options.ping_timeout, cancel).await?;
        let devices = self.identify_all(&live, options, cancel).await?;
        Ok(DeviceDiscoveryResult::new(cidr.usable_hosts(), devices, started, Utc::now()))
    }

    async fn identify_all(
        &self,
        hosts: &[Ipv4Addr],
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        let mut tasks = JoinSet::new();
        for (index, &host) in hosts.iter().enumerate() {
            let probers = self.probers.clone();
            let permits = Arc::clone(&self.identify_permits);
            let options = options.clone();
            tasks.spawn(async move {
                let ip = IpAddr::V4(host);
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, ip, Err("identification limiter closed".to_string()));
                };
                let outcome = AssertUnwindSafe(probers.identify(ip, &options))
                    .catch_unwind()
                    .await
                    .map_err(panic_message);
                (index, ip, outcome)
            });
        }

        let mut slots: Vec<Option<DiscoveredDevice>> = vec![None; hosts.len()];
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(DiscoveryError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                Some(Ok((index, _, Ok(device)))) => slots[index] = Some(device),
                Some(Ok((_, ip, Err(reason)))) => {
                    warn!(ip = %ip, error = %reason, "Device identification failed, skipping address");
                }
                Some(Err(e)) => warn!(error = %e, "Identification task failed"),
                None => break,
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Identify one device, whether or not it answers ping
    pub async fn identify_device(
        &self,
        ip: IpAddr,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<DiscoveredDevice, DiscoveryError> {
        let probers = self.probers.clone();
        let permits = Arc::clone(&self.identify_permits);
        let options = options.clone();
        let mut task = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            probers.identify(ip, &options).await
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                Err(DiscoveryError::Cancelled)
            }
            joined = &mut task => joined.map_err(|e| {
                error!(ip = %ip, error = %e, "Device identification failed");
                DiscoveryError::Identification(e.to_string())
            }),
        }
    }

    /// Like [`Self::identify_device`] for an unparsed address
    pub async fn identify_address(
        &self,
        address: &str,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<DiscoveredDevice, DiscoveryError> {
        let ip = parse_address(address)?;
        self.identify_device(ip, options, cancel).await
    }
}

fn parse_address(address: &str) -> Result<IpAddr, DiscoveryError> {
    address
        .trim()
        .parse()
        .map_err(|_| DiscoveryError::InvalidAddress(address.to_string()))
}
