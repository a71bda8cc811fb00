//! Neighbor-table (ARP/NDP) lookups for MAC addresses

use anyhow::Result;
use async_trait::async_trait;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::IpAddr;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use crate::probe::LinkLayerResolver;

/// Kernel ARP table, used when `ip` is unavailable
const PROC_NET_ARP: &str = "/proc/net/arp";

/// Neighbor table entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: IpAddr,
    pub mac: String,
    pub interface: String,
    pub state: ArpState,
}

impl ArpEntry {
    /// Whether the entry carries a hardware address worth reporting
    pub fn is_resolved(&self) -> bool {
        !matches!(self.state, ArpState::Failed | ArpState::Incomplete) && is_valid_mac(&self.mac)
    }
}

/// Neighbor entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

impl ArpState {
    const NUD_NAMES: [(&'static str, ArpState); 7] = [
        ("REACHABLE", ArpState::Reachable),
        ("STALE", ArpState::Stale),
        ("DELAY", ArpState::Delay),
        ("PROBE", ArpState::Probe),
        ("FAILED", ArpState::Failed),
        ("INCOMPLETE", ArpState::Incomplete),
        ("PERMANENT", ArpState::Permanent),
    ];

    /// State from a kernel NUD name as printed by `ip neigh`
    fn from_nud(name: &str) -> Self {
        Self::NUD_NAMES
            .iter()
            .find(|(nud, _)| nud.eq_ignore_ascii_case(name))
            .map_or(ArpState::Unknown, |(_, state)| *state)
    }
}

/// Read the neighbor table, preferring `ip neigh show` over `/proc/net/arp`
pub async fn read_neighbor_table() -> Result<Vec<ArpEntry>> {
    read_neighbor_table_with(ip_neigh_command()).await
}

fn ip_neigh_command() -> Command {
    let mut command = Command::new("ip");
    command.args(["neigh", "show"]);
    command
}

/// Run a neighbor listing command, falling back to `/proc/net/arp`.
/// The child is killed if the returned future is dropped.
async fn read_neighbor_table_with(mut command: Command) -> Result<Vec<ArpEntry>> {
    match command.kill_on_drop(true).output().await {
        Ok(output) if output.status.success() => {
            let entries: Vec<ArpEntry> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(parse_ip_neigh_line)
                .collect();
            trace!("Found {} neighbor entries", entries.len());
            Ok(entries)
        }
        Ok(output) => {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "ip neigh failed, reading {}", PROC_NET_ARP);
            read_proc_net_arp().await
        }
        Err(e) => {
            debug!(error = %e, "ip not available, reading {}", PROC_NET_ARP);
            read_proc_net_arp().await
        }
    }
}

async fn read_proc_net_arp() -> Result<Vec<ArpEntry>> {
    let content = tokio::fs::read_to_string(PROC_NET_ARP).await?;
    Ok(parse_proc_net_arp(&content))
}

/// Parse one line of `ip neigh show`, e.g.
/// `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`.
/// The state is the last bare word; `lladdr` is absent for unresolved entries.
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    let mut tokens = line.split_whitespace();
    let ip: IpAddr = tokens.next()?.parse().ok()?;

    let mut interface = None;
    let mut mac = String::new();
    let mut state = ArpState::Unknown;
    while let Some(token) = tokens.next() {
        match token {
            "dev" => interface = tokens.next(),
            "lladdr" => mac = tokens.next().map(str::to_ascii_lowercase).unwrap_or_default(),
            word => state = ArpState::from_nud(word),
        }
    }

    Some(ArpEntry {
        ip,
        mac,
        interface: interface?.to_string(),
        state,
    })
}

/// Parse the kernel's `/proc/net/arp` table
fn parse_proc_net_arp(content: &str) -> Vec<ArpEntry> {
    // IP address  HW type  Flags  HW address  Mask  Device
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            let ip: IpAddr = parts[0].parse().ok()?;
            let flags = u32::from_str_radix(parts[2].trim_start_matches("0x"), 16).ok()?;
            // ATF_COM = 0x2, ATF_PERM = 0x4
            let state = if flags & 0x2 == 0 {
                ArpState::Incomplete
            } else if flags & 0x4 != 0 {
                ArpState::Permanent
            } else {
                ArpState::Reachable
            };
            Some(ArpEntry {
                ip,
                mac: parts[3].to_ascii_lowercase(),
                interface: parts[5].to_string(),
                state,
            })
        })
        .collect()
}

/// Six colon-separated hex octets, not all zero
fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
        && octets.iter().any(|o| *o != "00")
}

/// Resolved MAC for `ip`, if the table has a usable entry
pub fn find_mac(entries: &[ArpEntry], ip: IpAddr) -> Option<String> {
    entries
        .iter()
        .find(|e| e.ip == ip && e.is_resolved())
        .map(|e| e.mac.clone())
}

/// A directly attached subnet, from a local interface address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSubnet {
    addr: IpAddr,
    prefix_len: u8,
}

impl LocalSubnet {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix_len == 0 { 0 } else { !0u32 << (32 - self.prefix_len.min(32)) };
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix_len == 0 { 0 } else { !0u128 << (128 - self.prefix_len.min(128)) };
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Subnets of all non-loopback interfaces
pub fn local_subnets() -> Vec<LocalSubnet> {
    NetworkInterface::show()
        .unwrap_or_default()
        .into_iter()
        .flat_map(|iface| iface.addr)
        .filter_map(|addr| match addr {
            Addr::V4(v4) if !v4.ip.is_loopback() => {
                let prefix = v4.netmask.map(|m| u32::from(m).count_ones() as u8).unwrap_or(32);
                Some(LocalSubnet::new(IpAddr::V4(v4.ip), prefix))
            }
            Addr::V6(v6) if !v6.ip.is_loopback() => {
                let prefix = v6.netmask.map(|m| u128::from(m).count_ones() as u8).unwrap_or(128);
                Some(LocalSubnet::new(IpAddr::V6(v6.ip), prefix))
            }
            _ => None,
        })
        .collect()
}

/// Default bound on one neighbor-table lookup
pub const DEFAULT_NEIGHBOR_TIMEOUT_MS: u64 = 1000;

/// Looks up MAC addresses in the local neighbor table.
///
/// Only hosts on a directly attached subnet have meaningful entries; for
/// anything routed, the table would hold the gateway's address at best, so
/// those are skipped. Interface enumeration and the table read share one
/// `timeout`; past it the lookup reports no address.
#[derive(Debug, Clone)]
pub struct NeighborTableResolver {
    timeout: Duration,
}

impl NeighborTableResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn lookup(&self, ip: IpAddr, command: Command) -> Option<String> {
        let deadline = Instant::now() + self.timeout;

        let subnets = match timeout_at(deadline, tokio::task::spawn_blocking(local_subnets)).await {
            Ok(Ok(subnets)) => subnets,
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Interface enumeration failed");
                return None;
            }
            Err(_) => {
                debug!(ip = %ip, "Interface enumeration timed out");
                return None;
            }
        };
        if !subnets.iter().any(|s| s.contains(ip)) {
            trace!(ip = %ip, "Not on a local subnet, skipping neighbor lookup");
            return None;
        }

        self.read_entry(ip, command, deadline).await
    }

    async fn read_entry(&self, ip: IpAddr, command: Command, deadline: Instant) -> Option<String> {
        match timeout_at(deadline, read_neighbor_table_with(command)).await {
            Ok(Ok(entries)) => find_mac(&entries, ip),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Failed to read neighbor table");
                None
            }
            Err(_) => {
                debug!(ip = %ip, timeout_ms = self.timeout.as_millis() as u64, "Neighbor lookup timed out");
                None
            }
        }
    }
}

impl Default for NeighborTableResolver {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_NEIGHBOR_TIMEOUT_MS))
    }
}

#[async_trait]
impl LinkLayerResolver for NeighborTableResolver {
    async fn mac_address(&self, ip: IpAddr) -> Option<String> {
        self.lookup(ip, ip_neigh_command()).await
    }
}
