//! Probe seams and the ICMP reachability prober
//!
//! Probers are infallible from the caller's point of view; anything that
//! goes wrong reads as "unreachable" or "no data". Dropping the returned
//! future cancels a probe.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// Answers whether a host responds to a liveness probe
#[async_trait]
pub trait ReachabilityProber: Send + Sync {
    async fn is_reachable(&self, ip: IpAddr, timeout: Duration) -> bool;
}

/// Reverse name lookup
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Option<String>;
}

/// Maps an IP to a hardware address, `aa:bb:cc:dd:ee:ff`
#[async_trait]
pub trait LinkLayerResolver: Send + Sync {
    async fn mac_address(&self, ip: IpAddr) -> Option<String>;
}

/// Queries a device's self-description, returning values keyed by name
/// (`sysDescr`, `sysObjectID`, `sysName`, ...). Empty when nothing answered.
#[async_trait]
pub trait IdentityProber: Send + Sync {
    async fn query(&self, ip: IpAddr, community: &str, timeout: Duration) -> HashMap<String, String>;
}

/// One ICMP echo via the system `ping` binary
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProber;

impl PingProber {
    fn command(ip: IpAddr, timeout: Duration) -> Command {
        // -W takes whole seconds on Linux; the outer timeout enforces the real bound
        let wait_secs = timeout.as_millis().div_ceil(1000).max(1);

        let mut cmd = Command::new("ping");
        if ip.is_ipv6() {
            cmd.arg("-6");
        }
        cmd.args(["-c", "1", "-W", &wait_secs.to_string()])
            .arg(ip.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ReachabilityProber for PingProber {
    async fn is_reachable(&self, ip: IpAddr, timeout: Duration) -> bool {
        let mut cmd = Self::command(ip, timeout);
        match tokio::time::timeout(timeout, cmd.status()).await {
            Ok(Ok(status)) => {
                trace!(ip = %ip, success = status.success(), "Ping finished");
                status.success()
            }
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Failed to run ping");
                false
            }
            Err(_) => {
                trace!(ip = %ip, "Ping timed out");
                false
            }
        }
    }
}
