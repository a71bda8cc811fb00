//! Reverse DNS lookups

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, trace};

use crate::probe::HostnameResolver;

/// Default bound on a single reverse lookup
pub const DEFAULT_DNS_TIMEOUT_MS: u64 = 2000;

/// PTR lookups through the system resolver.
///
/// The resolver call blocks, so it runs on the blocking pool; a lookup that
/// outlives `timeout` is abandoned and reported as no name.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    timeout: Duration,
}

impl DnsResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DNS_TIMEOUT_MS))
    }
}

#[async_trait]
impl HostnameResolver for DnsResolver {
    async fn resolve(&self, ip: IpAddr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(name))) => accept_name(ip, name),
            Ok(Ok(Err(e))) => {
                trace!(ip = %ip, error = %e, "Reverse lookup failed");
                None
            }
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Reverse lookup task failed");
                None
            }
            Err(_) => {
                debug!(ip = %ip, timeout_ms = self.timeout.as_millis() as u64, "Reverse lookup timed out");
                None
            }
        }
    }
}

/// getnameinfo echoes the numeric address back when no PTR record exists
fn accept_name(ip: IpAddr, name: String) -> Option<String> {
    let name = name.trim().trim_end_matches('.').to_string();
    if name.is_empty() || name.parse::<IpAddr>() == Ok(ip) {
        None
    } else {
        Some(name)
    }
}
