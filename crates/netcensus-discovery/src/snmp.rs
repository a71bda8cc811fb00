//! SNMP-backed identity prober

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::probe::IdentityProber;

/// Reads the system group over SNMPv2c on port 161
#[derive(Debug, Clone, Copy, Default)]
pub struct SnmpIdentityProber;

#[async_trait]
impl IdentityProber for SnmpIdentityProber {
    async fn query(&self, ip: IpAddr, community: &str, timeout: Duration) -> HashMap<String, String> {
        netcensus_snmp::query_system_info(ip, community, timeout).await
    }
}
