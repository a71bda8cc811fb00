//! CIDR parsing and bounded host expansion

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on the number of addresses (network and broadcast included)
/// a single range may expand to.
pub const MAX_SCAN_HOSTS: u32 = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    #[error("Invalid CIDR notation: {0}")]
    InvalidFormat(String),
    #[error("Invalid IPv4 address in CIDR: {0}")]
    InvalidAddress(String),
    #[error("Invalid prefix length: {0}")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR notation, normalized to its network address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, CidrError> {
        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefix(prefix_len.to_string()));
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix_len));
        Ok(Self { network, prefix_len })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Size of the full range, `2^(32 - prefix)`
    pub fn host_count(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Whether the range is larger than [`MAX_SCAN_HOSTS`] and gets truncated
    pub fn is_clamped(&self) -> bool {
        self.host_count() > u64::from(MAX_SCAN_HOSTS)
    }

    /// Number of addresses the (possibly clamped) range spans
    pub fn scan_span(&self) -> u32 {
        self.host_count().min(u64::from(MAX_SCAN_HOSTS)) as u32
    }

    /// Number of candidate hosts [`Cidr::hosts`] yields.
    ///
    /// This is the single source for every "total scanned" figure.
    pub fn usable_hosts(&self) -> usize {
        self.scan_span().saturating_sub(2) as usize
    }

    /// Candidate host addresses in ascending order, excluding the network
    /// address and the last address of the clamped span.
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        let base = u32::from(self.network);
        let span = self.scan_span();
        if span <= 2 {
            return Vec::new();
        }
        (1..span - 1).map(|offset| Ipv4Addr::from(base + offset)).collect()
    }

    /// Check if an address falls inside the (unclamped) range
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let m = mask(self.prefix_len);
        (u32::from(ip) & m) == u32::from(self.network)
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 2 {
            return Err(CidrError::InvalidFormat(s.to_string()));
        }

        let addr = Ipv4Addr::from_str(parts[0])
            .map_err(|_| CidrError::InvalidAddress(parts[0].to_string()))?;
        let prefix_len: u8 = parts[1]
            .parse()
            .map_err(|_| CidrError::InvalidPrefix(parts[1].to_string()))?;

        Cidr::new(addr, prefix_len)
    }
}

impl TryFrom<String> for Cidr {
    type Error = CidrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Parse a CIDR string and expand it to its candidate host addresses
pub fn expand_cidr(cidr: &str) -> Result<Vec<Ipv4Addr>, CidrError> {
    Ok(cidr.parse::<Cidr>()?.hosts())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_30_yields_two_hosts() {
        let hosts = expand_cidr("192.168.1.0/30").unwrap();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
    }

    #[test]
    fn test_slash_31_and_32_are_empty() {
        assert!(expand_cidr("10.1.2.0/31").unwrap().is_empty());
        assert!(expand_cidr("10.1.2.3/32").unwrap().is_empty());
    }

    #[test]
    fn test_slash_24_excludes_network_and_broadcast() {
        let hosts = expand_cidr("192.168.186.0/24").unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 186, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 186, 254)));
        assert!(hosts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_large_ranges_are_clamped() {
        for cidr in ["10.0.0.0/16", "10.0.0.0/8", "0.0.0.0/0"] {
            let parsed: Cidr = cidr.parse().unwrap();
            assert!(parsed.is_clamped());
            let hosts = parsed.hosts();
            assert_eq!(hosts.len(), 1022);
            assert_eq!(parsed.usable_hosts(), hosts.len());
        }

        let hosts = expand_cidr("10.0.0.0/16").unwrap();
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(10, 0, 3, 254)));
    }

    #[test]
    fn test_slash_22_is_exactly_at_cap() {
        let parsed: Cidr = "172.16.0.0/22".parse().unwrap();
        assert!(!parsed.is_clamped());
        assert_eq!(parsed.usable_hosts(), 1022);
    }

    #[test]
    fn test_base_is_normalized_to_network() {
        let parsed: Cidr = "10.0.0.5/29".parse().unwrap();
        assert_eq!(parsed.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(parsed.to_string(), "10.0.0.0/29");
        assert_eq!(parsed.hosts().len(), 6);
        assert_eq!(parsed.hosts()[0], Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_top_of_address_space_does_not_overflow() {
        let hosts = expand_cidr("255.255.255.0/24").unwrap();
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(255, 255, 255, 254)));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            expand_cidr("192.168.1.0"),
            Err(CidrError::InvalidFormat(_))
        ));
        assert!(matches!(
            expand_cidr("192.168.1.0/24/1"),
            Err(CidrError::InvalidFormat(_))
        ));
        assert!(matches!(
            expand_cidr("192.168.1/24"),
            Err(CidrError::InvalidAddress(_))
        ));
        assert!(matches!(
            expand_cidr("fe80::/64"),
            Err(CidrError::InvalidAddress(_))
        ));
        assert!(matches!(
            expand_cidr("192.168.1.0/33"),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(matches!(
            expand_cidr("192.168.1.0/-1"),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(matches!(
            expand_cidr("192.168.1.0/x"),
            Err(CidrError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_contains() {
        let cidr: Cidr = "192.168.186.0/24".parse().unwrap();
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 186, 1)));
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 186, 255)));
        assert!(!cidr.contains(Ipv4Addr::new(192, 168, 187, 1)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_expansion_is_deterministic() {
        assert_eq!(
            expand_cidr("10.20.30.0/27").unwrap(),
            expand_cidr("10.20.30.0/27").unwrap()
        );
    }
}
