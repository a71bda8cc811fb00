//! netcensus discovery - finding and identifying devices on IPv4 ranges
//!
//! This crate combines several probing methods:
//! - ICMP echo sweeps for liveness
//! - reverse DNS and the kernel neighbor table for names and MAC addresses
//! - SNMP system-group queries for vendor/type/model classification
//!
//! [`DiscoveryEngine`] runs one discovery over a range; [`DiscoveryScheduler`]
//! runs it periodically per configured segment and hands reachable devices
//! to an [`AutoRegistrar`].

pub mod arp;
pub mod dns;
pub mod engine;
pub mod probe;
pub mod scanner;
pub mod scheduler;
pub mod snmp;

#[cfg(test)]
pub(crate) mod testing;

use netcensus_core::CidrError;
use thiserror::Error;

pub use arp::NeighborTableResolver;
pub use dns::DnsResolver;
pub use engine::{DiscoveryEngine, DiscoveryEvent, ProbeOptions, Probers};
pub use probe::{HostnameResolver, IdentityProber, LinkLayerResolver, PingProber, ReachabilityProber};
pub use scanner::NetworkScanner;
pub use scheduler::{
    AutoRegistrar, DiscoveryScheduler, RegistrationOutcome, ScheduleSettings, SegmentStateStore,
};
pub use snmp::SnmpIdentityProber;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    InvalidCidr(#[from] CidrError),
    #[error("Invalid IP address: {0:?}")]
    InvalidAddress(String),
    #[error("Discovery cancelled")]
    Cancelled,
    #[error("Device identification failed: {0}")]
    Identification(String),
    #[error("Unknown segment: {0}")]
    UnknownSegment(String),
}
