//! netcensus core - Core types for network discovery
//!
//! This crate provides the foundational, I/O-free pieces of netcensus:
//! - CIDR parsing and bounded host expansion
//! - Discovered device and discovery result types
//! - Network segment configuration and scheduling state
//! - SNMP system description classification

pub mod cidr;
pub mod classify;
pub mod device;
pub mod segment;

pub use cidr::{expand_cidr, Cidr, CidrError, MAX_SCAN_HOSTS};
pub use classify::{classify, extract_software_version, Classification};
pub use device::{DeviceDiscoveredEvent, DeviceDiscoveryResult, DeviceType, DiscoveredDevice, Vendor};
pub use segment::{Credentials, NetworkSegment, SegmentPhase, SegmentState};
