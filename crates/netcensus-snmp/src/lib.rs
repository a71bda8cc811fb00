//! netcensus SNMP - system-group queries for device identification
//!
//! Thin layer over `async-snmp`: one community-based SNMPv2c exchange per
//! device, returning the system group keyed by object name.

pub mod query;

use std::net::SocketAddr;
use thiserror::Error;

pub use query::{
    query_system_info, query_system_info_at, DEFAULT_COMMUNITY, DEFAULT_TIMEOUT_MS, SNMP_PORT,
    SYSTEM_OIDS,
};

#[derive(Error, Debug)]
pub enum SnmpError {
    #[error(transparent)]
    Client(#[from] async_snmp::Error),
    #[error("No response from {0} before deadline")]
    Timeout(SocketAddr),
}
