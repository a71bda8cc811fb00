//! Heuristic classification of SNMP system descriptions
//!
//! Vendor and device type are matched independently against the lowercased
//! description. Within each category the first matching rule wins, so rule
//! order is part of the contract: a description mentioning both "router"
//! and "switch" classifies as a switch.

use regex::Regex;
use std::sync::LazyLock;

use crate::device::{DeviceType, Vendor};

/// Enterprise OID prefixes used when the description is inconclusive
const CISCO_ENTERPRISE: &str = "1.3.6.1.4.1.9";
const JUNIPER_ENTERPRISE: &str = "1.3.6.1.4.1.2636";
const HPE_ENTERPRISE: &str = "1.3.6.1.4.1.11";
const ARISTA_ENTERPRISE: &str = "1.3.6.1.4.1.30065";

static CISCO_MODEL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Catalyst (\d+)",
        r"(ISR\d+)",
        r"(ASR\d+)",
        r"(Nexus \d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static model pattern"))
    .collect()
});

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bversion:?\s+([0-9][^\s,;]*)").expect("static version pattern"));

/// Result of classifying one system description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub vendor: Vendor,
    pub device_type: DeviceType,
    pub model: Option<String>,
}

/// Classify a device from its `sysDescr` and, when known, its `sysObjectID`
pub fn classify(sys_descr: &str, sys_object_id: Option<&str>) -> Classification {
    let lower = sys_descr.to_lowercase();
    let vendor = classify_vendor(&lower, sys_object_id);
    let device_type = classify_type(&lower);
    let model = if vendor == Vendor::Cisco {
        extract_cisco_model(sys_descr)
    } else {
        None
    };

    Classification {
        vendor,
        device_type,
        model,
    }
}

fn classify_vendor(lower: &str, oid: Option<&str>) -> Vendor {
    let under = |prefix: &str| oid.is_some_and(|oid| oid_has_prefix(oid, prefix));

    if lower.contains("cisco") || under(CISCO_ENTERPRISE) {
        Vendor::Cisco
    } else if lower.contains("juniper") || under(JUNIPER_ENTERPRISE) {
        Vendor::Juniper
    } else if lower.contains("hp") || lower.contains("hewlett") || under(HPE_ENTERPRISE) {
        Vendor::Hpe
    } else if lower.contains("arista") || under(ARISTA_ENTERPRISE) {
        Vendor::Arista
    } else if lower.contains("dell") {
        Vendor::Dell
    } else {
        Vendor::Unknown
    }
}

fn classify_type(lower: &str) -> DeviceType {
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if any(&["switch", "catalyst"]) {
        DeviceType::Switch
    } else if any(&["router", "asr", "isr"]) {
        DeviceType::Router
    } else if any(&["firewall", "asa", "srx"]) {
        DeviceType::Firewall
    } else if any(&["wireless", "wlc", "access point", "ap"]) {
        DeviceType::AccessPoint
    } else if any(&["server", "linux", "windows"]) {
        DeviceType::Server
    } else {
        DeviceType::Unknown
    }
}

/// Arc-aware prefix test: `1.3.6.1.4.1.9` covers `1.3.6.1.4.1.9.1.516`
/// but not `1.3.6.1.4.1.99`
fn oid_has_prefix(oid: &str, prefix: &str) -> bool {
    let oid = oid.trim().trim_start_matches('.');
    match oid.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

fn extract_cisco_model(sys_descr: &str) -> Option<String> {
    CISCO_MODEL_PATTERNS
        .iter()
        .find_map(|re| re.find(sys_descr))
        .map(|m| m.as_str().to_string())
}

/// Pull a software version out of a system description
/// (`"... Version 15.0(2)SE11, RELEASE ..."` gives `15.0(2)SE11`)
pub fn extract_software_version(sys_descr: &str) -> Option<String> {
    VERSION_PATTERN
        .captures(sys_descr)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
