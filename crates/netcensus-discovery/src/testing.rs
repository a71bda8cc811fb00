//! In-memory probers and registrar for tests

use async_trait::async_trait;
use netcensus_core::DiscoveredDevice;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{DiscoveryEngine, ProbeOptions, Probers};
use crate::probe::{HostnameResolver, IdentityProber, LinkLayerResolver, ReachabilityProber};
use crate::scheduler::{AutoRegistrar, RegistrationOutcome};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Reports a fixed set of addresses as reachable
pub(crate) struct StubProber {
    reachable: HashSet<IpAddr>,
    calls: AtomicUsize,
}

impl StubProber {
    pub(crate) fn new<'a>(reachable: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            reachable: reachable.into_iter().map(ip).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProber for StubProber {
    async fn is_reachable(&self, ip: IpAddr, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.contains(&ip)
    }
}

/// Never answers
pub(crate) struct HangingProber;

#[async_trait]
impl ReachabilityProber for HangingProber {
    async fn is_reachable(&self, _ip: IpAddr, _timeout: Duration) -> bool {
        std::future::pending::<()>().await;
        false
    }
}

#[derive(Default)]
pub(crate) struct StubResolver(pub HashMap<IpAddr, String>);

#[async_trait]
impl HostnameResolver for StubResolver {
    async fn resolve(&self, ip: IpAddr) -> Option<String> {
        self.0.get(&ip).cloned()
    }
}

#[derive(Default)]
pub(crate) struct StubLinkLayer(pub HashMap<IpAddr, String>);

#[async_trait]
impl LinkLayerResolver for StubLinkLayer {
    async fn mac_address(&self, ip: IpAddr) -> Option<String> {
        self.0.get(&ip).cloned()
    }
}

/// Canned identity tables per address; optionally panics for one address
#[derive(Default)]
pub(crate) struct StubIdentity {
    pub tables: HashMap<IpAddr, HashMap<String, String>>,
    pub panic_on: Option<IpAddr>,
    pub communities: Mutex<Vec<(IpAddr, String)>>,
}

impl StubIdentity {
    pub(crate) fn with(mut self, addr: &str, pairs: &[(&str, &str)]) -> Self {
        let table = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.tables.insert(ip(addr), table);
        self
    }
}

#[async_trait]
impl IdentityProber for StubIdentity {
    async fn query(&self, ip: IpAddr, community: &str, _timeout: Duration) -> HashMap<String, String> {
        if self.panic_on == Some(ip) {
            panic!("identity probe blew up for {ip}");
        }
        self.communities.lock().unwrap().push((ip, community.to_string()));
        self.tables.get(&ip).cloned().unwrap_or_default()
    }
}

/// Records registration calls; addresses in `known` report AlreadyKnown,
/// addresses in `failing` return an error, and `skip_all` reports Skipped
#[derive(Default)]
pub(crate) struct RecordingRegistrar {
    pub known: HashSet<IpAddr>,
    pub failing: HashSet<IpAddr>,
    pub skip_all: bool,
    pub calls: Mutex<Vec<(IpAddr, Option<String>, Option<String>)>>,
}

impl RecordingRegistrar {
    pub(crate) fn registered_ips(&self) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = self.calls.lock().unwrap().iter().map(|(ip, _, _)| *ip).collect();
        ips.sort();
        ips
    }
}

#[async_trait]
impl AutoRegistrar for RecordingRegistrar {
    async fn register(
        &self,
        device: &DiscoveredDevice,
        username: Option<&str>,
        password: Option<&str>,
    ) -> anyhow::Result<RegistrationOutcome> {
        self.calls.lock().unwrap().push((
            device.ip_address,
            username.map(str::to_string),
            password.map(str::to_string),
        ));
        if self.failing.contains(&device.ip_address) {
            anyhow::bail!("registry rejected {}", device.ip_address);
        }
        if self.skip_all {
            Ok(RegistrationOutcome::Skipped)
        } else if self.known.contains(&device.ip_address) {
            Ok(RegistrationOutcome::AlreadyKnown)
        } else {
            Ok(RegistrationOutcome::Registered)
        }
    }
}

/// Fast probe options for tests
pub(crate) fn options() -> ProbeOptions {
    ProbeOptions {
        ping_timeout: Duration::from_millis(100),
        snmp_timeout: Duration::from_millis(100),
        community: "public".to_string(),
    }
}

/// The lab network used across tests: 10.0.0.0/29 with .2 and .5 alive,
/// and only .2 answering SNMP as a Catalyst switch
pub(crate) fn lab_probers() -> (Probers, Arc<StubIdentity>) {
    let identity = Arc::new(StubIdentity::default().with(
        "10.0.0.2",
        &[
            ("sysDescr", "Cisco IOS Catalyst 3750"),
            ("sysObjectID", "1.3.6.1.4.1.9.1.516"),
            ("sysName", "core-sw1"),
        ],
    ));
    let probers = Probers {
        reachability: Arc::new(StubProber::new(["10.0.0.2", "10.0.0.5"])),
        hostname: Arc::new(StubResolver::default()),
        link_layer: Arc::new(StubLinkLayer::default()),
        identity: identity.clone(),
    };
    (probers, identity)
}

pub(crate) fn lab_engine() -> (DiscoveryEngine, Arc<StubIdentity>) {
    let (probers, identity) = lab_probers();
    (DiscoveryEngine::new(probers, options(), 8), identity)
}
