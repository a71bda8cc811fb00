//! System-group identity queries

use async_snmp::{oid, Auth, Client, Oid, UdpClient, Value, VarBind};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::SnmpError;

/// Standard SNMP agent port
pub const SNMP_PORT: u16 = 161;

/// Community used when nothing else is configured
pub const DEFAULT_COMMUNITY: &str = "public";

/// Default timeout for a whole identity query
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// The system-group objects queried for identification, by result key
pub const SYSTEM_OIDS: [(&str, &str); 6] = [
    ("sysDescr", "1.3.6.1.2.1.1.1.0"),
    ("sysObjectID", "1.3.6.1.2.1.1.2.0"),
    ("sysUpTime", "1.3.6.1.2.1.1.3.0"),
    ("sysContact", "1.3.6.1.2.1.1.4.0"),
    ("sysName", "1.3.6.1.2.1.1.5.0"),
    ("sysLocation", "1.3.6.1.2.1.1.6.0"),
];

fn system_oids() -> Vec<(&'static str, Oid)> {
    vec![
        ("sysDescr", oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)),
        ("sysObjectID", oid!(1, 3, 6, 1, 2, 1, 1, 2, 0)),
        ("sysUpTime", oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)),
        ("sysContact", oid!(1, 3, 6, 1, 2, 1, 1, 4, 0)),
        ("sysName", oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)),
        ("sysLocation", oid!(1, 3, 6, 1, 2, 1, 1, 6, 0)),
    ]
}

/// Outcome of one GetRequest that reached the agent
#[derive(Debug)]
pub(crate) enum Reply {
    Values(Vec<VarBind>),
    /// The agent answered with a non-zero error-status
    Rejected(String),
}

/// Anything that can answer a GetRequest for a list of objects
pub(crate) trait SystemGroupSource {
    async fn get(&self, oids: &[Oid]) -> Result<Reply, SnmpError>;
}

struct AgentSession {
    client: UdpClient,
    target: SocketAddr,
}

impl SystemGroupSource for AgentSession {
    async fn get(&self, oids: &[Oid]) -> Result<Reply, SnmpError> {
        match self.client.get_many(oids).await {
            Ok(varbinds) => Ok(Reply::Values(varbinds)),
            Err(async_snmp::Error::Snmp { status, .. }) => Ok(Reply::Rejected(format!("{status:?}"))),
            Err(async_snmp::Error::Timeout { .. }) => Err(SnmpError::Timeout(self.target)),
            Err(e) => Err(SnmpError::Client(e)),
        }
    }
}

/// Query the system group of the agent at `ip:161`.
///
/// Never fails: any error yields whatever was collected before it, often
/// nothing.
pub async fn query_system_info(ip: IpAddr, community: &str, timeout: Duration) -> HashMap<String, String> {
    let target = SocketAddr::new(ip, SNMP_PORT);
    match query_system_info_at(target, community, timeout).await {
        Ok(info) => {
            if !info.is_empty() {
                info!(ip = %ip, values = info.len(), "SNMP identity retrieved");
            }
            info
        }
        Err(e) => {
            debug!(ip = %ip, error = %e, "SNMP query failed");
            HashMap::new()
        }
    }
}

/// Query the system group of an agent at an explicit address.
///
/// All six objects go out in one GetRequest. If the agent rejects it with
/// an error-status, each object is retried on its own and the ones that
/// answer are kept. The whole exchange shares one deadline.
pub async fn query_system_info_at(
    target: SocketAddr,
    community: &str,
    timeout: Duration,
) -> Result<HashMap<String, String>, SnmpError> {
    let deadline = Instant::now() + timeout;
    let connect = Client::builder(target.to_string(), Auth::v2c(community))
        .timeout(timeout)
        .retries(0)
        .connect();
    let client = timeout_at(deadline, connect)
        .await
        .map_err(|_| SnmpError::Timeout(target))??;

    fetch_system_group(&AgentSession { client, target }, target, deadline).await
}

async fn fetch_system_group<S: SystemGroupSource>(
    source: &S,
    target: SocketAddr,
    deadline: Instant,
) -> Result<HashMap<String, String>, SnmpError> {
    let oids = system_oids();
    let all: Vec<Oid> = oids.iter().map(|(_, oid)| oid.clone()).collect();

    let status = match timeout_at(deadline, source.get(&all))
        .await
        .map_err(|_| SnmpError::Timeout(target))??
    {
        Reply::Values(varbinds) => return Ok(collect(&oids, &varbinds)),
        Reply::Rejected(status) => status,
    };

    debug!(
        target = %target,
        error_status = %status,
        "Bulk system query rejected, falling back to single-object requests"
    );

    let mut info = HashMap::new();
    for (name, oid) in &oids {
        match timeout_at(deadline, source.get(std::slice::from_ref(oid))).await {
            Ok(Ok(Reply::Values(varbinds))) => {
                info.extend(collect(&[(*name, oid.clone())], &varbinds));
            }
            Ok(Ok(Reply::Rejected(status))) => {
                debug!(target = %target, object = *name, error_status = %status, "Object not available");
            }
            Err(_) | Ok(Err(SnmpError::Timeout(_))) if !info.is_empty() => break,
            Err(_) => return Err(SnmpError::Timeout(target)),
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(info)
}

/// Map response varbinds back to their names, dropping exception and empty values
fn collect(oids: &[(&str, Oid)], varbinds: &[VarBind]) -> HashMap<String, String> {
    varbinds
        .iter()
        .filter_map(|vb| {
            let name = oids.iter().find(|(_, oid)| *oid == vb.oid).map(|(name, _)| *name);
            if name.is_none() {
                debug!(oid = %vb.oid, "Unexpected OID in response");
            }
            Some((name?.to_string(), render(&vb.value)?))
        })
        .collect()
}

/// Text form of a value; `None` for NULL, exceptions and empty strings
fn render(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => return None,
        Value::ObjectIdentifier(oid) => oid.to_string(),
        Value::TimeTicks(ticks) => ticks.to_string(),
        Value::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => other.to_string(),
    };
    let text = text.trim_end_matches('\0').trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::UdpSocket;

    /// Answers GetRequests from a fixed table.
    /// With `strict`, multi-object requests are refused with noSuchName.
    struct FakeAgent {
        table: Vec<(Oid, Value)>,
        strict: bool,
        requests: Mutex<Vec<usize>>,
    }

    impl FakeAgent {
        fn new(table: Vec<(Oid, Value)>, strict: bool) -> Self {
            Self {
                table,
                strict,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl SystemGroupSource for FakeAgent {
        async fn get(&self, oids: &[Oid]) -> Result<Reply, SnmpError> {
            self.requests.lock().unwrap().push(oids.len());
            if self.strict && oids.len() > 1 {
                return Ok(Reply::Rejected("NoSuchName".to_string()));
            }
            let varbinds = oids
                .iter()
                .map(|oid| {
                    let value = self
                        .table
                        .iter()
                        .find(|(known, _)| known == oid)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::NoSuchObject);
                    VarBind::new(oid.clone(), value)
                })
                .collect();
            Ok(Reply::Values(varbinds))
        }
    }

    /// Never answers
    struct SilentAgent;

    impl SystemGroupSource for SilentAgent {
        async fn get(&self, _oids: &[Oid]) -> Result<Reply, SnmpError> {
            std::future::pending().await
        }
    }

    fn target() -> SocketAddr {
        "192.0.2.10:161".parse().unwrap()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    fn catalyst_table() -> Vec<(Oid, Value)> {
        vec![
            (
                oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                Value::OctetString("Cisco IOS Software, Catalyst 3750".into()),
            ),
            (
                oid!(1, 3, 6, 1, 2, 1, 1, 2, 0),
                Value::ObjectIdentifier(oid!(1, 3, 6, 1, 4, 1, 9, 1, 516)),
            ),
            (oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(8_640_000)),
            (oid!(1, 3, 6, 1, 2, 1, 1, 4, 0), Value::OctetString("".into())),
            (oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), Value::OctetString("core-sw1".into())),
        ]
    }

    #[test]
    fn test_system_oids_match_names() {
        let oids = system_oids();
        assert_eq!(oids.len(), SYSTEM_OIDS.len());
        for ((name, oid), (expected_name, expected_oid)) in oids.iter().zip(SYSTEM_OIDS.iter()) {
            assert_eq!(name, expected_name);
            assert_eq!(oid.to_string(), *expected_oid);
        }
    }

    #[tokio::test]
    async fn test_query_collects_present_objects() {
        let agent = FakeAgent::new(catalyst_table(), false);
        let info = fetch_system_group(&agent, target(), deadline()).await.unwrap();

        assert_eq!(info.get("sysDescr").map(String::as_str), Some("Cisco IOS Software, Catalyst 3750"));
        assert_eq!(info.get("sysObjectID").map(String::as_str), Some("1.3.6.1.4.1.9.1.516"));
        assert_eq!(info.get("sysUpTime").map(String::as_str), Some("8640000"));
        assert_eq!(info.get("sysName").map(String::as_str), Some("core-sw1"));
        // Empty and noSuchObject values are dropped
        assert!(!info.contains_key("sysContact"));
        assert!(!info.contains_key("sysLocation"));
        assert_eq!(*agent.requests.lock().unwrap(), vec![6]);
    }

    #[tokio::test]
    async fn test_query_falls_back_to_single_objects() {
        let agent = FakeAgent::new(catalyst_table(), true);
        let info = fetch_system_group(&agent, target(), deadline()).await.unwrap();

        assert_eq!(info.len(), 4);
        assert_eq!(info.get("sysName").map(String::as_str), Some("core-sw1"));
        assert_eq!(*agent.requests.lock().unwrap(), vec![6, 1, 1, 1, 1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_hits_deadline() {
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = fetch_system_group(&SilentAgent, target(), deadline).await;
        assert!(matches!(result, Err(SnmpError::Timeout(t)) if t == target()));
    }

    #[tokio::test]
    async fn test_silent_agent_times_out() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let started = std::time::Instant::now();
        let result = query_system_info_at(addr, "public", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(SnmpError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(silent);
    }

    #[test]
    fn test_render_drops_exceptions() {
        assert_eq!(render(&Value::NoSuchObject), None);
        assert_eq!(render(&Value::NoSuchInstance), None);
        assert_eq!(render(&Value::EndOfMibView), None);
        assert_eq!(render(&Value::Null), None);
        assert_eq!(render(&Value::OctetString("  ".into())), None);
        assert_eq!(render(&Value::TimeTicks(42)).as_deref(), Some("42"));
    }
}
