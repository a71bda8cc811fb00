//! Parallel reachability sweep over a CIDR range

use netcensus_core::{Cidr, MAX_SCAN_HOSTS};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::probe::ReachabilityProber;
use crate::DiscoveryError;

/// Probes every candidate address of a range at once and keeps the live ones
#[derive(Clone)]
pub struct NetworkScanner {
    prober: Arc<dyn ReachabilityProber>,
}

impl NetworkScanner {
    pub fn new(prober: Arc<dyn ReachabilityProber>) -> Self {
        Self { prober }
    }

    /// Parse `cidr` and sweep it
    pub async fn scan_range(
        &self,
        cidr: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
        let cidr: Cidr = cidr.parse()?;
        self.scan(&cidr, timeout, cancel).await
    }

    /// Return the reachable addresses of `cidr`, in ascending order.
    ///
    /// Ranges larger than [`MAX_SCAN_HOSTS`] addresses are truncated. Each
    /// probe is bounded by `timeout`, so the sweep takes roughly one timeout
    /// regardless of range size.
    pub async fn scan(
        &self,
        cidr: &Cidr,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
        if cidr.is_clamped() {
            warn!(
                cidr = %cidr,
                addresses = cidr.host_count(),
                limit = MAX_SCAN_HOSTS,
                "Network range too large, limiting scan to the first {} addresses",
                MAX_SCAN_HOSTS
            );
        }

        let hosts = cidr.hosts();
        debug!(cidr = %cidr, candidates = hosts.len(), "Starting reachability sweep");

        let mut tasks = JoinSet::new();
        for (index, &host) in hosts.iter().enumerate() {
            let prober = Arc::clone(&self.prober);
            tasks.spawn(async move { (index, prober.is_reachable(IpAddr::V4(host), timeout).await) });
        }

        let mut alive = vec![false; hosts.len()];
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!(cidr = %cidr, "Network scan cancelled");
                    return Err(DiscoveryError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                Some(Ok((index, reachable))) => alive[index] = reachable,
                // A panicking prober counts as no answer
                Some(Err(e)) => debug!(error = %e, "Probe task failed"),
                None => break,
            }
        }

        let reachable: Vec<Ipv4Addr> = hosts
            .into_iter()
            .zip(alive)
            .filter_map(|(host, up)| up.then_some(host))
            .collect();

        info!(
            cidr = %cidr,
            scanned = cidr.usable_hosts(),
            reachable = reachable.len(),
            "Network scan complete"
        );
        Ok(reachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HangingProber, StubProber};

    fn v4(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_scan_returns_reachable_in_order() {
        let prober = StubProber::new(["10.0.0.5", "10.0.0.2"]);
        let scanner = NetworkScanner::new(Arc::new(prober));
        let live = scanner
            .scan_range("10.0.0.0/29", Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(live, vec![v4("10.0.0.2"), v4("10.0.0.5")]);
    }

    #[tokio::test]
    async fn test_scan_probes_every_candidate_once() {
        let prober = Arc::new(StubProber::new(Vec::<&str>::new()));
        let scanner = NetworkScanner::new(prober.clone());
        let live = scanner
            .scan_range("10.0.0.0/24", Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap();
        assert!(live.is_empty());
        assert_eq!(prober.calls(), 254);
    }

    #[tokio::test]
    async fn test_scan_single_host_range() {
        let scanner = NetworkScanner::new(Arc::new(StubProber::new(["10.0.0.1"])));
        let cancel = CancellationToken::new();
        let live = scanner.scan_range("10.0.0.1/32", Duration::from_millis(100), &cancel).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn test_scan_invalid_cidr() {
        let scanner = NetworkScanner::new(Arc::new(StubProber::new(Vec::<&str>::new())));
        let result = scanner
            .scan_range("10.0.0.0", Duration::from_millis(100), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DiscoveryError::InvalidCidr(_))));
    }

    #[tokio::test]
    async fn test_scan_cancelled() {
        let scanner = NetworkScanner::new(Arc::new(HangingProber));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = scanner.scan_range("10.0.0.0/28", Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }
}
