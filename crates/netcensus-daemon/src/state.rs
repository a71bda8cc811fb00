//! Application state management

use anyhow::Result;
use netcensus_discovery::{
    AutoRegistrar, DiscoveryEngine, DiscoveryEvent, DiscoveryScheduler, Probers,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::registration;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Discovery engine, shared with the scheduler
    pub engine: Arc<DiscoveryEngine>,
    /// Segment scheduler; also serves manual triggers
    pub scheduler: DiscoveryScheduler,
    /// Cancelled on shutdown; every run uses a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create state wired to the real network probers
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let probers = Probers::system(config.dns_timeout(), config.neighbor_timeout());
        let registrar = registration::from_config(&config.registration)?;
        Self::with_parts(config, probers, registrar)
    }

    /// Create state from explicit probers and registrar
    pub fn with_parts(
        config: Config,
        probers: Probers,
        registrar: Arc<dyn AutoRegistrar>,
    ) -> Result<Arc<Self>> {
        let segments = config.network_segments()?;
        let engine = Arc::new(DiscoveryEngine::new(
            probers,
            config.probe_options(),
            config.discovery.max_concurrent_discoveries,
        ));
        let scheduler =
            DiscoveryScheduler::new(engine.clone(), registrar, segments, config.schedule_settings());

        info!(
            segments = scheduler.segments().len(),
            max_concurrent = config.discovery.max_concurrent_discoveries,
            "Discovery initialized"
        );

        Ok(Arc::new(Self {
            config,
            engine,
            scheduler,
            shutdown: CancellationToken::new(),
        }))
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.engine.subscribe()
    }

    /// Token for one request-scoped run
    pub fn run_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
