//! Periodic per-segment discovery with auto-registration

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netcensus_core::{DeviceDiscoveryResult, DiscoveredDevice, NetworkSegment, SegmentPhase, SegmentState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{DiscoveryEngine, DiscoveryEvent, ProbeOptions};
use crate::DiscoveryError;

/// What happened when a device was handed to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    /// The registry already tracks this device
    AlreadyKnown,
    /// No registry to hand the device to; it was only logged
    Skipped,
}

/// Hands discovered devices to an external device registry
#[async_trait]
pub trait AutoRegistrar: Send + Sync {
    async fn register(
        &self,
        device: &DiscoveredDevice,
        username: Option<&str>,
        password: Option<&str>,
    ) -> anyhow::Result<RegistrationOutcome>;
}

/// Scheduler-wide settings
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub initial_delay: Duration,
    pub check_interval: Duration,
    pub default_username: Option<String>,
    pub default_password: Option<String>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            check_interval: Duration::from_secs(5 * 60),
            default_username: None,
            default_password: None,
        }
    }
}

/// Scheduling state for every segment, keyed by segment name
#[derive(Debug, Default)]
pub struct SegmentStateStore {
    states: RwLock<HashMap<String, SegmentState>>,
}

impl SegmentStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> SegmentState {
        self.states.read().await.get(name).cloned().unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<String, SegmentState> {
        self.states.read().await.clone()
    }

    /// Mark every idle, due segment as Due and return them.
    ///
    /// Selection and marking happen under one lock, so a segment is never
    /// claimed twice while a cycle for it is pending or running.
    pub async fn claim_due(&self, segments: &[NetworkSegment], now: DateTime<Utc>) -> Vec<NetworkSegment> {
        let mut states = self.states.write().await;
        let mut claimed = Vec::new();
        for segment in segments {
            let state = states.entry(segment.name.clone()).or_default();
            if state.phase != SegmentPhase::Idle {
                debug!(segment = %segment.name, phase = ?state.phase, "Segment still busy, skipping");
                continue;
            }
            if segment.is_due(state.last_discovery_at, now) {
                state.phase = SegmentPhase::Due;
                claimed.push(segment.clone());
            }
        }
        claimed
    }

    pub async fn mark_running(&self, name: &str) {
        self.states.write().await.entry(name.to_string()).or_default().phase = SegmentPhase::Running;
    }

    /// Return a segment to Idle after a cycle.
    ///
    /// `last_discovery_at` never moves backwards; the device count is only
    /// replaced when the cycle produced one.
    pub async fn complete(&self, name: &str, finished_at: DateTime<Utc>, device_count: Option<usize>) {
        let mut states = self.states.write().await;
        let state = states.entry(name.to_string()).or_default();
        state.phase = SegmentPhase::Idle;
        state.last_discovery_at = Some(match state.last_discovery_at {
            Some(previous) => previous.max(finished_at),
            None => finished_at,
        });
        if device_count.is_some() {
            state.last_device_count = device_count;
        }
    }
}

/// Drives discovery of configured segments on a timer, and on demand
#[derive(Clone)]
pub struct DiscoveryScheduler {
    engine: Arc<DiscoveryEngine>,
    registrar: Arc<dyn AutoRegistrar>,
    segments: Arc<Vec<NetworkSegment>>,
    state: Arc<SegmentStateStore>,
    settings: Arc<ScheduleSettings>,
}

impl DiscoveryScheduler {
    pub fn new(
        engine: Arc<DiscoveryEngine>,
        registrar: Arc<dyn AutoRegistrar>,
        segments: Vec<NetworkSegment>,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            engine,
            registrar,
            segments: Arc::new(segments),
            state: Arc::new(SegmentStateStore::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    pub fn segments(&self) -> &[NetworkSegment] {
        &self.segments
    }

    pub fn segment(&self, name: &str) -> Option<&NetworkSegment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn state(&self) -> &SegmentStateStore {
        &self.state
    }

    /// Probe options for a segment: engine defaults plus its community
    fn options_for(&self, segment: &NetworkSegment) -> ProbeOptions {
        let mut options = self.engine.defaults().clone();
        if let Some(community) = &segment.community_override {
            options.community = community.clone();
        }
        options
    }

    /// Segment credentials when configured, otherwise the defaults
    fn credentials_for(&self, segment: &NetworkSegment) -> (Option<String>, Option<String>) {
        match &segment.credential_override {
            Some(creds) => (Some(creds.username.clone()), Some(creds.password.clone())),
            None => (
                self.settings.default_username.clone(),
                self.settings.default_password.clone(),
            ),
        }
    }

    /// Run until cancelled: wait the initial delay, then check for due
    /// segments every check interval
    pub async fn run(&self, cancel: CancellationToken) {
        let enabled = self.segments.iter().filter(|s| s.auto_discovery_enabled).count();
        info!(
            segments = self.segments.len(),
            enabled = enabled,
            initial_delay_secs = self.settings.initial_delay.as_secs(),
            check_interval_secs = self.settings.check_interval.as_secs(),
            "Discovery scheduler started"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Discovery scheduler stopped before first check");
                return;
            }
            _ = tokio::time::sleep(self.settings.initial_delay) => {}
        }

        let mut ticker = interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let started = self.tick(Utc::now(), &cancel).await;
                    debug!(started = started.len(), "Scheduler check complete");
                }
            }
        }

        info!("Discovery scheduler stopped");
    }

    /// Start a cycle for every due segment. Cycles run in the background so
    /// a slow segment never delays the next check.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let due = self.state.claim_due(&self.segments, now).await;
        due.into_iter()
            .map(|segment| {
                let this = self.clone();
                let cancel = cancel.child_token();
                tokio::spawn(async move { this.run_scheduled_cycle(segment, cancel).await })
            })
            .collect()
    }

    async fn run_scheduled_cycle(&self, segment: NetworkSegment, cancel: CancellationToken) {
        self.state.mark_running(&segment.name).await;

        let count = match self.run_segment(&segment, &cancel).await {
            Ok(result) => Some(result.devices_found()),
            Err(DiscoveryError::Cancelled) => {
                info!(segment = %segment.name, "Scheduled discovery cancelled");
                None
            }
            Err(e) => {
                error!(segment = %segment.name, error = %e, "Scheduled discovery failed");
                None
            }
        };

        self.state.complete(&segment.name, Utc::now(), count).await;
    }

    /// Discover one segment and register its reachable devices.
    /// Leaves the segment's scheduling state alone.
    pub async fn run_segment(
        &self,
        segment: &NetworkSegment,
        cancel: &CancellationToken,
    ) -> Result<DeviceDiscoveryResult, DiscoveryError> {
        info!(segment = %segment.name, cidr = %segment.cidr, "Discovering segment");

        let options = self.options_for(segment);
        let mut result = self
            .engine
            .discover_devices(&segment.cidr.to_string(), &options, cancel)
            .await?;

        let (username, password) = self.credentials_for(segment);
        result.devices_registered = self
            .register_devices(result.devices(), username.as_deref(), password.as_deref())
            .await;

        self.engine.publish(DiscoveryEvent::SegmentCompleted {
            segment: segment.name.clone(),
            found: result.devices_found(),
            registered: result.devices_registered,
        });
        info!(
            segment = %segment.name,
            found = result.devices_found(),
            registered = result.devices_registered,
            "Segment discovery complete"
        );
        Ok(result)
    }

    /// Register every reachable device concurrently; returns how many were
    /// newly registered. Failures are logged and skipped.
    pub async fn register_devices(
        &self,
        devices: &[DiscoveredDevice],
        username: Option<&str>,
        password: Option<&str>,
    ) -> usize {
        let mut tasks = JoinSet::new();
        for device in devices.iter().filter(|d| d.is_reachable).cloned() {
            let registrar = Arc::clone(&self.registrar);
            let username = username.map(str::to_string);
            let password = password.map(str::to_string);
            tasks.spawn(async move {
                let outcome = registrar
                    .register(&device, username.as_deref(), password.as_deref())
                    .await;
                (device, outcome)
            });
        }

        let mut registered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((device, Ok(RegistrationOutcome::Registered))) => {
                    info!(ip = %device.ip_address, name = %device.display_name(), "Device registered");
                    self.engine.publish(DiscoveryEvent::DeviceRegistered { ip: device.ip_address });
                    registered += 1;
                }
                Ok((device, Ok(RegistrationOutcome::AlreadyKnown))) => {
                    debug!(ip = %device.ip_address, "Device already registered");
                }
                Ok((device, Ok(RegistrationOutcome::Skipped))) => {
                    debug!(ip = %device.ip_address, "Registration skipped");
                }
                Ok((device, Err(e))) => {
                    warn!(ip = %device.ip_address, error = %e, "Failed to register device");
                }
                Err(e) => warn!(error = %e, "Registration task failed"),
            }
        }
        registered
    }

    /// Discover an arbitrary range now, optionally registering what it finds
    pub async fn discover_cidr_now(
        &self,
        cidr: &str,
        auto_register: bool,
        username: Option<&str>,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DeviceDiscoveryResult, DiscoveryError> {
        let options = self.engine.defaults().clone();
        let mut result = self.engine.discover_devices(cidr, &options, cancel).await?;
        if auto_register {
            let username = username.or(self.settings.default_username.as_deref());
            let password = password.or(self.settings.default_password.as_deref());
            result.devices_registered = self.register_devices(result.devices(), username, password).await;
        }
        Ok(result)
    }

    /// Discover one named segment now, outside the schedule
    pub async fn discover_segment_now(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<DeviceDiscoveryResult, DiscoveryError> {
        let segment = self
            .segment(name)
            .ok_or_else(|| DiscoveryError::UnknownSegment(name.to_string()))?;
        self.run_segment(segment, cancel).await
    }

    /// Discover every configured segment now, concurrently
    pub async fn discover_all_now(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<DeviceDiscoveryResult, DiscoveryError>)> {
        let runs = self.segments.iter().map(|segment| async move {
            (segment.name.clone(), self.run_segment(segment, cancel).await)
        });
        futures_util::future::join_all(runs).await
    }
}
