//! Auto-registration of discovered devices with a device registry

use anyhow::{Context, Result};
use async_trait::async_trait;
use netcensus_core::DiscoveredDevice;
use netcensus_discovery::{AutoRegistrar, RegistrationOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RegistrationConfig;

/// Registry endpoint, relative to the configured base URL
const REGISTER_PATH: &str = "/api/devices/discovered";

/// Body sent to the registry: the device record plus the name and
/// credentials to register it with
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest<'a> {
    #[serde(flatten)]
    device: &'a DiscoveredDevice,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

/// POSTs devices to a remote registry over HTTP
pub struct HttpRegistrar {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRegistrar {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), REGISTER_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AutoRegistrar for HttpRegistrar {
    async fn register(
        &self,
        device: &DiscoveredDevice,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<RegistrationOutcome> {
        let body = RegistrationRequest {
            device,
            name: device.display_name(),
            username,
            password,
        };

        debug!(ip = %device.ip_address, url = %self.endpoint, "Registering device");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.endpoint))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Ok(RegistrationOutcome::AlreadyKnown);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Registry returned {}: {}", status, text.trim());
        }
        Ok(RegistrationOutcome::Registered)
    }
}

/// Stand-in registrar used when no registry URL is configured
pub struct LogRegistrar;

#[async_trait]
impl AutoRegistrar for LogRegistrar {
    async fn register(
        &self,
        device: &DiscoveredDevice,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<RegistrationOutcome> {
        if username.is_none() || password.is_none() {
            anyhow::bail!("default credentials required");
        }
        info!(
            ip = %device.ip_address,
            name = %device.display_name(),
            vendor = ?device.vendor,
            device_type = ?device.device_type,
            "Would register device (no registry configured)"
        );
        Ok(RegistrationOutcome::Skipped)
    }
}

/// Pick the registrar for the configuration
pub fn from_config(config: &RegistrationConfig) -> Result<Arc<dyn AutoRegistrar>> {
    match &config.url {
        Some(url) => {
            let registrar = HttpRegistrar::new(url, Duration::from_secs(config.timeout_secs))?;
            info!(url = %registrar.endpoint(), "Registering devices over HTTP");
            Ok(Arc::new(registrar))
        }
        None => {
            info!("No registry URL configured, registrations are logged only");
            Ok(Arc::new(LogRegistrar))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Registry that answers every POST with `status` and records the bodies
    async fn fake_registry(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                REGISTER_PATH,
                post(move |State(seen): State<Received>, Json(body): Json<serde_json::Value>| async move {
                    seen.lock().unwrap().push(body);
                    status
                }),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), received)
    }

    fn device() -> DiscoveredDevice {
        let mut device = DiscoveredDevice::new("10.0.0.2".parse().unwrap());
        device.is_reachable = true;
        device
    }

    #[tokio::test]
    async fn test_http_registrar_registers() {
        let (url, received) = fake_registry(StatusCode::CREATED).await;
        let registrar = HttpRegistrar::new(&url, Duration::from_secs(5)).unwrap();
        assert!(registrar.endpoint().ends_with("/api/devices/discovered"));
        assert!(!registrar.endpoint().contains("//api"));

        let outcome = registrar.register(&device(), Some("admin"), Some("pw")).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Registered);

        let bodies = received.lock().unwrap();
        assert_eq!(bodies[0]["ipAddress"], "10.0.0.2");
        assert_eq!(bodies[0]["name"], "device-10-0-0-2");
        assert_eq!(bodies[0]["username"], "admin");
        assert_eq!(bodies[0]["isReachable"], true);
    }

    #[tokio::test]
    async fn test_http_registrar_conflict_is_already_known() {
        let (url, _) = fake_registry(StatusCode::CONFLICT).await;
        let registrar = HttpRegistrar::new(&url, Duration::from_secs(5)).unwrap();
        let outcome = registrar.register(&device(), None, None).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::AlreadyKnown);
    }

    #[tokio::test]
    async fn test_http_registrar_server_error() {
        let (url, _) = fake_registry(StatusCode::INTERNAL_SERVER_ERROR).await;
        let registrar = HttpRegistrar::new(&url, Duration::from_secs(5)).unwrap();
        assert!(registrar.register(&device(), None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_log_registrar_requires_credentials_and_registers_nothing() {
        let registrar = LogRegistrar;
        assert!(registrar.register(&device(), None, Some("pw")).await.is_err());
        let outcome = registrar.register(&device(), Some("admin"), Some("pw")).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Skipped);
    }
}
