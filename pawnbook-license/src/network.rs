//! Connectivity tracking with retry backoff.
//!
//! The monitor is the only component that runs unsolicited background work:
//! a periodic poll started with [`NetworkStatusMonitor::spawn_polling`].

use crate::clock::Clock;
use crate::config::NetworkConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Snapshot of the monitor's view of the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub is_online: bool,
    /// Epoch milliseconds of the last probe or state change; 0 if never.
    pub last_check_ms: i64,
    pub latency_ms: Option<u64>,
    pub authority_reachable: bool,
}

/// Network reachability checks.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Probes a well-known external endpoint.
    async fn probe_internet(&self) -> bool;

    /// Probes the license authority's endpoint.
    async fn probe_authority(&self) -> bool;
}

/// Process-wide connectivity signal.
pub struct NetworkStatusMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    clock: Arc<dyn Clock>,
    config: NetworkConfig,
    state: RwLock<NetworkState>,
}

impl NetworkStatusMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, clock: Arc<dyn Clock>, config: NetworkConfig) -> Self {
        Self {
            probe,
            clock,
            config,
            state: RwLock::new(NetworkState::default()),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> NetworkState {
        *self.state.read().await
    }

    pub async fn is_online(&self) -> bool {
        self.state.read().await.is_online
    }

    /// Probes general internet access. A failed or timed-out probe is `false`.
    pub async fn check_online_status(&self) -> bool {
        let started = Instant::now();
        let online = tokio::time::timeout(self.config.probe_timeout(), self.probe.probe_internet())
            .await
            .unwrap_or(false);
        let latency_ms = online.then(|| started.elapsed().as_millis() as u64);

        let mut state = self.state.write().await;
        if state.is_online != online {
            info!(online, "Network status changed");
        }
        state.is_online = online;
        state.last_check_ms = self.clock.now_ms();
        state.latency_ms = latency_ms;
        online
    }

    /// Probes the authority directly; independent of general internet access.
    pub async fn check_authority_reachability(&self) -> bool {
        let reachable =
            tokio::time::timeout(self.config.probe_timeout(), self.probe.probe_authority())
                .await
                .unwrap_or(false);
        self.state.write().await.authority_reachable = reachable;
        debug!(reachable, "Checked authority reachability");
        reachable
    }

    /// True when online, or when offline and the retry backoff has elapsed.
    pub async fn should_attempt_online_validation(&self) -> bool {
        let state = self.state.read().await;
        if state.is_online {
            return true;
        }
        self.clock.now_ms() - state.last_check_ms >= self.config.retry_backoff_ms()
    }

    /// Records a failed remote call so the backoff applies.
    pub async fn mark_offline(&self) {
        let mut state = self.state.write().await;
        if state.is_online {
            info!("Network marked offline after failed remote call");
        }
        state.is_online = false;
        state.authority_reachable = false;
        state.last_check_ms = self.clock.now_ms();
    }

    /// Hook for OS connectivity-change notifications.
    pub async fn set_connectivity(&self, online: bool) {
        let mut state = self.state.write().await;
        if state.is_online != online {
            info!(online, "Connectivity notification");
        }
        state.is_online = online;
        state.last_check_ms = self.clock.now_ms();
    }

    /// Starts the periodic refresh. Abort the handle to stop it.
    pub fn spawn_polling(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.poll_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.check_online_status().await;
            }
        })
    }
}

/// HTTP reachability probe.
///
/// Any HTTP response counts as reachable; only transport failures and
/// timeouts count as unreachable.
#[cfg(feature = "online")]
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    internet_url: String,
    authority_url: String,
}

#[cfg(feature = "online")]
impl HttpConnectivityProbe {
    pub fn new(
        internet_url: impl Into<String>,
        authority_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> crate::error::LicenseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::LicenseError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            internet_url: internet_url.into(),
            authority_url: authority_url.into(),
        })
    }

    async fn head(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => {
                debug!(url, status = %response.status(), "Probe answered");
                true
            }
            Err(e) => {
                debug!(url, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(feature = "online")]
#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn probe_internet(&self) -> bool {
        self.head(&self.internet_url).await
    }

    async fn probe_authority(&self) -> bool {
        self.head(&self.authority_url).await
    }
}
