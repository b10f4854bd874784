//! Component health probes

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::infra::traits::{AnalyticalStore, DurableStore, RealtimeStore, SigningService};

/// Health of a single component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Unhealthy { reason: String },
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentHealth::Healthy)
    }
}

/// Aggregated health across every tier and the signing service
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub realtime: ComponentHealth,
    pub durable: ComponentHealth,
    pub analytical: ComponentHealth,
    pub signing: ComponentHealth,
    /// True only when every component is healthy
    pub healthy: bool,
}

/// Pings each dependency with a bounded deadline.
pub struct HealthChecker {
    durable: Arc<dyn DurableStore>,
    realtime: Arc<dyn RealtimeStore>,
    analytical: Arc<dyn AnalyticalStore>,
    signer: Arc<dyn SigningService>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        realtime: Arc<dyn RealtimeStore>,
        analytical: Arc<dyn AnalyticalStore>,
        signer: Arc<dyn SigningService>,
    ) -> Self {
        Self {
            durable,
            realtime,
            analytical,
            signer,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe(
        &self,
        fut: impl std::future::Future<Output = crate::infra::error::Result<()>>,
    ) -> ComponentHealth {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(())) => ComponentHealth::Healthy,
            Ok(Err(e)) => ComponentHealth::Unhealthy {
                reason: e.to_string(),
            },
            Err(_) => ComponentHealth::Unhealthy {
                reason: format!("ping timed out after {:?}", self.timeout),
            },
        }
    }

    /// Probe every component. A degraded analytical tier makes the overall
    /// status unhealthy too; the service can still commit, but compliance
    /// reads are stale and operators need to know.
    pub async fn check(&self) -> HealthStatus {
        let (durable, realtime, analytical, signing) = tokio::join!(
            self.probe(self.durable.ping()),
            self.probe(self.realtime.ping()),
            self.probe(self.analytical.ping()),
            self.probe(self.signer.ping()),
        );

        let healthy = durable.is_healthy()
            && realtime.is_healthy()
            && analytical.is_healthy()
            && signing.is_healthy();

        HealthStatus {
            realtime,
            durable,
            analytical,
            signing,
            healthy,
        }
    }
}
