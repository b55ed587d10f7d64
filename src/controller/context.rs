//! Shared context for the pod and namespace controllers

use std::sync::Arc;
use std::time::Duration;

use crate::controller::store::ClusterStore;
use crate::health::HealthState;
use crate::validation::PodValidator;

/// Default interval between retries while the trust service is unavailable
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Cluster reads, patches and events
    pub store: Arc<dyn ClusterStore>,
    pub validator: PodValidator,
    /// Delay before re-validating a pod whose verdict was service-unavailable
    pub retry_interval: Duration,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        validator: PodValidator,
        retry_interval: Duration,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            validator,
            retry_interval,
            health_state,
        }
    }

    pub fn record_reconcile(&self, controller: &'static str, duration: Duration) {
        if let Some(state) = &self.health_state {
            state.metrics.record_reconcile(controller, duration);
        }
    }

    pub fn record_error(&self, controller: &'static str, kind: &'static str) {
        if let Some(state) = &self.health_state {
            state.metrics.record_error(controller, kind);
        }
    }
}
