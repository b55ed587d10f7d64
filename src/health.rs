//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (are the controllers running?)
//! - `/metrics` - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::validation::ValidationStatus;

/// Default health server port
pub const HEALTH_PORT: u16 = 8080;

/// Labels keyed by controller name (`pod`, `namespace`)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ControllerLabels {
    pub controller: &'static str,
}

impl EncodeLabelSet for ControllerLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("controller", self.controller).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reconcile errors
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ErrorLabels {
    pub controller: &'static str,
    pub kind: &'static str,
}

impl EncodeLabelSet for ErrorLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("controller", self.controller).encode(encoder.encode_label())?;
        ("kind", self.kind).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Single-label sets for validation status and admission handler name
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct NameLabel {
    key: &'static str,
    value: String,
}

impl EncodeLabelSet for NameLabel {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        (self.key, self.value.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

impl NameLabel {
    fn status(status: ValidationStatus) -> Self {
        Self {
            key: "status",
            value: status.as_str().to_string(),
        }
    }

    fn handler(name: &str) -> Self {
        Self {
            key: "handler",
            value: name.to_string(),
        }
    }
}

/// Shared metrics state
pub struct Metrics {
    pub reconciliations_total: Family<ControllerLabels, Counter>,
    pub reconciliation_errors_total: Family<ErrorLabels, Counter>,
    pub reconcile_duration_seconds: Family<ControllerLabels, Histogram>,
    /// Pod validation outcomes by status
    pub validations_total: Family<NameLabel, Counter>,
    /// Images accepted through the deprecated config-digest path
    pub legacy_digest_matches_total: Counter,
    pub admission_duration_seconds: Family<NameLabel, Histogram>,
    pub admission_timeouts_total: Family<NameLabel, Counter>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "image_trust_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "image_trust_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ControllerLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "image_trust_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let validations_total = Family::<NameLabel, Counter>::default();
        registry.register(
            "image_trust_validations",
            "Pod validation outcomes by status",
            validations_total.clone(),
        );

        let legacy_digest_matches_total = Counter::default();
        registry.register(
            "image_trust_legacy_digest_matches",
            "Images accepted via the deprecated config digest match",
            legacy_digest_matches_total.clone(),
        );

        let admission_duration_seconds =
            Family::<NameLabel, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "image_trust_admission_duration_seconds",
            "Duration of admission handlers in seconds",
            admission_duration_seconds.clone(),
        );

        let admission_timeouts_total = Family::<NameLabel, Counter>::default();
        registry.register(
            "image_trust_admission_timeouts",
            "Admission requests answered by the timeout response",
            admission_timeouts_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            validations_total,
            legacy_digest_matches_total,
            admission_duration_seconds,
            admission_timeouts_total,
            registry,
        }
    }

    /// Record a completed reconciliation
    pub fn record_reconcile(&self, controller: &'static str, duration: Duration) {
        let labels = ControllerLabels { controller };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration.as_secs_f64());
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, controller: &'static str, kind: &'static str) {
        self.reconciliation_errors_total
            .get_or_create(&ErrorLabels { controller, kind })
            .inc();
    }

    pub fn record_validation(&self, status: ValidationStatus, legacy_matches: usize) {
        self.validations_total
            .get_or_create(&NameLabel::status(status))
            .inc();
        if legacy_matches > 0 {
            self.legacy_digest_matches_total.inc_by(legacy_matches as u64);
        }
    }

    pub fn record_admission(&self, handler: &str, duration: Duration) {
        self.admission_duration_seconds
            .get_or_create(&NameLabel::handler(handler))
            .observe(duration.as_secs_f64());
    }

    pub fn record_admission_timeout(&self, handler: &str) {
        self.admission_timeouts_total
            .get_or_create(&NameLabel::handler(handler))
            .inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    pub(crate) fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the controllers are running
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 until the controllers are started.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve health and metrics endpoints on all interfaces
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
