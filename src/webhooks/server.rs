//! Webhook HTTP server
//!
//! Serves the validating (`/validate-pods`) and mutating (`/mutate-pods`)
//! admission endpoints over TLS.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use thiserror::Error;
use tracing::{error, info};

use crate::controller::ClusterStore;
use crate::health::HealthState;
use crate::validation::PodValidator;
use crate::webhooks::handlers::{label_gate, trust_gate};
use crate::webhooks::pipeline::{
    AdmissionHandler, DeadlineExceeded, DurationObserver, Request, RequestContext, TimeoutResponder,
    default_timeout_response, with_logging, with_timeout, with_timing,
};

/// Path to the webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Path to the webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

pub const LABEL_GATE: &str = "label_gate";
pub const TRUST_GATE: &str = "trust_gate";

/// Webhook server errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("server error: {0}")]
    Server(String),
}

/// Wrap a handler in the production chain: logging, timing, then the deadline
pub fn admission_pipeline(
    name: &'static str,
    handler: AdmissionHandler,
    timeout: Duration,
    health_state: Option<Arc<HealthState>>,
) -> AdmissionHandler {
    let observer: Option<DurationObserver> = health_state.clone().map(|state| {
        let observer: DurationObserver =
            Arc::new(move |elapsed: Duration| state.metrics.record_admission(name, elapsed));
        observer
    });
    let on_timeout: TimeoutResponder = Arc::new(move |req: &Request, err: &DeadlineExceeded| {
        if let Some(state) = &health_state {
            state.metrics.record_admission_timeout(name);
        }
        default_timeout_response(req, err)
    });
    with_logging(with_timing(
        name,
        observer,
        with_timeout(timeout, on_timeout, handler),
    ))
}

/// Composed handlers shared by the routes
pub struct WebhookState {
    validate: AdmissionHandler,
    mutate: AdmissionHandler,
}

impl WebhookState {
    pub fn new(validate: AdmissionHandler, mutate: AdmissionHandler) -> Self {
        Self { validate, mutate }
    }

    /// Production handlers for both routes
    pub fn for_pods(
        store: Arc<dyn ClusterStore>,
        validator: PodValidator,
        timeout: Duration,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self::new(
            admission_pipeline(LABEL_GATE, label_gate(), timeout, health_state.clone()),
            admission_pipeline(
                TRUST_GATE,
                trust_gate(store, validator),
                timeout,
                health_state,
            ),
        )
    }
}

pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate-pods", post(validate_pods))
        .route("/mutate-pods", post(mutate_pods))
        .with_state(state)
}

async fn validate_pods(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    serve(&state.validate, review).await
}

async fn mutate_pods(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    serve(&state.mutate, review).await
}

/// Unwrap the review, run the handler chain and wrap its response
pub async fn serve(
    handler: &AdmissionHandler,
    review: AdmissionReview<DynamicObject>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Invalid admission review");
            return (
                StatusCode::BAD_REQUEST,
                Json(AdmissionResponse::invalid(e.to_string()).into_review()),
            );
        }
    };
    let response = handler(RequestContext::default(), Arc::new(request)).await;
    (StatusCode::OK, Json(response.into_review()))
}

/// Run the webhook server with TLS until it fails
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
