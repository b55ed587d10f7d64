//! Admission webhooks for pods
//!
//! Two endpoints share one decorator chain (logging, timing, deadline):
//! - `/validate-pods` rejects pods already labelled `failed`
//! - `/mutate-pods` validates images inline and annotates admitted pods

pub mod handlers;
pub mod pipeline;
mod server;

pub use handlers::{
    ADMISSION_RESULT_ANNOTATION, annotation_patch, label_gate, not_applicable, review_label,
    review_trust, trust_gate,
};
pub use pipeline::{
    AdmissionHandler, DeadlineExceeded, DurationObserver, RequestContext, TimeoutResponder,
    default_timeout_response, handler_fn, internal_error, with_logging, with_timeout, with_timing,
};
pub use server::{
    LABEL_GATE, TRUST_GATE, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError,
    WebhookState, admission_pipeline, create_webhook_router, run_webhook_server, serve,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
