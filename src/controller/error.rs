//! Error types for the pod and namespace controllers

use thiserror::Error;

use crate::trust::TrustError;

/// Variants are named after their source so `?` converts cleanly at call sites.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Trust validation error: {0}")]
    Trust(#[from] TrustError),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// Optimistic concurrency failure: the object changed since it was read
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Short label used for metrics and event reasons
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube(_) => "kube",
            Error::Serialization(_) => "serialization",
            Error::Trust(TrustError::Configuration(_)) => "configuration",
            Error::Trust(TrustError::Precondition(_)) => "precondition",
            Error::Trust(_) => "trust",
            Error::MissingObjectKey(_) => "missing_key",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
