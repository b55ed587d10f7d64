//! Error taxonomy for image trust decisions
//!
//! Every backend fault is classified into one of these variants before it
//! leaves the trust layer, so callers can tell an authoritative "untrusted"
//! verdict apart from an indeterminate one.

use thiserror::Error;

/// Error variants mirror the trust taxonomy: untrusted, unknown, configuration, precondition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustError {
    /// Authoritative untrusted verdict; permanent until the image or config changes
    #[error("validation error: {0}")]
    Untrusted(String),

    /// Indeterminate result (network, auth, malformed response); retry later
    #[error("unknown result: {0}")]
    Unknown(String),

    /// Trust server failed its reachability probe
    #[error("trust service unreachable at {url}: {reason}")]
    ServiceUnreachable { url: String, reason: String },

    /// Malformed namespace annotations or image reference syntax
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller passed inconsistent arguments
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl TrustError {
    pub fn untrusted(msg: impl Into<String>) -> Self {
        TrustError::Untrusted(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        TrustError::Unknown(msg.into())
    }

    /// True for an authoritative untrusted verdict
    pub fn is_untrusted(&self) -> bool {
        matches!(self, TrustError::Untrusted(_))
    }

    /// True when the outcome is indeterminate and worth retrying
    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            TrustError::Unknown(_) | TrustError::ServiceUnreachable { .. }
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, TrustError::Configuration(_))
    }
}

impl From<reqwest::Error> for TrustError {
    fn from(err: reqwest::Error) -> Self {
        TrustError::Unknown(err.to_string())
    }
}

pub type TrustResult<T> = std::result::Result<T, TrustError>;
