//! Content digests and constant-time comparison

use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq;

use crate::trust::error::{TrustError, TrustResult};

const SHA256_PREFIX: &str = "sha256:";

/// A sha256 content digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest of raw bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Parse an OCI digest string (`sha256:<hex>`)
    pub fn parse(value: &str) -> TrustResult<Self> {
        let hex_part = value.strip_prefix(SHA256_PREFIX).ok_or_else(|| {
            TrustError::untrusted(format!("unsupported digest algorithm in '{}'", value))
        })?;
        let bytes = hex::decode(hex_part)
            .map_err(|e| TrustError::untrusted(format!("malformed digest '{}': {}", value, e)))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| TrustError::untrusted(format!("digest '{}' is not 32 bytes", value)))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compare against a trusted hash without leaking timing information
    pub fn matches(&self, trusted: &[u8]) -> bool {
        // ct_eq on slices of different length returns false without comparing contents
        bool::from(self.0.as_slice().ct_eq(trusted))
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, hex::encode(self.0))
    }
}
