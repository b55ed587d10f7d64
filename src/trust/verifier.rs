//! Trust verification of a single image reference
//!
//! [`NotaryVerifier`] implements the full algorithm: allow-list bypass, signed
//! target lookup, registry digest computation and constant-time comparison.
//! [`StaticVerifier`] is the allow-list-only backend used when no trust server
//! is configured. Both are immutable after construction and shared freely
//! across concurrent callers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::trust::config::TrustConfig;
use crate::trust::context::CallContext;
use crate::trust::credentials::PullCredentials;
use crate::trust::error::{TrustError, TrustResult};
use crate::trust::image::ImageReference;
use crate::trust::notary::TrustBackendFactory;
use crate::trust::registry::{ImageRegistry, ManifestKind};

/// How an image was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Repository matched the allow-list; no backend was consulted
    Bypassed,
    /// Signed hash equals the image or index digest
    Digest,
    /// Signed hash equals the config-blob digest (deprecated compatibility path)
    LegacyConfigDigest,
}

/// Capability shared by every verifier backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageVerifier: Send + Sync {
    async fn verify(
        &self,
        ctx: &CallContext,
        image: &str,
        credentials: &PullCredentials,
    ) -> TrustResult<Verification>;
}

/// Verifier backed by a remote trust server and the image registry
pub struct NotaryVerifier {
    config: TrustConfig,
    server_url: Url,
    backends: Arc<dyn TrustBackendFactory>,
    registry: Arc<dyn ImageRegistry>,
}

impl NotaryVerifier {
    pub fn new(
        config: TrustConfig,
        backends: Arc<dyn TrustBackendFactory>,
        registry: Arc<dyn ImageRegistry>,
    ) -> TrustResult<Self> {
        let server_url = config.trust_server_url.clone().ok_or_else(|| {
            TrustError::Configuration("trust server URL is required".to_string())
        })?;
        Ok(Self {
            config,
            server_url,
            backends,
            registry,
        })
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }
}

#[async_trait]
impl ImageVerifier for NotaryVerifier {
    #[instrument(skip(self, ctx, credentials), fields(server = %self.server_url))]
    async fn verify(
        &self,
        ctx: &CallContext,
        image: &str,
        credentials: &PullCredentials,
    ) -> TrustResult<Verification> {
        if self.config.is_allowed(image) {
            debug!("Image matches allowed registry prefix, skipping verification");
            return Ok(Verification::Bypassed);
        }

        let reference = ImageReference::parse(image)?;
        let timeout = ctx.clamp(self.config.request_timeout);

        let backend = ctx
            .run(self.backends.connect(&self.server_url, timeout))
            .await?;
        let trusted = ctx.run(backend.target_hash(&reference)).await?;
        let descriptor = ctx
            .run(
                self.registry
                    .manifest_descriptor(&reference, credentials, timeout),
            )
            .await?;

        match descriptor.kind()? {
            ManifestKind::Index => {
                if descriptor.index_digest()?.matches(&trusted) {
                    return Ok(Verification::Digest);
                }
            }
            ManifestKind::Image => {
                if descriptor.image_digest()?.matches(&trusted) {
                    return Ok(Verification::Digest);
                }
                let legacy = descriptor
                    .config_digest()
                    .filter(|config_digest| config_digest.matches(&trusted));
                if let Some(config_digest) = legacy {
                    if self.config.strict {
                        return Err(TrustError::untrusted(format!(
                            "signed hash for {} matches the legacy config digest, which strict mode rejects",
                            reference
                        )));
                    }
                    warn!(
                        deprecated = true,
                        config_digest = %config_digest,
                        "Image accepted via legacy config digest; re-sign with the manifest digest"
                    );
                    return Ok(Verification::LegacyConfigDigest);
                }
            }
        }

        Err(TrustError::untrusted(format!(
            "unexpected image hash value for {}",
            reference
        )))
    }
}

/// Allow-list only verifier: allowed repositories pass, everything else is untrusted
pub struct StaticVerifier {
    config: TrustConfig,
}

impl StaticVerifier {
    pub fn new(config: TrustConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ImageVerifier for StaticVerifier {
    async fn verify(
        &self,
        _ctx: &CallContext,
        image: &str,
        _credentials: &PullCredentials,
    ) -> TrustResult<Verification> {
        if self.config.is_allowed(image) {
            return Ok(Verification::Bypassed);
        }
        let reference = ImageReference::parse(image)?;
        Err(TrustError::untrusted(format!(
            "{} is not in an allowed registry and no trust server is configured",
            reference
        )))
    }
}
