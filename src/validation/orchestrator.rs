//! Pod validation: verifier selection, per-image verification and aggregation

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::trust::{
    CallContext, ImageRegistry, ImageVerifier, NotaryVerifier, PullCredentials, StaticVerifier,
    TrustBackendFactory, TrustConfig, TrustError, TrustResult, Verification,
};
use crate::validation::{NamespaceValidationMode, ValidationResult, collect_images};

/// Chooses the verifier that applies to a namespace mode
#[cfg_attr(test, automock)]
pub trait VerifierFactory: Send + Sync {
    fn verifier_for(&self, mode: &NamespaceValidationMode) -> TrustResult<Arc<dyn ImageVerifier>>;
}

/// Shares one system verifier and builds a scoped verifier for each user-managed namespace
pub struct DefaultVerifierFactory {
    system: Arc<dyn ImageVerifier>,
    backends: Arc<dyn TrustBackendFactory>,
    registry: Arc<dyn ImageRegistry>,
}

impl DefaultVerifierFactory {
    /// The system verifier uses the trust server when one is configured, the allow-list otherwise
    pub fn new(
        system_config: TrustConfig,
        backends: Arc<dyn TrustBackendFactory>,
        registry: Arc<dyn ImageRegistry>,
    ) -> TrustResult<Self> {
        let system: Arc<dyn ImageVerifier> = if system_config.trust_server_url.is_some() {
            Arc::new(NotaryVerifier::new(
                system_config,
                backends.clone(),
                registry.clone(),
            )?)
        } else {
            info!("No system trust server configured, using allow-list verification only");
            Arc::new(StaticVerifier::new(system_config))
        };
        Ok(Self {
            system,
            backends,
            registry,
        })
    }
}

impl VerifierFactory for DefaultVerifierFactory {
    fn verifier_for(&self, mode: &NamespaceValidationMode) -> TrustResult<Arc<dyn ImageVerifier>> {
        match mode {
            NamespaceValidationMode::SystemManaged => Ok(self.system.clone()),
            NamespaceValidationMode::UserManaged(config) => Ok(Arc::new(NotaryVerifier::new(
                config.clone(),
                self.backends.clone(),
                self.registry.clone(),
            )?)),
            NamespaceValidationMode::Disabled => Err(TrustError::Precondition(
                "no verifier applies to a disabled namespace".to_string(),
            )),
        }
    }
}

/// Validates every image of a pod under its namespace's trust policy
#[derive(Clone)]
pub struct PodValidator {
    factory: Arc<dyn VerifierFactory>,
}

impl PodValidator {
    pub fn new(factory: Arc<dyn VerifierFactory>) -> Self {
        Self { factory }
    }

    /// Validate a pod against `namespace`, which must be the pod's own namespace.
    ///
    /// Only a namespace mismatch or a malformed user-managed configuration is
    /// returned as an error; backend faults are folded into the result.
    pub async fn validate_pod(
        &self,
        ctx: &CallContext,
        pod: &Pod,
        namespace: &Namespace,
        credentials: &PullCredentials,
    ) -> TrustResult<ValidationResult> {
        let namespace_name = namespace.metadata.name.as_deref();
        if namespace_name.is_none() || namespace_name != pod.metadata.namespace.as_deref() {
            return Err(TrustError::Precondition(format!(
                "namespace {:?} does not match pod namespace {:?}",
                namespace_name,
                pod.metadata.namespace.as_deref()
            )));
        }

        let mode = NamespaceValidationMode::from_namespace(namespace)?;
        if !mode.is_enabled() {
            return Ok(ValidationResult::no_action());
        }

        let verifier = match self.factory.verifier_for(&mode) {
            Ok(verifier) => verifier,
            Err(e) if e.is_unknown() => {
                warn!(error = %e, "Verifier unavailable");
                return Ok(ValidationResult::service_unavailable());
            }
            Err(e) => return Err(e),
        };

        let images = collect_images(pod);
        debug!(images = images.len(), "Verifying pod images");

        let outcomes = join_all(images.into_iter().map(|image| {
            let verifier = verifier.clone();
            async move {
                let outcome = verifier.verify(ctx, &image, credentials).await;
                (image, outcome)
            }
        }))
        .await;

        Ok(aggregate(outcomes))
    }
}

/// Fold per-image outcomes into one result.
///
/// Any untrusted image makes the pod invalid and every such image is reported.
/// Otherwise an indeterminate outcome makes it service-unavailable.
pub fn aggregate<I>(outcomes: I) -> ValidationResult
where
    I: IntoIterator<Item = (String, TrustResult<Verification>)>,
{
    let mut invalid = BTreeSet::new();
    let mut legacy = BTreeSet::new();
    let mut unavailable = false;

    for (image, outcome) in outcomes {
        match outcome {
            Ok(Verification::LegacyConfigDigest) => {
                legacy.insert(image);
            }
            Ok(_) => {}
            Err(e) if e.is_unknown() => {
                debug!(image = %image, error = %e, "Image could not be verified");
                unavailable = true;
            }
            Err(e) => {
                info!(image = %image, error = %e, "Image failed trust verification");
                invalid.insert(image);
            }
        }
    }

    if let Some(result) = ValidationResult::invalid(invalid) {
        return result;
    }
    let result = if unavailable {
        ValidationResult::service_unavailable()
    } else {
        ValidationResult::valid()
    };
    result.with_legacy_images(legacy)
}
