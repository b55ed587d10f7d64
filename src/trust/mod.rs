//! Image trust verification
//!
//! Decides whether a single `repository:tag` reference is trusted by comparing
//! the hash signed on a trust server against the digest served by the registry.

pub mod config;
pub mod context;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod image;
pub mod notary;
pub mod registry;
pub mod verifier;

pub use config::TrustConfig;
pub use context::CallContext;
pub use credentials::{PullCredentials, RegistryCredential};
pub use digest::Digest;
pub use error::{TrustError, TrustResult};
pub use image::ImageReference;
pub use notary::{NotaryClientFactory, TrustBackend, TrustBackendFactory};
pub use registry::{ImageRegistry, ManifestDescriptor, ManifestKind, RegistryClient};
pub use verifier::{ImageVerifier, NotaryVerifier, StaticVerifier, Verification};
