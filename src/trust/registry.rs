//! Image registry backend (OCI distribution API)
//!
//! Fetches the manifest descriptor for a reference and derives the digests the
//! verifier compares against signed trust data.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, WWW_AUTHENTICATE};
use serde::Deserialize;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::trust::credentials::{PullCredentials, RegistryCredential};
use crate::trust::digest::Digest;
use crate::trust::error::{TrustError, TrustResult};
use crate::trust::image::ImageReference;

pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Whether a descriptor is a multi-platform index or a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Index,
    Image,
}

/// Raw manifest as served by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    pub media_type: String,
    pub raw: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestHeader {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<ConfigDescriptor>,
}

#[derive(Deserialize)]
struct ConfigDescriptor {
    digest: String,
}

impl ManifestDescriptor {
    pub fn new(media_type: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            raw,
        }
    }

    pub fn kind(&self) -> TrustResult<ManifestKind> {
        match self.media_type.as_str() {
            OCI_INDEX | DOCKER_MANIFEST_LIST => Ok(ManifestKind::Index),
            OCI_MANIFEST | DOCKER_MANIFEST => Ok(ManifestKind::Image),
            other => Err(TrustError::untrusted(format!(
                "unsupported manifest media type '{}'",
                other
            ))),
        }
    }

    /// Digest of a manifest index
    pub fn index_digest(&self) -> TrustResult<Digest> {
        match self.kind()? {
            ManifestKind::Index => Ok(Digest::of(&self.raw)),
            ManifestKind::Image => Err(TrustError::untrusted(
                "expected a manifest index but registry returned an image manifest",
            )),
        }
    }

    /// Digest of an image manifest
    pub fn image_digest(&self) -> TrustResult<Digest> {
        match self.kind()? {
            ManifestKind::Image => Ok(Digest::of(&self.raw)),
            ManifestKind::Index => Err(TrustError::untrusted(
                "expected an image manifest but registry returned a manifest index",
            )),
        }
    }

    /// Digest of the config blob an image manifest references, if it has a usable one
    pub fn config_digest(&self) -> Option<Digest> {
        if self.kind().ok()? != ManifestKind::Image {
            return None;
        }
        let header: ManifestHeader = serde_json::from_slice(&self.raw).ok()?;
        Digest::parse(&header.config?.digest).ok()
    }
}

/// Source of manifest descriptors
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn manifest_descriptor(
        &self,
        image: &ImageReference,
        credentials: &PullCredentials,
        timeout: Duration,
    ) -> TrustResult<ManifestDescriptor>;
}

/// Registry client speaking the distribution API over HTTPS
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
}

enum Authorization<'a> {
    Anonymous,
    Bearer(String),
    Basic(&'a RegistryCredential),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Bearer {
        realm: String,
        service: Option<String>,
    },
    Basic,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl RegistryClient {
    pub fn new() -> TrustResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("image-trust-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn get_manifest(
        &self,
        url: &str,
        auth: &Authorization<'_>,
        timeout: Duration,
    ) -> TrustResult<reqwest::Response> {
        let accept = [OCI_INDEX, DOCKER_MANIFEST_LIST, OCI_MANIFEST, DOCKER_MANIFEST].join(", ");
        let request = self.http.get(url).header(ACCEPT, accept).timeout(timeout);
        let request = match auth {
            Authorization::Anonymous => request,
            Authorization::Bearer(token) => request.bearer_auth(token),
            Authorization::Basic(cred) => request.basic_auth(&cred.username, Some(&cred.password)),
        };
        Ok(request.send().await?)
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: Option<&str>,
        path: &str,
        credential: Option<&RegistryCredential>,
        timeout: Duration,
    ) -> TrustResult<String> {
        let scope = format!("repository:{}:pull", path);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = service {
            query.push(("service", service));
        }
        let mut request = self.http.get(realm).query(&query).timeout(timeout);
        if let Some(cred) = credential {
            request = request.basic_auth(&cred.username, Some(&cred.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TrustError::unknown(format!(
                "registry token endpoint returned {}",
                response.status()
            )));
        }
        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| TrustError::unknown("registry token response carried no token"))
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    #[instrument(skip(self, credentials), fields(image = %image))]
    async fn manifest_descriptor(
        &self,
        image: &ImageReference,
        credentials: &PullCredentials,
        timeout: Duration,
    ) -> TrustResult<ManifestDescriptor> {
        let location = image.location();
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            location.api_host(),
            location.path,
            image.tag
        );
        let credential = credentials.for_registry(&location.registry);

        let started = tokio::time::Instant::now();
        let mut response = self
            .get_manifest(&url, &Authorization::Anonymous, timeout)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_challenge);
            response = match (challenge, credential) {
                (Some(AuthChallenge::Bearer { realm, service }), _) => {
                    let token = self
                        .fetch_token(&realm, service.as_deref(), &location.path, credential, timeout)
                        .await?;
                    self.get_manifest(&url, &Authorization::Bearer(token), timeout)
                        .await?
                }
                (Some(AuthChallenge::Basic), Some(cred)) => {
                    self.get_manifest(&url, &Authorization::Basic(cred), timeout)
                        .await?
                }
                _ => {
                    return Err(TrustError::unknown(format!(
                        "registry {} requires authentication",
                        location.registry
                    )));
                }
            };
        }

        let status = response.status();
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched manifest descriptor"
        );
        if !status.is_success() {
            return Err(TrustError::unknown(format!(
                "registry returned {} for {}",
                status, image
            )));
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let raw = response.bytes().await?.to_vec();
        let media_type = resolve_media_type(header_type.as_deref(), &raw);
        Ok(ManifestDescriptor { media_type, raw })
    }
}

/// Prefer the Content-Type header; fall back to the body's `mediaType`
fn resolve_media_type(header: Option<&str>, raw: &[u8]) -> String {
    match header {
        Some(value) if value != "application/json" && !value.is_empty() => value.to_string(),
        _ => serde_json::from_slice::<ManifestHeader>(raw)
            .ok()
            .and_then(|h| h.media_type)
            .unwrap_or_default(),
    }
}

/// Parse a `WWW-Authenticate` header value
pub fn parse_challenge(header: &str) -> Option<AuthChallenge> {
    let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(AuthChallenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    for (key, value) in challenge_params(params) {
        match key.as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            _ => {}
        }
    }
    realm.map(|realm| AuthChallenge::Bearer { realm, service })
}

/// Split `k="v",k2="v2"` pairs, honouring commas inside quotes
fn challenge_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in params.chars().chain(std::iter::once(',')) {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                if let Some((k, v)) = current.split_once('=') {
                    pairs.push((k.trim().to_ascii_lowercase(), v.trim().to_string()));
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    pairs
}
