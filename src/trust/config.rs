//! Trust configuration shared by the system and per-namespace verifiers

use std::time::Duration;

use url::Url;

use crate::trust::error::{TrustError, TrustResult};
use crate::trust::image::repository_of;

/// Request timeout used when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one trust verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    /// Trust server base URL; `None` means allow-list only
    pub trust_server_url: Option<Url>,
    /// Repository prefixes that bypass verification, in configured order
    pub allowed_registry_prefixes: Vec<String>,
    /// Upper bound for each outbound call
    pub request_timeout: Duration,
    /// When false, a match against the legacy config-blob digest is accepted with a warning
    pub strict: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trust_server_url: None,
            allowed_registry_prefixes: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            strict: true,
        }
    }
}

impl TrustConfig {
    pub fn with_server(url: Url) -> Self {
        Self {
            trust_server_url: Some(url),
            ..Default::default()
        }
    }

    /// Check whether the image's repository starts with an allowed prefix
    pub fn is_allowed(&self, image: &str) -> bool {
        let repository = repository_of(image);
        self.allowed_registry_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && repository.starts_with(prefix.as_str()))
    }
}

/// Parse a trust server URL; only absolute http(s) URLs are accepted
pub fn parse_server_url(raw: &str) -> TrustResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| TrustError::Configuration(format!("invalid trust server URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(TrustError::Configuration(format!(
            "trust server URL '{}' must be an absolute http or https URL",
            raw
        ))),
    }
}

/// Split a comma separated list of prefixes, dropping blanks and duplicates
pub fn parse_prefix_list(raw: &str) -> Vec<String> {
    let mut prefixes: Vec<String> = Vec::new();
    for prefix in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !prefixes.iter().any(|p| p == prefix) {
            prefixes.push(prefix.to_string());
        }
    }
    prefixes
}

/// Parse a duration string like "500ms", "30s", "2m", "1h" or bare seconds
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (num_str, unit_ms) = if let Some(n) = raw.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (raw, 1_000)
    };

    let value: u64 = num_str.trim().parse().ok()?;
    value.checked_mul(unit_ms).map(Duration::from_millis)
}

/// Parse a boolean flag ("true"/"false", case-insensitive)
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
