//! Process configuration read from the environment

use std::time::Duration;

use thiserror::Error;

use crate::controller::DEFAULT_RETRY_INTERVAL;
use crate::trust::config::{parse_duration, parse_flag, parse_prefix_list, parse_server_url};
use crate::trust::{TrustConfig, TrustError};

pub const TRUST_SERVER_URL: &str = "TRUST_SERVER_URL";
pub const TRUST_ALLOWED_REGISTRIES: &str = "TRUST_ALLOWED_REGISTRIES";
pub const TRUST_REQUEST_TIMEOUT: &str = "TRUST_REQUEST_TIMEOUT";
pub const TRUST_STRICT_MODE: &str = "TRUST_STRICT_MODE";
pub const VALIDATION_RETRY_INTERVAL: &str = "VALIDATION_RETRY_INTERVAL";
pub const ADMISSION_TIMEOUT: &str = "ADMISSION_TIMEOUT";
pub const WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";
pub const POD_NAME: &str = "POD_NAME";
pub const POD_NAMESPACE: &str = "POD_NAMESPACE";

/// Deadline for one admission request when none is configured
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Trust(#[from] TrustError),
}

/// Everything the operator reads from its environment at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Cluster-wide policy used by system-managed namespaces
    pub system_trust: TrustConfig,
    /// Re-validation interval while the trust service is unavailable
    pub retry_interval: Duration,
    pub admission_timeout: Duration,
    /// Restrict the pod watch to one namespace
    pub watch_namespace: Option<String>,
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let trust_server_url = get(TRUST_SERVER_URL)
            .map(|raw| parse_server_url(&raw))
            .transpose()?;
        let allowed_registry_prefixes = get(TRUST_ALLOWED_REGISTRIES)
            .map(|raw| parse_prefix_list(&raw))
            .unwrap_or_default();
        let request_timeout = duration_var(
            TRUST_REQUEST_TIMEOUT,
            get(TRUST_REQUEST_TIMEOUT),
            crate::trust::config::DEFAULT_REQUEST_TIMEOUT,
        )?;
        let strict = match get(TRUST_STRICT_MODE) {
            Some(raw) => parse_flag(&raw).ok_or_else(|| ConfigError::Invalid {
                name: TRUST_STRICT_MODE,
                reason: format!("expected true or false, got '{raw}'"),
            })?,
            None => true,
        };

        Ok(Self {
            system_trust: TrustConfig {
                trust_server_url,
                allowed_registry_prefixes,
                request_timeout,
                strict,
            },
            retry_interval: duration_var(
                VALIDATION_RETRY_INTERVAL,
                get(VALIDATION_RETRY_INTERVAL),
                DEFAULT_RETRY_INTERVAL,
            )?,
            admission_timeout: duration_var(
                ADMISSION_TIMEOUT,
                get(ADMISSION_TIMEOUT),
                DEFAULT_ADMISSION_TIMEOUT,
            )?,
            watch_namespace: get(WATCH_NAMESPACE),
            pod_name: get(POD_NAME),
            pod_namespace: get(POD_NAMESPACE),
        })
    }
}

fn duration_var(
    name: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => match parse_duration(&raw) {
            Some(d) if !d.is_zero() => Ok(d),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a positive duration, got '{raw}'"),
            }),
        },
    }
}
