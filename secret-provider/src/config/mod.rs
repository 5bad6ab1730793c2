//! Provider configuration and the configuration documents read from the cluster.
//!
//! [`ProviderConfig`] carries every process-wide knob (sidecar socket, timeouts, endpoint
//! acceptance policy). It is passed explicitly to the provider factory so that construction
//! stays reentrant and testable.
//!
//! The document types ([`CloudConf`], [`ClusterInfo`], [`LegacyConfig`], [`CredentialEnv`])
//! are plain `serde` models of the objects stored in the cluster.

mod cloud;
mod env_file;
mod legacy;

pub use cloud::{CloudConf, ClusterInfo, RegionConfig};
pub use env_file::CredentialEnv;
pub use legacy::{BluemixConfig, LegacyConfig, SoftlayerConfig, VpcConfig};

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_DIAL_TIMEOUT, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_SERVICE_ACCOUNT_TOKEN_FILE, DEFAULT_SIDECAR_ENDPOINT, DEFAULT_TOKEN_EXPIRY_MARGIN,
    MANAGED_MODE_ENV, SATELLITE_ENV,
};
use crate::cluster::ClusterError;
use crate::endpoint::AcceptancePolicy;

/// Errors produced while decoding a configuration document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A JSON document could not be decoded.
    #[error("unable to parse {document}")]
    Json {
        /// Name of the document.
        document: &'static str,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// A TOML document could not be decoded.
    #[error("unable to parse {document}")]
    Toml {
        /// Name of the document.
        document: &'static str,
        /// Decoder error.
        #[source]
        source: toml::de::Error,
    },

    /// A document was not valid UTF-8.
    #[error("{document} is not valid UTF-8")]
    Utf8 {
        /// Name of the document.
        document: &'static str,
    },

    /// A document could not be read from the cluster.
    #[error("unable to read {document}")]
    Cluster {
        /// Name of the document.
        document: &'static str,
        /// Cluster error.
        #[source]
        source: ClusterError,
    },
}

/// Process-wide provider configuration.
///
/// Use [`ProviderConfig::from_env`] for the environment-driven defaults, or
/// [`ProviderConfig::builder`] to set fields explicitly.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    managed: bool,
    satellite: bool,
    sidecar_endpoint: PathBuf,
    dial_timeout: Duration,
    call_timeout: Duration,
    acceptance: AcceptancePolicy,
    probe_timeout: Duration,
    namespace: Option<String>,
    service_account_token_path: PathBuf,
    token_expiry_margin: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            managed: false,
            satellite: false,
            sidecar_endpoint: PathBuf::from(DEFAULT_SIDECAR_ENDPOINT),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            acceptance: AcceptancePolicy::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            namespace: None,
            service_account_token_path: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_TOKEN_FILE),
            token_expiry_margin: DEFAULT_TOKEN_EXPIRY_MARGIN,
        }
    }
}

impl ProviderConfig {
    /// Builds the default configuration, taking the mode and the satellite marker from the
    /// environment (`IKS_ENABLED`, `IS_SATELLITE`).
    pub fn from_env() -> Self {
        Self::builder()
            .managed(env_flag(MANAGED_MODE_ENV))
            .satellite(env_flag(SATELLITE_ENV))
            .build()
    }

    /// Creates a builder starting from the defaults (unmanaged, not satellite).
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder {
            config: Self::default(),
        }
    }

    /// `true` when token issuance is delegated to the sidecar.
    pub const fn managed(&self) -> bool {
        self.managed
    }

    /// `true` for disconnected deployments.
    pub const fn satellite(&self) -> bool {
        self.satellite
    }

    /// Unix socket of the sidecar.
    pub fn sidecar_endpoint(&self) -> &Path {
        &self.sidecar_endpoint
    }

    /// Bound on the construction-time sidecar dial.
    pub const fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Bound on one sidecar round-trip.
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Endpoint acceptance policy.
    pub const fn acceptance(&self) -> AcceptancePolicy {
        self.acceptance
    }

    /// Bound on HTTP probes and token exchanges.
    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Explicit namespace, if configured.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Projected service account token used by compute-identity exchange.
    pub fn service_account_token_path(&self) -> &Path {
        &self.service_account_token_path
    }

    /// Safety margin subtracted from a cached token's lifetime.
    pub const fn token_expiry_margin(&self) -> Duration {
        self.token_expiry_margin
    }
}

/// Builder for [`ProviderConfig`].
#[derive(Clone, Debug)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Selects managed (`true`) or unmanaged (`false`) mode.
    #[must_use]
    pub fn managed(mut self, managed: bool) -> Self {
        self.config.managed = managed;
        self
    }

    /// Marks the deployment as satellite (base64-encoded custom secret keys).
    #[must_use]
    pub fn satellite(mut self, satellite: bool) -> Self {
        self.config.satellite = satellite;
        self
    }

    /// Overrides the sidecar socket path.
    #[must_use]
    pub fn sidecar_endpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sidecar_endpoint = path.into();
        self
    }

    /// Overrides the construction-time dial bound.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    /// Overrides the per-call sidecar deadline.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Selects the endpoint acceptance policy.
    #[must_use]
    pub fn acceptance(mut self, policy: AcceptancePolicy) -> Self {
        self.config.acceptance = policy;
        self
    }

    /// Overrides the HTTP probe / exchange timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Uses `namespace` instead of the service account namespace file.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = Some(namespace.into());
        self
    }

    /// Overrides the projected service account token path.
    #[must_use]
    pub fn service_account_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.service_account_token_path = path.into();
        self
    }

    /// Overrides the token expiry margin.
    #[must_use]
    pub fn token_expiry_margin(mut self, margin: Duration) -> Self {
        self.config.token_expiry_margin = margin;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> ProviderConfig {
        self.config
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub(crate) fn utf8_document(bytes: Vec<u8>, document: &'static str) -> Result<String, ConfigError> {
    String::from_utf8(bytes).map_err(|_| ConfigError::Utf8 { document })
}
