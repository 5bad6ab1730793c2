//! Tiered resolution of regional service endpoints.
//!
//! Each [`EndpointIdentity`] is resolved through a fixed chain of sources, stopping at the
//! first value the [`AcceptancePolicy`] accepts:
//!
//! 1. the value cached by the provider from an earlier resolution,
//! 2. the `cloud-conf` document captured at construction,
//! 3. the legacy `slclient.toml` document, read from the cluster on every call,
//! 4. the region template, when the region is known.
//!
//! An empty value never resolves; it fails the tier that produced it.

mod probe;

pub use probe::ReachabilityProber;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cluster::ClusterClient;
use crate::config::{utf8_document, ConfigError, LegacyConfig, RegionConfig};
use crate::constants::{SECRET_STORE_FILE, STORAGE_SECRET_STORE_SECRET};
use crate::prelude::{debug, error, info, warn};

/// The four regional endpoints a provider can resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointIdentity {
    /// Public VPC infrastructure API.
    Riaas,
    /// Private VPC infrastructure API.
    PrivateRiaas,
    /// Public container service API.
    ContainerApiRoute,
    /// Private container service API.
    PrivateContainerApiRoute,
}

impl EndpointIdentity {
    /// All identities, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Riaas,
        Self::PrivateRiaas,
        Self::ContainerApiRoute,
        Self::PrivateContainerApiRoute,
    ];

    /// URL template with a literal `region` placeholder.
    pub const fn template(self) -> &'static str {
        match self {
            Self::Riaas => "https://region.iaas.cloud.ibm.com",
            Self::PrivateRiaas => "https://region.private.iaas.cloud.ibm.com",
            Self::ContainerApiRoute => "https://region.containers.cloud.ibm.com",
            Self::PrivateContainerApiRoute => "https://private.region.containers.cloud.ibm.com",
        }
    }

    /// Substitutes `region` for the first `region` placeholder of the template.
    pub fn construct(self, region: &str) -> String {
        self.template().replacen("region", region, 1)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Riaas => "riaas",
            Self::PrivateRiaas => "private-riaas",
            Self::ContainerApiRoute => "container-api-route",
            Self::PrivateContainerApiRoute => "private-container-api-route",
        }
    }
}

impl fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source that produced a resolved endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointTier {
    /// Value cached by the provider.
    Cache,
    /// `cloud-conf` document.
    CloudConf,
    /// Legacy `slclient.toml` document.
    LegacyConfig,
    /// Region template.
    RegionTemplate,
}

impl fmt::Display for EndpointTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::CloudConf => "cloud-conf",
            Self::LegacyConfig => "legacy-config",
            Self::RegionTemplate => "region-template",
        })
    }
}

/// A non-empty endpoint together with the tier it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    identity: EndpointIdentity,
    value: String,
    tier: EndpointTier,
}

impl ResolvedEndpoint {
    fn new(identity: EndpointIdentity, value: impl Into<String>, tier: EndpointTier) -> Self {
        Self {
            identity,
            value: value.into(),
            tier,
        }
    }

    /// Identity that was resolved.
    pub const fn identity(&self) -> EndpointIdentity {
        self.identity
    }

    /// Endpoint URL.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Tier that produced the value.
    pub const fn tier(&self) -> EndpointTier {
        self.tier
    }

    /// Consumes the resolution, returning the URL.
    pub fn into_value(self) -> String {
        self.value
    }
}

/// How endpoint candidates are validated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptancePolicy {
    /// Non-empty and answering an HTTP `GET`.
    #[default]
    Reachability,
    /// Non-empty; no network access.
    NonEmpty,
}

/// Errors produced by endpoint resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// A source held an empty value for the identity.
    #[error("{0} endpoint not found")]
    Empty(EndpointIdentity),

    /// The candidate did not answer the reachability probe.
    #[error("endpoint {url} is unreachable")]
    Unreachable {
        /// Candidate URL.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The legacy configuration could not be read or decoded.
    #[error("unable to read legacy configuration")]
    LegacyConfig(#[source] ConfigError),

    /// Every tier failed; `source` is the failure of the last tier tried.
    #[error("unable to fetch {identity} endpoint")]
    Fetch {
        /// Identity being resolved.
        identity: EndpointIdentity,
        /// Last tier failure.
        #[source]
        source: Box<ResolveError>,
    },
}

/// Resolves endpoint identities against one cluster and region configuration.
#[derive(Debug)]
pub struct EndpointResolver<C> {
    cluster: Arc<C>,
    region: RegionConfig,
    policy: AcceptancePolicy,
    prober: ReachabilityProber,
}

impl<C: ClusterClient> EndpointResolver<C> {
    /// Creates a resolver.
    pub fn new(
        cluster: Arc<C>,
        region: RegionConfig,
        policy: AcceptancePolicy,
        prober: ReachabilityProber,
    ) -> Self {
        Self {
            cluster,
            region,
            policy,
            prober,
        }
    }

    /// Region configuration captured at construction.
    pub fn region_config(&self) -> &RegionConfig {
        &self.region
    }

    /// Resolves `identity`, trying `cached` first.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Fetch`] carrying the last tier failure when no tier yields an
    /// acceptable value.
    pub async fn resolve(
        &self,
        identity: EndpointIdentity,
        cached: Option<&str>,
    ) -> Result<ResolvedEndpoint, ResolveError> {
        if let Some(value) = cached.filter(|value| !value.is_empty()) {
            match self.accept(identity, value).await {
                Ok(()) => return Ok(ResolvedEndpoint::new(identity, value, EndpointTier::Cache)),
                Err(e) => debug!("cached endpoint rejected: identity={identity}, error={e}"),
            }
        }

        if let Some(value) = self.region.endpoint(identity) {
            match self.accept(identity, value).await {
                Ok(()) => {
                    info!("endpoint fetched from cloud-conf: identity={identity}, endpoint={value}");
                    return Ok(ResolvedEndpoint::new(identity, value, EndpointTier::CloudConf));
                }
                Err(e) => warn!("cloud-conf endpoint rejected: identity={identity}, error={e}"),
            }
        }

        let mut last_failure = match self.legacy_endpoint(identity).await {
            Ok(value) => match self.accept(identity, &value).await {
                Ok(()) => {
                    info!("endpoint fetched from {STORAGE_SECRET_STORE_SECRET}: identity={identity}, endpoint={value}");
                    return Ok(ResolvedEndpoint::new(identity, value, EndpointTier::LegacyConfig));
                }
                Err(e) => e,
            },
            Err(e) => e,
        };
        warn!("legacy endpoint rejected: identity={identity}, error={last_failure}");

        if let Some(region) = self.region.region() {
            let value = identity.construct(region);
            match self.accept(identity, &value).await {
                Ok(()) => {
                    info!("endpoint constructed from region: identity={identity}, endpoint={value}");
                    return Ok(ResolvedEndpoint::new(identity, value, EndpointTier::RegionTemplate));
                }
                Err(e) => last_failure = e,
            }
        }

        error!("unable to fetch endpoint: identity={identity}, error={last_failure}");
        Err(ResolveError::Fetch {
            identity,
            source: Box::new(last_failure),
        })
    }

    async fn legacy_endpoint(&self, identity: EndpointIdentity) -> Result<String, ResolveError> {
        let bytes = self
            .cluster
            .secret_value(STORAGE_SECRET_STORE_SECRET, SECRET_STORE_FILE)
            .await
            .map_err(|source| {
                ResolveError::LegacyConfig(ConfigError::Cluster {
                    document: SECRET_STORE_FILE,
                    source,
                })
            })?;
        let config = utf8_document(bytes, SECRET_STORE_FILE)
            .and_then(|data| LegacyConfig::parse(&data))
            .map_err(ResolveError::LegacyConfig)?;

        Ok(config.endpoint(identity).to_owned())
    }

    async fn accept(&self, identity: EndpointIdentity, value: &str) -> Result<(), ResolveError> {
        if value.is_empty() {
            return Err(ResolveError::Empty(identity));
        }

        match self.policy {
            AcceptancePolicy::NonEmpty => Ok(()),
            AcceptancePolicy::Reachability => {
                self.prober
                    .probe(value)
                    .await
                    .map_err(|source| ResolveError::Unreachable {
                        url: value.to_owned(),
                        source,
                    })
            }
        }
    }
}
