use serde::Deserialize;

use super::{utf8_document, ConfigError, LegacyConfig};
use crate::cluster::{ClusterClient, ClusterError};
use crate::constants::{
    CLOUD_CONF_CONFIGMAP, CLOUD_CONF_FILE, CLUSTER_CONFIG_FILE, CLUSTER_INFO_CONFIGMAP,
    SECRET_STORE_FILE, STORAGE_SECRET_STORE_SECRET,
};
use crate::endpoint::EndpointIdentity;
use crate::prelude::{debug, info, warn};

/// The `cloud-conf.json` document stored in the `cloud-conf` config map.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CloudConf {
    /// Region of the cluster.
    pub region: String,
    /// Public RIAAS endpoint.
    pub riaas_endpoint: String,
    /// Private RIAAS endpoint.
    pub riaas_private_endpoint: String,
    /// Public container API route.
    pub containers_api_route: String,
    /// Private container API route.
    pub containers_api_route_private: String,
    /// Resource group of the cluster.
    pub resource_group_id: String,
    /// IAM endpoint used for token exchange.
    pub iam_endpoint: String,
}

impl CloudConf {
    /// Decodes the `cloud-conf.json` document.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(data).map_err(|source| ConfigError::Json {
            document: CLOUD_CONF_FILE,
            source,
        })
    }

    /// Field holding `identity` (may be empty).
    pub fn endpoint(&self, identity: EndpointIdentity) -> &str {
        match identity {
            EndpointIdentity::Riaas => &self.riaas_endpoint,
            EndpointIdentity::PrivateRiaas => &self.riaas_private_endpoint,
            EndpointIdentity::ContainerApiRoute => &self.containers_api_route,
            EndpointIdentity::PrivateContainerApiRoute => &self.containers_api_route_private,
        }
    }
}

/// The `cluster-config.json` document stored in the `cluster-info` config map.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterInfo {
    /// Cluster identifier.
    pub cluster_id: String,
    /// Owning account.
    pub account_id: String,
    /// Region of the cluster.
    pub region: String,
}

impl ClusterInfo {
    /// Decodes the `cluster-config.json` document.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(data).map_err(|source| ConfigError::Json {
            document: CLUSTER_CONFIG_FILE,
            source,
        })
    }
}

/// Region-scoped settings captured once when a provider is built.
///
/// `cloud-conf` is authoritative when present. Without it the region comes from
/// `cluster-info` and the resource group from `slclient.toml`; the per-identity endpoint
/// overrides are then empty, leaving endpoint resolution to the later tiers.
#[derive(Clone, Debug, Default)]
pub struct RegionConfig {
    region: Option<String>,
    resource_group_id: String,
    cloud_conf: Option<CloudConf>,
}

impl RegionConfig {
    /// Reads the region configuration from the cluster.
    ///
    /// Missing documents are tolerated; any other read or decode failure is returned.
    pub async fn load<C: ClusterClient>(cluster: &C) -> Result<Self, ConfigError> {
        let cloud_conf = match optional_document(
            cluster
                .config_map_value(CLOUD_CONF_CONFIGMAP, CLOUD_CONF_FILE)
                .await,
            CLOUD_CONF_FILE,
        )? {
            Some(data) => Some(CloudConf::parse(&data)?),
            None => {
                info!("cloud configuration not found, falling back to cluster-info and legacy configuration: configmap={CLOUD_CONF_CONFIGMAP}");
                None
            }
        };

        let mut region = cloud_conf
            .as_ref()
            .map(|conf| conf.region.clone())
            .filter(|region| !region.is_empty());
        if region.is_none() {
            region = load_cluster_region(cluster).await?;
        }

        let resource_group_id = match &cloud_conf {
            Some(conf) => conf.resource_group_id.clone(),
            None => load_legacy_resource_group(cluster).await?,
        };

        debug!(
            "region configuration loaded: region={}, cloud_conf={}",
            region.as_deref().unwrap_or("<unknown>"),
            cloud_conf.is_some()
        );

        Ok(Self {
            region,
            resource_group_id,
            cloud_conf,
        })
    }

    /// Builds a configuration from an already decoded `cloud-conf` document.
    pub fn from_cloud_conf(conf: CloudConf) -> Self {
        Self {
            region: Some(conf.region.clone()).filter(|region| !region.is_empty()),
            resource_group_id: conf.resource_group_id.clone(),
            cloud_conf: Some(conf),
        }
    }

    /// Builds a configuration that only knows the region.
    pub fn from_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Region of the cluster, if known.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Resource group of the cluster; empty when unknown.
    pub fn resource_group_id(&self) -> &str {
        &self.resource_group_id
    }

    /// `cloud-conf` override for `identity`; `None` without a `cloud-conf` document.
    pub fn endpoint(&self, identity: EndpointIdentity) -> Option<&str> {
        self.cloud_conf
            .as_ref()
            .map(|conf| conf.endpoint(identity))
    }

    /// IAM endpoint from `cloud-conf`, if set.
    pub fn token_exchange_url(&self) -> Option<&str> {
        self.cloud_conf
            .as_ref()
            .map(|conf| conf.iam_endpoint.as_str())
            .filter(|url| !url.is_empty())
    }
}

async fn load_cluster_region<C: ClusterClient>(cluster: &C) -> Result<Option<String>, ConfigError> {
    let result = cluster
        .config_map_value(CLUSTER_INFO_CONFIGMAP, CLUSTER_CONFIG_FILE)
        .await;
    let Some(data) = optional_document(result, CLUSTER_CONFIG_FILE)? else {
        warn!("cluster info not found, region is unknown: configmap={CLUSTER_INFO_CONFIGMAP}");
        return Ok(None);
    };

    let info = ClusterInfo::parse(&data)?;
    Ok(Some(info.region).filter(|region| !region.is_empty()))
}

async fn load_legacy_resource_group<C: ClusterClient>(cluster: &C) -> Result<String, ConfigError> {
    let result = cluster
        .secret_value(STORAGE_SECRET_STORE_SECRET, SECRET_STORE_FILE)
        .await
        .map(|bytes| utf8_document(bytes, SECRET_STORE_FILE));
    let data = match result {
        Ok(data) => data?,
        Err(e) if e.is_not_found() => {
            warn!("legacy configuration not found, resource group is unknown: secret={STORAGE_SECRET_STORE_SECRET}");
            return Ok(String::new());
        }
        Err(source) => {
            return Err(ConfigError::Cluster {
                document: SECRET_STORE_FILE,
                source,
            })
        }
    };

    Ok(LegacyConfig::parse(&data)?.vpc.g2_resource_group_id)
}

fn optional_document(
    result: Result<String, ClusterError>,
    document: &'static str,
) -> Result<Option<String>, ConfigError> {
    match result {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(source) => Err(ConfigError::Cluster { document, source }),
    }
}
