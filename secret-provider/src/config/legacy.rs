use serde::Deserialize;

use super::ConfigError;
use crate::constants::SECRET_STORE_FILE;
use crate::endpoint::EndpointIdentity;

/// The `slclient.toml` document stored in the `storage-secret-store` secret.
///
/// Only the fields consumed by the provider are modelled; unknown keys are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LegacyConfig {
    /// Classic infrastructure / container service section.
    #[serde(rename = "Bluemix", default)]
    pub bluemix: BluemixConfig,

    /// Softlayer section.
    #[serde(rename = "Softlayer", default)]
    pub softlayer: SoftlayerConfig,

    /// VPC section.
    #[serde(rename = "VPC", default)]
    pub vpc: VpcConfig,
}

/// `[Bluemix]` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BluemixConfig {
    /// IAM endpoint used for API key exchange.
    #[serde(default)]
    pub iam_url: String,
    /// API key.
    #[serde(default)]
    pub iam_api_key: String,
    /// Public container API route.
    #[serde(rename = "containers_api_route", default)]
    pub api_endpoint_url: String,
    /// Private container API route.
    #[serde(rename = "containers_api_route_private", default)]
    pub private_api_route: String,
    /// `true` when `iam_api_key` is encrypted.
    #[serde(default)]
    pub encryption: bool,
}

/// `[Softlayer]` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SoftlayerConfig {
    /// API key.
    #[serde(default)]
    pub softlayer_api_key: String,
    /// IAM endpoint used for API key exchange.
    #[serde(rename = "softlayer_iam_endpoint_url", default)]
    pub softlayer_iam_endpoint: String,
    /// Token exchange endpoint, preferred over the IAM endpoint when set.
    #[serde(rename = "softlayer_token_exchange_endpoint_url", default)]
    pub softlayer_token_exchange_url: String,
    /// `true` when `softlayer_api_key` is encrypted.
    #[serde(rename = "softlayer_encryption", default)]
    pub encryption: bool,
}

/// `[VPC]` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VpcConfig {
    /// Public RIAAS endpoint.
    #[serde(rename = "g2_riaas_endpoint_url", default)]
    pub g2_endpoint_url: String,
    /// Private RIAAS endpoint.
    #[serde(rename = "g2_riaas_endpoint_private_url", default)]
    pub g2_endpoint_private_url: String,
    /// Resource group of the cluster.
    #[serde(rename = "g2_resource_group_id", default)]
    pub g2_resource_group_id: String,
    /// API key.
    #[serde(rename = "g2_api_key", default)]
    pub g2_api_key: String,
    /// Token exchange endpoint.
    #[serde(rename = "g2_token_exchange_endpoint_url", default)]
    pub g2_token_exchange_url: String,
    /// `true` when `g2_api_key` is encrypted.
    #[serde(default)]
    pub encryption: bool,
}

impl LegacyConfig {
    /// Decodes the `slclient.toml` document.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        toml::from_str(data).map_err(|source| ConfigError::Toml {
            document: SECRET_STORE_FILE,
            source,
        })
    }

    /// Field holding `identity` (may be empty).
    ///
    /// RIAAS endpoints live in the VPC section, container routes in the Bluemix section.
    pub fn endpoint(&self, identity: EndpointIdentity) -> &str {
        match identity {
            EndpointIdentity::Riaas => &self.vpc.g2_endpoint_url,
            EndpointIdentity::PrivateRiaas => &self.vpc.g2_endpoint_private_url,
            EndpointIdentity::ContainerApiRoute => &self.bluemix.api_endpoint_url,
            EndpointIdentity::PrivateContainerApiRoute => &self.bluemix.private_api_route,
        }
    }
}
