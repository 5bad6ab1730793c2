use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use super::{AuthError, AuthStrategy};
use crate::cluster::{ClusterClient, ClusterError};
use crate::config::{utf8_document, CredentialEnv, LegacyConfig};
use crate::constants::{
    CLOUD_PROVIDER_ENV, IBMCLOUD_CREDENTIALS_SECRET, SECRET_STORE_FILE,
    STORAGE_SECRET_STORE_SECRET,
};
use crate::prelude::{debug, info};

const IAM_AUTH_TYPE: &str = "iam";
const POD_IDENTITY_AUTH_TYPE: &str = "pod-identity";

/// Legacy configuration section holding the credential.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProviderFamily {
    /// `[VPC]` section.
    #[default]
    Vpc,
    /// `[Bluemix]` section.
    Bluemix,
    /// `[Softlayer]` section.
    Softlayer,
}

impl ProviderFamily {
    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Bluemix => "bluemix",
            Self::Softlayer => "softlayer",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vpc" => Ok(Self::Vpc),
            "bluemix" => Ok(Self::Bluemix),
            "softlayer" => Ok(Self::Softlayer),
            other => Err(other.to_owned()),
        }
    }
}

/// Where the default credential is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    /// `ibm-credentials.env`, else the given section of `slclient.toml`.
    Family(ProviderFamily),
    /// A caller-named key holding the API key itself.
    SecretKey(&'a str),
}

/// The default credential of a provider.
///
/// Its strategy is fixed when it is loaded and applies to every token the provider issues.
#[derive(Clone)]
pub struct Credential {
    secret_name: &'static str,
    strategy: AuthStrategy,
    material: Zeroizing<String>,
    token_exchange_url: Option<String>,
}

impl Credential {
    /// Reads the credential from the cluster.
    ///
    /// With `satellite` set, credentials read from a caller-named key are base64 encoded and
    /// decoded here.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DecryptionNotSupported`] when the credential is marked encrypted,
    /// and other [`AuthError`] variants when it is absent or malformed.
    pub async fn load<C: ClusterClient>(
        cluster: &C,
        source: CredentialSource<'_>,
        satellite: bool,
    ) -> Result<Self, AuthError> {
        let credential = match source {
            CredentialSource::SecretKey(key) => load_secret_key(cluster, key, satellite).await?,
            CredentialSource::Family(family) => {
                match cluster
                    .secret_value(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV)
                    .await
                {
                    Ok(bytes) => {
                        let data = utf8_document(bytes, CLOUD_PROVIDER_ENV)?;
                        from_env_document(&CredentialEnv::parse(&data))?
                    }
                    Err(e) if e.is_not_found() => {
                        debug!("{IBMCLOUD_CREDENTIALS_SECRET} not found, reading {STORAGE_SECRET_STORE_SECRET}: provider_type={family}");
                        load_legacy(cluster, family).await?
                    }
                    Err(source) => return Err(cluster_error(IBMCLOUD_CREDENTIALS_SECRET, source)),
                }
            }
        };

        info!(
            "credential loaded: secret_name={}, strategy={:?}",
            credential.secret_name, credential.strategy
        );
        Ok(credential)
    }

    /// Builds a credential from already known parts.
    pub fn new(
        strategy: AuthStrategy,
        material: impl Into<String>,
        token_exchange_url: Option<String>,
    ) -> Self {
        Self {
            secret_name: IBMCLOUD_CREDENTIALS_SECRET,
            strategy,
            material: Zeroizing::new(material.into()),
            token_exchange_url: token_exchange_url.filter(|url| !url.is_empty()),
        }
    }

    /// Strategy selected for the credential.
    pub const fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    /// API key or trusted profile id, depending on the strategy.
    pub fn material(&self) -> &str {
        &self.material
    }

    /// Exchange URL configured next to the credential.
    pub fn token_exchange_url(&self) -> Option<&str> {
        self.token_exchange_url.as_deref()
    }

    /// Secret the credential was read from.
    pub const fn secret_name(&self) -> &'static str {
        self.secret_name
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret_name", &self.secret_name)
            .field("strategy", &self.strategy)
            .field("material", &"<redacted>")
            .field("token_exchange_url", &self.token_exchange_url)
            .finish()
    }
}

fn from_env_document(env: &CredentialEnv) -> Result<Credential, AuthError> {
    if env.encrypted() {
        return Err(AuthError::DecryptionNotSupported);
    }

    let auth_type = env.get(CredentialEnv::AUTH_TYPE).unwrap_or(IAM_AUTH_TYPE);
    let (strategy, field) = match auth_type {
        IAM_AUTH_TYPE => (AuthStrategy::StaticKey, CredentialEnv::API_KEY),
        POD_IDENTITY_AUTH_TYPE => (AuthStrategy::WorkloadIdentity, CredentialEnv::PROFILE_ID),
        other => return Err(AuthError::UnsupportedAuthType(other.to_owned())),
    };
    let material = env.get(field).ok_or(AuthError::MissingField {
        document: CLOUD_PROVIDER_ENV,
        field,
    })?;

    Ok(Credential {
        secret_name: IBMCLOUD_CREDENTIALS_SECRET,
        strategy,
        material: Zeroizing::new(material.to_owned()),
        token_exchange_url: env.get(CredentialEnv::TOKEN_EXCHANGE_URL).map(str::to_owned),
    })
}

async fn load_legacy<C: ClusterClient>(
    cluster: &C,
    family: ProviderFamily,
) -> Result<Credential, AuthError> {
    let bytes = cluster
        .secret_value(STORAGE_SECRET_STORE_SECRET, SECRET_STORE_FILE)
        .await
        .map_err(|source| cluster_error(STORAGE_SECRET_STORE_SECRET, source))?;
    let config = LegacyConfig::parse(&utf8_document(bytes, SECRET_STORE_FILE)?)?;

    let (encrypted, api_key, field, exchange_url) = match family {
        ProviderFamily::Vpc => (
            config.vpc.encryption,
            config.vpc.g2_api_key,
            "g2_api_key",
            config.vpc.g2_token_exchange_url,
        ),
        ProviderFamily::Bluemix => (
            config.bluemix.encryption,
            config.bluemix.iam_api_key,
            "iam_api_key",
            config.bluemix.iam_url,
        ),
        ProviderFamily::Softlayer => {
            let softlayer = config.softlayer;
            let exchange_url = if softlayer.softlayer_token_exchange_url.is_empty() {
                softlayer.softlayer_iam_endpoint
            } else {
                softlayer.softlayer_token_exchange_url
            };
            (
                softlayer.encryption,
                softlayer.softlayer_api_key,
                "softlayer_api_key",
                exchange_url,
            )
        }
    };

    if encrypted {
        return Err(AuthError::DecryptionNotSupported);
    }
    if api_key.is_empty() {
        return Err(AuthError::MissingField {
            document: SECRET_STORE_FILE,
            field,
        });
    }

    Ok(Credential {
        secret_name: STORAGE_SECRET_STORE_SECRET,
        strategy: AuthStrategy::StaticKey,
        material: Zeroizing::new(api_key),
        token_exchange_url: Some(exchange_url).filter(|url| !url.is_empty()),
    })
}

async fn load_secret_key<C: ClusterClient>(
    cluster: &C,
    key: &str,
    satellite: bool,
) -> Result<Credential, AuthError> {
    let (secret_name, raw) = match cluster.secret_value(IBMCLOUD_CREDENTIALS_SECRET, key).await {
        Ok(raw) => (IBMCLOUD_CREDENTIALS_SECRET, raw),
        Err(e) if e.is_not_found() => {
            let raw = cluster
                .secret_value(STORAGE_SECRET_STORE_SECRET, key)
                .await
                .map_err(|source| cluster_error(STORAGE_SECRET_STORE_SECRET, source))?;
            (STORAGE_SECRET_STORE_SECRET, raw)
        }
        Err(source) => return Err(cluster_error(IBMCLOUD_CREDENTIALS_SECRET, source)),
    };
    let raw = Zeroizing::new(raw);

    let material = if satellite {
        let decoded = Zeroizing::new(STANDARD.decode(raw.as_slice()).map_err(|source| {
            AuthError::SecretDecode {
                key: key.to_owned(),
                source,
            }
        })?);
        let text = std::str::from_utf8(&decoded).map_err(|_| AuthError::SecretNotUtf8 {
            key: key.to_owned(),
        })?;
        text.trim_end_matches(['\n', '\r']).to_owned()
    } else {
        std::str::from_utf8(&raw)
            .map_err(|_| AuthError::SecretNotUtf8 {
                key: key.to_owned(),
            })?
            .to_owned()
    };

    Ok(Credential {
        secret_name,
        strategy: AuthStrategy::Default,
        material: Zeroizing::new(material),
        token_exchange_url: None,
    })
}

fn cluster_error(secret: &'static str, source: ClusterError) -> AuthError {
    AuthError::Cluster { secret, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;

    fn with_env(document: &str) -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV, document);
        cluster
    }

    async fn load(
        cluster: &InMemoryCluster,
        source: CredentialSource<'_>,
    ) -> Result<Credential, AuthError> {
        Credential::load(cluster, source, false).await
    }

    #[tokio::test]
    async fn iam_auth_type_selects_the_static_key() {
        let cluster = with_env(
            "IBMCLOUD_AUTHTYPE=iam\nIBMCLOUD_APIKEY=key-1\nIBMCLOUD_TOKEN_EXCHANGE_URL=https://private.iam.cloud.ibm.com\n",
        );

        let credential = load(&cluster, CredentialSource::Family(ProviderFamily::Vpc))
            .await
            .unwrap();

        assert_eq!(credential.strategy(), AuthStrategy::StaticKey);
        assert_eq!(credential.material(), "key-1");
        assert_eq!(
            credential.token_exchange_url(),
            Some("https://private.iam.cloud.ibm.com")
        );
        assert_eq!(cluster.reads(STORAGE_SECRET_STORE_SECRET), 0);
    }

    #[tokio::test]
    async fn pod_identity_auth_type_selects_workload_identity() {
        let cluster = with_env("IBMCLOUD_AUTHTYPE=pod-identity\nIBMCLOUD_PROFILEID=Profile-9\n");

        let credential = load(&cluster, CredentialSource::Family(ProviderFamily::Vpc))
            .await
            .unwrap();

        assert_eq!(credential.strategy(), AuthStrategy::WorkloadIdentity);
        assert_eq!(credential.material(), "Profile-9");
        assert_eq!(credential.token_exchange_url(), None);
    }

    #[tokio::test]
    async fn encrypted_env_document_is_refused() {
        let cluster =
            with_env("IBMCLOUD_AUTHTYPE=iam\nIBMCLOUD_APIKEY=abc\nIBMCLOUD_ENCRYPTION=true\n");

        let err = load(&cluster, CredentialSource::Family(ProviderFamily::Vpc))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DecryptionNotSupported));
    }

    #[tokio::test]
    async fn unknown_auth_type_is_refused() {
        let cluster = with_env("IBMCLOUD_AUTHTYPE=oauth\n");

        let err = load(&cluster, CredentialSource::Family(ProviderFamily::Vpc))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedAuthType(ref t) if t == "oauth"));
    }

    #[tokio::test]
    async fn legacy_section_follows_the_provider_family() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(
            STORAGE_SECRET_STORE_SECRET,
            SECRET_STORE_FILE,
            r#"
[Bluemix]
iam_url = "https://iam.bluemix.net"
iam_api_key = "bluemix-key"

[Softlayer]
softlayer_api_key = "softlayer-key"
softlayer_iam_endpoint_url = "https://iam.softlayer.example"

[VPC]
g2_api_key = "vpc-key"
"#,
        );

        let vpc = load(&cluster, CredentialSource::Family(ProviderFamily::Vpc))
            .await
            .unwrap();
        assert_eq!(vpc.material(), "vpc-key");
        assert_eq!(vpc.token_exchange_url(), None);
        assert_eq!(vpc.secret_name(), STORAGE_SECRET_STORE_SECRET);

        let bluemix = load(&cluster, CredentialSource::Family(ProviderFamily::Bluemix))
            .await
            .unwrap();
        assert_eq!(bluemix.material(), "bluemix-key");
        assert_eq!(bluemix.token_exchange_url(), Some("https://iam.bluemix.net"));

        let softlayer = load(&cluster, CredentialSource::Family(ProviderFamily::Softlayer))
            .await
            .unwrap();
        assert_eq!(softlayer.material(), "softlayer-key");
        assert_eq!(
            softlayer.token_exchange_url(),
            Some("https://iam.softlayer.example")
        );
    }

    #[tokio::test]
    async fn encrypted_legacy_section_is_refused() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(
            STORAGE_SECRET_STORE_SECRET,
            SECRET_STORE_FILE,
            "[Softlayer]\nsoftlayer_api_key = \"k\"\nsoftlayer_encryption = true\n",
        );

        let err = load(&cluster, CredentialSource::Family(ProviderFamily::Softlayer))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DecryptionNotSupported));
    }

    #[tokio::test]
    async fn secret_key_falls_back_to_the_secret_store() {
        let cluster = with_env("IBMCLOUD_AUTHTYPE=iam\n");
        cluster.put_secret(STORAGE_SECRET_STORE_SECRET, "custom-key", "raw-api-key");

        let credential = load(&cluster, CredentialSource::SecretKey("custom-key"))
            .await
            .unwrap();

        assert_eq!(credential.strategy(), AuthStrategy::Default);
        assert_eq!(credential.material(), "raw-api-key");
        assert_eq!(credential.secret_name(), STORAGE_SECRET_STORE_SECRET);
    }

    #[tokio::test]
    async fn satellite_secret_key_is_base64_decoded() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, "custom-key", STANDARD.encode("api-key\n"));

        let credential = Credential::load(&cluster, CredentialSource::SecretKey("custom-key"), true)
            .await
            .unwrap();
        assert_eq!(credential.material(), "api-key");
    }

    #[tokio::test]
    async fn satellite_secret_key_must_be_valid_base64() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, "custom-key", "not base64!");

        let err = Credential::load(&cluster, CredentialSource::SecretKey("custom-key"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SecretDecode { .. }));
    }

    #[test]
    fn provider_family_parses_known_names_only() {
        assert_eq!("softlayer".parse::<ProviderFamily>(), Ok(ProviderFamily::Softlayer));
        assert_eq!("VPC".parse::<ProviderFamily>(), Err("VPC".to_owned()));
    }
}
