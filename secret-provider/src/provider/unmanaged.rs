use std::path::PathBuf;
use std::sync::Arc;

use super::{http_client, Endpoints, SecretProvider};
use crate::auth::{
    AuthStrategy, Authenticator, Credential, CredentialSource, IamToken, TokenExchange,
};
use crate::cluster::ClusterClient;
use crate::config::{ProviderConfig, RegionConfig};
use crate::constants::{DEFAULT_TOKEN_EXCHANGE_URL, UNMANAGED_PROVIDER_TYPE};
use crate::endpoint::EndpointIdentity;
use crate::error::SecretProviderError;
use crate::prelude::{error, info};

/// Provider exchanging its credential against IAM from within the process.
///
/// The exchange URL is taken from the credential document, then from `cloud-conf`'s
/// `iam_endpoint`, then defaults to the public IAM endpoint.
#[derive(Debug)]
pub struct UnmanagedSecretProvider<C> {
    authenticator: Authenticator,
    exchange: TokenExchange,
    token_path: PathBuf,
    endpoints: Endpoints<C>,
}

impl<C: ClusterClient> UnmanagedSecretProvider<C> {
    /// Loads the credential designated by `source`, then the region configuration.
    ///
    /// # Errors
    ///
    /// Fails when the credential is absent, malformed or encrypted, or when a configuration
    /// document cannot be decoded.
    pub async fn new(
        config: &ProviderConfig,
        cluster: C,
        source: CredentialSource<'_>,
    ) -> Result<Self, SecretProviderError> {
        info!("initializing unmanaged secret provider");
        let credential = Credential::load(&cluster, source, config.satellite())
            .await
            .inspect_err(|e| error!("error fetching secret: error={e}"))?;
        Self::with_credential(config, cluster, credential).await
    }

    /// Builds a provider around an already loaded credential.
    ///
    /// # Errors
    ///
    /// Fails when the region configuration cannot be decoded or the exchange URL is invalid.
    pub async fn with_credential(
        config: &ProviderConfig,
        cluster: C,
        credential: Credential,
    ) -> Result<Self, SecretProviderError> {
        let region = RegionConfig::load(&cluster).await?;
        let exchange_url = credential
            .token_exchange_url()
            .or_else(|| region.token_exchange_url())
            .unwrap_or(DEFAULT_TOKEN_EXCHANGE_URL);

        let http = http_client(config)?;
        let exchange = TokenExchange::new(http.clone(), exchange_url)?;
        let token_path = config.service_account_token_path().to_path_buf();
        let authenticator = Authenticator::for_strategy(
            credential.strategy(),
            credential.material(),
            token_path.clone(),
            exchange.clone(),
        )
        .with_expiry_margin(config.token_expiry_margin());

        info!(
            "initialized unmanaged secret provider: secret_name={}, strategy={:?}, token_url={}",
            credential.secret_name(),
            credential.strategy(),
            exchange.token_url()
        );
        Ok(Self {
            authenticator,
            exchange,
            token_path,
            endpoints: Endpoints::new(Arc::new(cluster), region, config, http),
        })
    }

    /// Strategy of the default credential, also used for caller-named secrets.
    pub const fn strategy(&self) -> AuthStrategy {
        self.authenticator.strategy()
    }
}

impl<C: ClusterClient> SecretProvider for UnmanagedSecretProvider<C> {
    async fn get_default_iam_token(
        &mut self,
        fresh: bool,
    ) -> Result<IamToken, SecretProviderError> {
        info!("fetching IAM token for default secret");
        let token = self
            .authenticator
            .token(fresh)
            .await
            .inspect_err(|e| error!("error fetching IAM token: error={e}"))?;
        Ok(token)
    }

    async fn get_iam_token(
        &mut self,
        secret: &str,
        _fresh: bool,
    ) -> Result<IamToken, SecretProviderError> {
        info!("fetching IAM token for the provided secret");
        let mut authenticator = Authenticator::for_strategy(
            self.strategy(),
            secret,
            self.token_path.clone(),
            self.exchange.clone(),
        );
        let token = authenticator
            .token(true)
            .await
            .inspect_err(|e| error!("error fetching IAM token: error={e}"))?;
        Ok(token)
    }

    async fn get_endpoint(
        &mut self,
        identity: EndpointIdentity,
    ) -> Result<String, SecretProviderError> {
        Ok(self.endpoints.get(identity).await?)
    }

    fn get_resource_group_id(&self) -> &str {
        self.endpoints.resource_group_id()
    }

    fn provider_type(&self) -> &'static str {
        UNMANAGED_PROVIDER_TYPE
    }
}
