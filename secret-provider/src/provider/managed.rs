use std::sync::Arc;
use std::time::Duration;

use super::{http_client, Endpoints, SecretProvider};
use crate::auth::{AuthStrategy, IamToken, TokenCacheEntry};
use crate::cluster::ClusterClient;
use crate::config::{ProviderConfig, RegionConfig};
use crate::constants::MANAGED_PROVIDER_TYPE;
use crate::endpoint::EndpointIdentity;
use crate::error::SecretProviderError;
use crate::prelude::{error, info};
use crate::sidecar::{SecretWatcher, SidecarBridge};

/// Provider delegating token issuance to the secret sidecar.
///
/// The default token is cached locally and only refreshed when it nears expiry, when the
/// caller asks for a fresh one, or after the watcher saw the credential secret change. In the
/// latter case the sidecar is asked to re-read the secret.
#[derive(Debug)]
pub struct ManagedSecretProvider<C> {
    bridge: SidecarBridge,
    watcher: SecretWatcher,
    cache: Option<TokenCacheEntry>,
    expiry_margin: Duration,
    endpoints: Endpoints<C>,
}

impl<C: ClusterClient> ManagedSecretProvider<C> {
    /// Checks that the sidecar can be dialled, starts the watcher and loads the region
    /// configuration.
    ///
    /// # Errors
    ///
    /// Fails when the sidecar cannot be dialled within the dial timeout, when neither
    /// credential secret can be watched, or when the region configuration cannot be read.
    pub async fn new(config: &ProviderConfig, cluster: C) -> Result<Self, SecretProviderError> {
        let bridge = SidecarBridge::new(config.sidecar_endpoint(), config.call_timeout());
        info!(
            "initializing managed secret provider, checking connection to secret sidecar: endpoint={}",
            bridge.endpoint().display()
        );
        bridge
            .check_connection(config.dial_timeout())
            .await
            .inspect_err(|e| {
                error!("error establishing grpc connection to secret sidecar: error={e}");
            })?;

        let cluster = Arc::new(cluster);
        let watcher = SecretWatcher::spawn(Arc::clone(&cluster))
            .await
            .map_err(SecretProviderError::WatcherInit)?;
        let region = RegionConfig::load(&*cluster).await?;
        let endpoints = Endpoints::new(cluster, region, config, http_client(config)?);

        info!("initialized managed secret provider");
        Ok(Self {
            bridge,
            watcher,
            cache: None,
            expiry_margin: config.token_expiry_margin(),
            endpoints,
        })
    }

    /// Watcher tracking the credential secret.
    pub fn watcher(&self) -> &SecretWatcher {
        &self.watcher
    }
}

impl<C: ClusterClient> SecretProvider for ManagedSecretProvider<C> {
    async fn get_default_iam_token(
        &mut self,
        fresh: bool,
    ) -> Result<IamToken, SecretProviderError> {
        info!("fetching IAM token for default secret");
        let state = Arc::clone(self.watcher.state());
        let dirty = state.take_dirty();

        if !dirty && !fresh {
            if let Some(token) = self
                .cache
                .as_ref()
                .and_then(|entry| entry.current(self.expiry_margin))
            {
                return Ok(token);
            }
        }

        let token = match self.bridge.fetch_default_token(true, dirty).await {
            Ok(token) => token,
            Err(e) => {
                if dirty {
                    state.mark_dirty();
                }
                error!("error fetching IAM token: error={e}");
                return Err(e.into());
            }
        };

        info!("successfully fetched IAM token for default secret");
        self.cache = Some(TokenCacheEntry::new(token.clone(), AuthStrategy::Default));
        Ok(token)
    }

    async fn get_iam_token(
        &mut self,
        secret: &str,
        fresh: bool,
    ) -> Result<IamToken, SecretProviderError> {
        info!("fetching IAM token for the provided secret");
        self.bridge
            .fetch_token_for_secret(secret, fresh)
            .await
            .inspect_err(|e| error!("error fetching IAM token: error={e}"))
            .map_err(Into::into)
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
        MANAGED_PROVIDER_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::constants::{
        CLOUD_CONF_CONFIGMAP, CLOUD_CONF_FILE, CLOUD_PROVIDER_ENV, IBMCLOUD_CREDENTIALS_SECRET,
    };
    use crate::endpoint::AcceptancePolicy;
    use crate::sidecar::testing::FakeSidecar;
    use crate::sidecar::SidecarError;

    fn config(sidecar: &FakeSidecar) -> ProviderConfig {
        ProviderConfig::builder()
            .managed(true)
            .sidecar_endpoint(sidecar.path())
            .dial_timeout(Duration::from_secs(5))
            .call_timeout(Duration::from_secs(5))
            .acceptance(AcceptancePolicy::NonEmpty)
            .build()
    }

    fn cluster() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(
            IBMCLOUD_CREDENTIALS_SECRET,
            CLOUD_PROVIDER_ENV,
            "IBMCLOUD_AUTHTYPE=iam\nIBMCLOUD_APIKEY=key\n",
        );
        cluster.put_config_map(
            CLOUD_CONF_CONFIGMAP,
            CLOUD_CONF_FILE,
            serde_json::json!({
                "region": "eu-gb",
                "resource_group_id": "rg-managed",
                "riaas_endpoint": "https://eu-gb.iaas.cloud.ibm.com",
            })
            .to_string(),
        );
        cluster
    }

    async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    #[tokio::test]
    async fn construction_fails_without_a_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProviderConfig::builder()
            .managed(true)
            .sidecar_endpoint(dir.path().join("absent.sock"))
            .dial_timeout(Duration::from_secs(1))
            .build();
        let cluster = cluster();

        let err = ManagedSecretProvider::new(&config, cluster.clone())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SecretProviderError::Sidecar(SidecarError::Connect { .. })
        ));
        assert_eq!(cluster.open_watches(IBMCLOUD_CREDENTIALS_SECRET), 0);
    }

    #[tokio::test]
    async fn construction_fails_when_no_secret_can_be_watched() {
        let sidecar = FakeSidecar::start().await;

        let err = ManagedSecretProvider::new(&config(&sidecar), InMemoryCluster::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SecretProviderError::WatcherInit(_)));
    }

    #[tokio::test]
    async fn cached_default_token_skips_the_sidecar() {
        let sidecar = FakeSidecar::start().await;
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster())
            .await
            .unwrap();

        let first = provider.get_default_iam_token(false).await.unwrap();
        let second = provider.get_default_iam_token(false).await.unwrap();

        assert_eq!(first.token(), "default-token-1");
        assert_eq!(second.token(), "default-token-1");
        assert_eq!(sidecar.default_calls(), 1);
        let request = sidecar.last_default_request().unwrap();
        assert!(request.is_fresh_token_required);
        assert!(!request.read_secret);
    }

    #[tokio::test]
    async fn fresh_request_always_reaches_the_sidecar() {
        let sidecar = FakeSidecar::start().await;
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster())
            .await
            .unwrap();

        provider.get_default_iam_token(false).await.unwrap();
        let token = provider.get_default_iam_token(true).await.unwrap();

        assert_eq!(token.token(), "default-token-2");
        assert_eq!(sidecar.default_calls(), 2);
    }

    #[tokio::test]
    async fn secret_change_forces_one_refresh_with_reread() {
        let sidecar = FakeSidecar::start().await;
        let cluster = cluster();
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster.clone())
            .await
            .unwrap();
        provider.get_default_iam_token(false).await.unwrap();

        cluster.put_secret(
            IBMCLOUD_CREDENTIALS_SECRET,
            CLOUD_PROVIDER_ENV,
            "IBMCLOUD_AUTHTYPE=iam\nIBMCLOUD_APIKEY=rotated\n",
        );
        let state = Arc::clone(provider.watcher().state());
        eventually("secret change noticed", || state.is_dirty()).await;

        let refreshed = provider.get_default_iam_token(false).await.unwrap();
        assert_eq!(refreshed.token(), "default-token-2");
        assert!(sidecar.last_default_request().unwrap().read_secret);
        assert!(!state.is_dirty(), "a successful refresh clears the flag");

        provider.get_default_iam_token(false).await.unwrap();
        assert_eq!(sidecar.default_calls(), 2);
    }

    #[tokio::test]
    async fn watch_resync_keeps_the_cached_token() {
        let sidecar = FakeSidecar::start().await;
        let cluster = cluster();
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster.clone())
            .await
            .unwrap();
        let state = Arc::clone(provider.watcher().state());
        eventually("watch established", || state.resource_version().is_some()).await;
        provider.get_default_iam_token(false).await.unwrap();

        cluster.close_watches(IBMCLOUD_CREDENTIALS_SECRET);
        eventually("watch resubscribed", || {
            cluster.subscriptions(IBMCLOUD_CREDENTIALS_SECRET) == 2
                && cluster.open_watches(IBMCLOUD_CREDENTIALS_SECRET) == 1
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = provider.get_default_iam_token(false).await.unwrap();
        assert_eq!(token.token(), "default-token-1");
        assert_eq!(sidecar.default_calls(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_change_pending() {
        let sidecar = FakeSidecar::start().await;
        let cluster = cluster();
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster.clone())
            .await
            .unwrap();

        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV, "rotated");
        let state = Arc::clone(provider.watcher().state());
        eventually("secret change noticed", || state.is_dirty()).await;

        sidecar.fail_with(tonic::Code::Internal);
        let err = provider.get_default_iam_token(false).await.unwrap_err();

        assert!(matches!(
            err,
            SecretProviderError::Sidecar(SidecarError::Status(_))
        ));
        assert!(state.is_dirty());
    }

    #[tokio::test]
    async fn named_secret_tokens_are_never_cached() {
        let sidecar = FakeSidecar::start().await;
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster())
            .await
            .unwrap();

        provider.get_iam_token("api-key", false).await.unwrap();
        let token = provider.get_iam_token("api-key", false).await.unwrap();

        assert_eq!(token.token(), "secret-token-api-key-2");
        assert_eq!(sidecar.secret_calls(), 2);
        assert_eq!(sidecar.default_calls(), 0);
    }

    #[tokio::test]
    async fn endpoints_and_resource_group_come_from_cloud_conf() {
        let sidecar = FakeSidecar::start().await;
        let mut provider = ManagedSecretProvider::new(&config(&sidecar), cluster())
            .await
            .unwrap();

        assert_eq!(provider.get_resource_group_id(), "rg-managed");
        assert_eq!(
            provider.get_riaas_endpoint().await.unwrap(),
            "https://eu-gb.iaas.cloud.ibm.com"
        );
        assert_eq!(provider.provider_type(), MANAGED_PROVIDER_TYPE);
    }
}
