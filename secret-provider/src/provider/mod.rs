//! The provider contract and the factory choosing its implementation.
//!
//! [`new_secret_provider`] validates the caller's [`Selector`]s before touching the cluster,
//! then builds either a [`ManagedSecretProvider`] (sidecar-issued tokens) or an
//! [`UnmanagedSecretProvider`] (in-process IAM exchange) depending on
//! [`ProviderConfig::managed`]. A [`Selector::SecretKey`] names a credential the sidecar
//! does not know about, so it always gets the in-process provider. Both are wrapped in
//! [`Provider`], which implements [`SecretProvider`].

mod managed;
mod unmanaged;

pub use managed::ManagedSecretProvider;
pub use unmanaged::UnmanagedSecretProvider;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::auth::{CredentialSource, IamToken, ProviderFamily};
use crate::cluster::{ClusterClient, KubeClusterClient};
use crate::config::{ProviderConfig, RegionConfig};
use crate::constants::{MANAGED_PROVIDER_TYPE, UNMANAGED_PROVIDER_TYPE};
use crate::endpoint::{EndpointIdentity, EndpointResolver, ReachabilityProber, ResolveError};
use crate::error::SecretProviderError;
use crate::prelude::{error, info};

/// Token and endpoint operations offered by every provider.
///
/// Calls take `&mut self`: a provider serves one caller at a time and updates its caches in
/// place.
pub trait SecretProvider: Send {
    /// Token of the provider's default credential.
    ///
    /// A cached token is returned unless `fresh` is set or it is close to expiry.
    fn get_default_iam_token(
        &mut self,
        fresh: bool,
    ) -> impl Future<Output = Result<IamToken, SecretProviderError>> + Send;

    /// Token for the API key (or, with workload identity, trusted profile) `secret`.
    ///
    /// These tokens are never cached.
    fn get_iam_token(
        &mut self,
        secret: &str,
        fresh: bool,
    ) -> impl Future<Output = Result<IamToken, SecretProviderError>> + Send;

    /// Resolves `identity` and caches the result.
    fn get_endpoint(
        &mut self,
        identity: EndpointIdentity,
    ) -> impl Future<Output = Result<String, SecretProviderError>> + Send;

    /// Public VPC infrastructure endpoint.
    fn get_riaas_endpoint(
        &mut self,
    ) -> impl Future<Output = Result<String, SecretProviderError>> + Send {
        self.get_endpoint(EndpointIdentity::Riaas)
    }

    /// Private VPC infrastructure endpoint.
    fn get_private_riaas_endpoint(
        &mut self,
    ) -> impl Future<Output = Result<String, SecretProviderError>> + Send {
        self.get_endpoint(EndpointIdentity::PrivateRiaas)
    }

    /// Public container service endpoint.
    fn get_container_api_route(
        &mut self,
    ) -> impl Future<Output = Result<String, SecretProviderError>> + Send {
        self.get_endpoint(EndpointIdentity::ContainerApiRoute)
    }

    /// Private container service endpoint.
    fn get_private_container_api_route(
        &mut self,
    ) -> impl Future<Output = Result<String, SecretProviderError>> + Send {
        self.get_endpoint(EndpointIdentity::PrivateContainerApiRoute)
    }

    /// Resource group of the cluster; empty when unknown.
    fn get_resource_group_id(&self) -> &str;

    /// `managed-secret-provider` or `unmanaged-secret-provider`.
    fn provider_type(&self) -> &'static str;
}

/// Optional construction argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Legacy configuration section to read the credential from.
    ProviderType(ProviderFamily),
    /// Key holding the API key, in `ibm-cloud-credentials` or `storage-secret-store`.
    SecretKey(String),
}

impl Selector {
    /// Key naming a [`Selector::ProviderType`].
    pub const PROVIDER_TYPE: &'static str = "ProviderType";
    /// Key naming a [`Selector::SecretKey`].
    pub const SECRET_KEY: &'static str = "SecretKey";

    /// Builds a selector from its key/value form.
    ///
    /// # Errors
    ///
    /// Returns [`SecretProviderError::InvalidArgument`] for an unknown key and
    /// [`SecretProviderError::InvalidProviderType`] for an unknown provider type.
    pub fn parse(key: &str, value: &str) -> Result<Self, SecretProviderError> {
        match key {
            Self::PROVIDER_TYPE => value
                .parse()
                .map(Self::ProviderType)
                .map_err(SecretProviderError::InvalidProviderType),
            Self::SECRET_KEY => Ok(Self::SecretKey(value.to_owned())),
            other => Err(SecretProviderError::InvalidArgument(other.to_owned())),
        }
    }
}

/// Checks the selectors and returns the credential source they designate.
///
/// # Errors
///
/// Fails when more than one selector is given or the secret key is empty.
pub fn validate_selectors(
    selectors: &[Selector],
) -> Result<CredentialSource<'_>, SecretProviderError> {
    match selectors {
        [] => Ok(CredentialSource::Family(ProviderFamily::default())),
        [Selector::ProviderType(family)] => Ok(CredentialSource::Family(*family)),
        [Selector::SecretKey(key)] if key.is_empty() => Err(SecretProviderError::EmptySecretKey),
        [Selector::SecretKey(key)] => Ok(CredentialSource::SecretKey(key)),
        _ => Err(SecretProviderError::MultipleSelectors),
    }
}

/// A provider of either kind.
#[derive(Debug)]
pub enum Provider<C: ClusterClient = KubeClusterClient> {
    /// Sidecar-backed provider.
    Managed(ManagedSecretProvider<C>),
    /// In-process provider.
    Unmanaged(UnmanagedSecretProvider<C>),
}

impl<C: ClusterClient> SecretProvider for Provider<C> {
    async fn get_default_iam_token(
        &mut self,
        fresh: bool,
    ) -> Result<IamToken, SecretProviderError> {
        match self {
            Self::Managed(provider) => provider.get_default_iam_token(fresh).await,
            Self::Unmanaged(provider) => provider.get_default_iam_token(fresh).await,
        }
    }

    async fn get_iam_token(
        &mut self,
        secret: &str,
        fresh: bool,
    ) -> Result<IamToken, SecretProviderError> {
        match self {
            Self::Managed(provider) => provider.get_iam_token(secret, fresh).await,
            Self::Unmanaged(provider) => provider.get_iam_token(secret, fresh).await,
        }
    }

    async fn get_endpoint(
        &mut self,
        identity: EndpointIdentity,
    ) -> Result<String, SecretProviderError> {
        match self {
            Self::Managed(provider) => provider.get_endpoint(identity).await,
            Self::Unmanaged(provider) => provider.get_endpoint(identity).await,
        }
    }

    fn get_resource_group_id(&self) -> &str {
        match self {
            Self::Managed(provider) => provider.get_resource_group_id(),
            Self::Unmanaged(provider) => provider.get_resource_group_id(),
        }
    }

    fn provider_type(&self) -> &'static str {
        match self {
            Self::Managed(provider) => provider.provider_type(),
            Self::Unmanaged(provider) => provider.provider_type(),
        }
    }
}

/// Builds a provider against the in-cluster Kubernetes API.
///
/// # Errors
///
/// Selector validation errors are returned before any I/O; any other failure while building
/// the provider is returned as is and never retried.
pub async fn new_secret_provider(
    config: &ProviderConfig,
    selectors: &[Selector],
) -> Result<Provider, SecretProviderError> {
    validate(config, selectors)?;
    let cluster = KubeClusterClient::try_default(config.namespace()).await?;
    new_secret_provider_with_cluster(config, selectors, cluster).await
}

/// Builds a provider reading cluster objects through `cluster`.
///
/// # Errors
///
/// See [`new_secret_provider`].
pub async fn new_secret_provider_with_cluster<C: ClusterClient>(
    config: &ProviderConfig,
    selectors: &[Selector],
    cluster: C,
) -> Result<Provider<C>, SecretProviderError> {
    let source = validate(config, selectors)?;
    let managed = config.managed() && !matches!(source, CredentialSource::SecretKey(_));
    if config.managed() && !managed {
        info!("secret key selector given, the secret sidecar is not used: selectors={selectors:?}");
    }
    let provider_type = provider_type(managed);
    info!("initializing secret provider: secret_provider_type={provider_type}");

    let provider = if managed {
        ManagedSecretProvider::new(config, cluster)
            .await
            .map(Provider::Managed)
    } else {
        UnmanagedSecretProvider::new(config, cluster, source)
            .await
            .map(Provider::Unmanaged)
    };

    match &provider {
        Ok(_) => info!("initialized secret provider: secret_provider_type={provider_type}"),
        Err(e) => error!(
            "error initializing secret provider: secret_provider_type={provider_type}, error={e}"
        ),
    }
    provider
}

fn validate<'a>(
    config: &ProviderConfig,
    selectors: &'a [Selector],
) -> Result<CredentialSource<'a>, SecretProviderError> {
    validate_selectors(selectors).inspect_err(|e| {
        error!(
            "error seen while validating arguments: secret_provider_type={}, error={e}, selectors={selectors:?}",
            provider_type(config.managed())
        );
    })
}

const fn provider_type(managed: bool) -> &'static str {
    if managed {
        MANAGED_PROVIDER_TYPE
    } else {
        UNMANAGED_PROVIDER_TYPE
    }
}

pub(crate) fn http_client(config: &ProviderConfig) -> Result<reqwest::Client, SecretProviderError> {
    reqwest::Client::builder()
        .timeout(config.probe_timeout())
        .build()
        .map_err(SecretProviderError::HttpClient)
}

/// Endpoint resolver plus the last value resolved for each identity.
#[derive(Debug)]
struct Endpoints<C> {
    resolver: EndpointResolver<C>,
    cache: HashMap<EndpointIdentity, String>,
}

impl<C: ClusterClient> Endpoints<C> {
    fn new(
        cluster: Arc<C>,
        region: RegionConfig,
        config: &ProviderConfig,
        http: reqwest::Client,
    ) -> Self {
        let prober = ReachabilityProber::with_client(http);
        Self {
            resolver: EndpointResolver::new(cluster, region, config.acceptance(), prober),
            cache: HashMap::new(),
        }
    }

    async fn get(&mut self, identity: EndpointIdentity) -> Result<String, ResolveError> {
        let cached = self.cache.get(&identity).map(String::as_str);
        let value = self.resolver.resolve(identity, cached).await?.into_value();
        self.cache.insert(identity, value.clone());
        Ok(value)
    }

    fn resource_group_id(&self) -> &str {
        self.resolver.region_config().resource_group_id()
    }
}
