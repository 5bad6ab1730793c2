//! Error type returned by provider construction and provider calls.

use thiserror::Error;

use crate::auth::AuthError;
use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::endpoint::ResolveError;
use crate::sidecar::SidecarError;

/// Errors produced by secret providers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SecretProviderError {
    /// More than one selector was supplied.
    #[error("invalid number of arguments provided while initialising secret provider")]
    MultipleSelectors,

    /// The `SecretKey` selector was empty.
    #[error("secret key provided is empty")]
    EmptySecretKey,

    /// The `ProviderType` selector named an unknown family.
    #[error("invalid provider type {0:?}, expected values are vpc, bluemix, softlayer")]
    InvalidProviderType(String),

    /// A selector used an unknown key.
    #[error("invalid argument {0:?}, only ProviderType and SecretKey are expected")]
    InvalidArgument(String),

    /// The sidecar could not be reached or failed a request.
    #[error("error establishing grpc connection to secret sidecar")]
    Sidecar(#[from] SidecarError),

    /// Neither credential secret could be watched.
    #[error("error initializing secret watcher")]
    WatcherInit(#[source] ClusterError),

    /// The cluster client could not be created.
    #[error("unable to initialize cluster client")]
    Cluster(#[from] ClusterError),

    /// A configuration document could not be loaded.
    #[error("unable to load configuration")]
    Config(#[from] ConfigError),

    /// The credential could not be loaded or exchanged.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// An endpoint could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The HTTP client could not be initialized.
    #[error("unable to initialize HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

impl SecretProviderError {
    /// `true` for errors raised by selector validation, before any I/O.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MultipleSelectors
                | Self::EmptySecretKey
                | Self::InvalidProviderType(_)
                | Self::InvalidArgument(_)
        )
    }
}
