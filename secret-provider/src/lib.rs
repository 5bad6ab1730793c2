#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

//! IAM tokens and regional service endpoints for workloads running on IBM Cloud
//! Kubernetes clusters.
//!
//! A provider is built once per process with [`new_secret_provider`] and then answers two
//! kinds of questions: "give me an IAM token" and "which URL serves this regional API".
//!
//! Two implementations exist, selected by [`ProviderConfig::managed`]:
//!
//! * [`ManagedSecretProvider`] asks a sidecar, reached over gRPC on a Unix socket, to issue
//!   tokens. It watches the credential secret and makes the sidecar re-read it after a change.
//! * [`UnmanagedSecretProvider`] reads the credential from the cluster and exchanges it
//!   against the IAM token endpoint itself.
//!
//! Both resolve endpoints through the same tiers: the provider's cache, `cloud-conf`, the
//! legacy `slclient.toml` secret, and finally a template filled with the cluster's region.
//!
//! ```no_run
//! use secret_provider::{new_secret_provider, ProviderConfig, SecretProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProviderConfig::from_env();
//! let mut provider = new_secret_provider(&config, &[]).await?;
//!
//! let token = provider.get_default_iam_token(false).await?;
//! let riaas = provider.get_riaas_endpoint().await?;
//! println!(
//!     "{} expires in {}s, riaas at {riaas}",
//!     provider.provider_type(),
//!     token.lifetime_secs()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`tracing`** (default): log through `tracing`.
//! - **`logging`**: log through `log` when `tracing` is disabled.

mod observability;
mod prelude;

pub mod auth;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod provider;
pub mod sidecar;

pub use crate::{
    auth::{AuthError, AuthStrategy, IamToken, ProviderFamily},
    cluster::{ClusterClient, ClusterError, KubeClusterClient},
    config::{ProviderConfig, ProviderConfigBuilder},
    endpoint::{AcceptancePolicy, EndpointIdentity},
    error::SecretProviderError,
    provider::{
        new_secret_provider, new_secret_provider_with_cluster, validate_selectors,
        ManagedSecretProvider, Provider, SecretProvider, Selector, UnmanagedSecretProvider,
    },
};
