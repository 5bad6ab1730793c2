//! Access to the cluster-stored objects the provider depends on.
//!
//! The provider never talks to the Kubernetes API directly; it goes through
//! [`ClusterClient`], which exposes exactly the three reads it needs: a secret value, a
//! config map value and a change-notification stream for one secret. [`KubeClusterClient`]
//! implements it on top of `kube`; [`InMemoryCluster`] keeps the objects in memory.

mod kubernetes;
mod memory;

pub use kubernetes::KubeClusterClient;
pub use memory::InMemoryCluster;

use std::future::Future;
use std::path::PathBuf;

use futures::stream::BoxStream;
use thiserror::Error;

/// Errors produced while reading cluster objects.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The Kubernetes client could not be created from the in-cluster configuration.
    #[error("unable to create kubernetes client")]
    ClientInit(#[source] kube::Error),

    /// The namespace file could not be read.
    #[error("unable to read namespace from {}", path.display())]
    Namespace {
        /// Path of the namespace file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The namespace file was empty.
    #[error("namespace is empty")]
    EmptyNamespace,

    /// The requested object does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind (`secret`, `configmap`).
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The object exists but does not carry the requested key.
    #[error("{kind} {name} has no key {key}")]
    MissingKey {
        /// Object kind (`secret`, `configmap`).
        kind: &'static str,
        /// Object name.
        name: String,
        /// Missing data key.
        key: String,
    },

    /// The API server rejected or failed the request.
    #[error("kubernetes request for {kind} {name} failed")]
    Api {
        /// Object kind (`secret`, `configmap`).
        kind: &'static str,
        /// Object name.
        name: String,
        /// Client error.
        #[source]
        source: kube::Error,
    },
}

impl ClusterError {
    /// `true` when the object or key is absent, as opposed to the API being unavailable.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MissingKey { .. })
    }
}

/// Kind of change reported for a watched secret.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SecretEvent {
    /// The secret was created, or reported by the listing that opens a new subscription.
    Added,
    /// The secret data or metadata changed.
    Modified,
    /// The secret was deleted.
    Deleted,
    /// The requested resource version is no longer available; the subscription cannot resume.
    Expired,
    /// The API server reported an error on the watch.
    Error(String),
    /// Any other notification (bookmarks).
    Other,
}

/// A notification for a watched secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretNotification {
    /// What happened.
    pub event: SecretEvent,
    /// Resource version of the secret after the change, when the server reported one.
    pub resource_version: Option<String>,
}

impl SecretNotification {
    /// Notification carrying `resource_version`.
    pub fn new(event: SecretEvent, resource_version: impl Into<String>) -> Self {
        Self {
            event,
            resource_version: Some(resource_version.into()),
        }
    }

    /// Notification without a resource version.
    pub const fn unversioned(event: SecretEvent) -> Self {
        Self {
            event,
            resource_version: None,
        }
    }
}

/// Stream of notifications for one secret; it ends when the server closes the watch.
pub type SecretEventStream = BoxStream<'static, SecretNotification>;

/// Read access to the cluster objects used by the provider.
///
/// Implementations are shared between the foreground provider and the background watch task,
/// hence the `Send + Sync + 'static` bound.
pub trait ClusterClient: Send + Sync + 'static {
    /// Returns the raw value stored under `key` in secret `name`.
    fn secret_value(
        &self,
        name: &str,
        key: &str,
    ) -> impl Future<Output = Result<Vec<u8>, ClusterError>> + Send;

    /// Returns the value stored under `key` in config map `name`.
    fn config_map_value(
        &self,
        name: &str,
        key: &str,
    ) -> impl Future<Output = Result<String, ClusterError>> + Send;

    /// Opens a change-notification subscription for secret `name`.
    ///
    /// Without `resource_version` the stream opens with an [`SecretEvent::Added`] describing
    /// the current secret. With one, only changes made after that version are delivered.
    fn watch_secret(
        &self,
        name: &str,
        resource_version: Option<&str>,
    ) -> impl Future<Output = Result<SecretEventStream, ClusterError>> + Send;
}
