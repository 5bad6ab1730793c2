use std::fmt;
use std::path::Path;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};

use super::{ClusterClient, ClusterError, SecretEvent, SecretEventStream, SecretNotification};
use crate::constants::SERVICE_ACCOUNT_NAMESPACE_FILE;

const SECRET_KIND: &str = "secret";
const CONFIGMAP_KIND: &str = "configmap";
// Listing from version "0" replays the current object as `Added`.
const LIST_VERSION: &str = "0";
const GONE: u16 = 410;

/// [`ClusterClient`] backed by a `kube` client scoped to one namespace.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl KubeClusterClient {
    /// Creates a client from the in-cluster (or kubeconfig) configuration.
    ///
    /// When `namespace` is `None`, the namespace of the running pod is read from the service
    /// account mount.
    ///
    /// # Errors
    ///
    /// Returns a [`ClusterError`] if the client cannot be configured or the namespace cannot
    /// be determined.
    pub async fn try_default(namespace: Option<&str>) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(ClusterError::ClientInit)?;

        let namespace = match namespace {
            Some(namespace) => namespace.to_owned(),
            None => read_namespace(Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE)).await?,
        };

        Ok(Self::new(client, namespace))
    }

    /// Wraps an existing client.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Namespace the client reads from.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

impl fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("client", &"<kube::Client>")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ClusterClient for KubeClusterClient {
    async fn secret_value(&self, name: &str, key: &str) -> Result<Vec<u8>, ClusterError> {
        let secret = self
            .secrets()
            .get(name)
            .await
            .map_err(|e| api_error(SECRET_KIND, name, e))?;

        secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|value| value.0)
            .ok_or_else(|| ClusterError::MissingKey {
                kind: SECRET_KIND,
                name: name.to_owned(),
                key: key.to_owned(),
            })
    }

    async fn config_map_value(&self, name: &str, key: &str) -> Result<String, ClusterError> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let config_map = config_maps
            .get(name)
            .await
            .map_err(|e| api_error(CONFIGMAP_KIND, name, e))?;

        config_map
            .data
            .and_then(|mut data| data.remove(key))
            .ok_or_else(|| ClusterError::MissingKey {
                kind: CONFIGMAP_KIND,
                name: name.to_owned(),
                key: key.to_owned(),
            })
    }

    async fn watch_secret(
        &self,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<SecretEventStream, ClusterError> {
        let params = WatchParams::default().fields(&format!("metadata.name={name}"));
        let events = self
            .secrets()
            .watch(&params, resource_version.unwrap_or(LIST_VERSION))
            .await
            .map_err(|e| api_error(SECRET_KIND, name, e))?;

        Ok(events
            .map(|event| match event {
                Ok(event) => notification(event),
                Err(e) => SecretNotification::unversioned(SecretEvent::Error(e.to_string())),
            })
            .boxed())
    }
}

fn notification(event: WatchEvent<Secret>) -> SecretNotification {
    let (event, secret) = match event {
        WatchEvent::Added(secret) => (SecretEvent::Added, secret),
        WatchEvent::Modified(secret) => (SecretEvent::Modified, secret),
        WatchEvent::Deleted(secret) => (SecretEvent::Deleted, secret),
        WatchEvent::Bookmark(bookmark) => {
            return SecretNotification::new(SecretEvent::Other, bookmark.metadata.resource_version)
        }
        WatchEvent::Error(response) if response.code == GONE => {
            return SecretNotification::unversioned(SecretEvent::Expired)
        }
        WatchEvent::Error(response) => {
            return SecretNotification::unversioned(SecretEvent::Error(response.to_string()))
        }
    };
    SecretNotification {
        event,
        resource_version: secret.resource_version(),
    }
}

async fn read_namespace(path: &Path) -> Result<String, ClusterError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ClusterError::Namespace {
            path: path.to_path_buf(),
            source,
        })?;

    let namespace = raw.trim();
    if namespace.is_empty() {
        return Err(ClusterError::EmptyNamespace);
    }
    Ok(namespace.to_owned())
}

fn api_error(kind: &'static str, name: &str, error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(ref response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_owned(),
        },
        source => ClusterError::Api {
            kind,
            name: name.to_owned(),
            source,
        },
    }
}
