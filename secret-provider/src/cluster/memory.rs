use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ClusterClient, ClusterError, SecretEvent, SecretEventStream, SecretNotification};

const SECRET_KIND: &str = "secret";
const CONFIGMAP_KIND: &str = "configmap";

/// [`ClusterClient`] holding its objects in memory.
///
/// Intended for tests and local runs. Mutations are pushed to open watches, and reads are
/// counted per object name so callers can assert how often a document was fetched.
///
/// Like the API server, every change bumps a cluster-wide resource version, and a watch opened
/// without a version starts with an `Added` for the current secret. A watch resumed from an
/// older version receives one `Modified` standing for the changes it missed.
///
/// Unlike the API server, watching a secret that does not exist fails with
/// [`ClusterError::NotFound`]; this lets tests drive the watcher's fallback path.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    secrets: HashMap<String, StoredSecret>,
    config_maps: HashMap<String, BTreeMap<String, String>>,
    watches: HashMap<String, Vec<mpsc::UnboundedSender<SecretNotification>>>,
    subscriptions: HashMap<String, usize>,
    reads: HashMap<String, usize>,
    version: u64,
}

#[derive(Debug, Default)]
struct StoredSecret {
    data: BTreeMap<String, Vec<u8>>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn notify(&mut self, name: &str, event: SecretEvent, version: u64) {
        let notification = SecretNotification::new(event, version.to_string());
        if let Some(senders) = self.watches.get_mut(name) {
            senders.retain(|sender| sender.send(notification.clone()).is_ok());
        }
    }
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` in secret `name`, creating the secret if needed.
    pub fn put_secret(&self, name: &str, key: &str, value: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let created = !state.secrets.contains_key(name);
        let version = state.next_version();
        let secret = state.secrets.entry(name.to_owned()).or_default();
        secret.data.insert(key.to_owned(), value.into());
        secret.version = version;

        let event = if created {
            SecretEvent::Added
        } else {
            SecretEvent::Modified
        };
        state.notify(name, event, version);
    }

    /// Deletes secret `name`, notifying and then closing its watches.
    pub fn delete_secret(&self, name: &str) {
        let mut state = self.lock();
        if state.secrets.remove(name).is_some() {
            let version = state.next_version();
            state.notify(name, SecretEvent::Deleted, version);
        }
        state.watches.remove(name);
    }

    /// Ends every open watch on secret `name` without changing the secret.
    pub fn close_watches(&self, name: &str) {
        self.lock().watches.remove(name);
    }

    /// Number of watches currently open on secret `name`.
    pub fn open_watches(&self, name: &str) -> usize {
        self.lock()
            .watches
            .get(name)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }

    /// How many watches were ever opened on secret `name`.
    pub fn subscriptions(&self, name: &str) -> usize {
        self.lock().subscriptions.get(name).copied().unwrap_or(0)
    }

    /// Stores `value` under `key` in config map `name`.
    pub fn put_config_map(&self, name: &str, key: &str, value: impl Into<String>) {
        self.lock()
            .config_maps
            .entry(name.to_owned())
            .or_default()
            .insert(key.to_owned(), value.into());
    }

    /// How many times secret or config map `name` has been read.
    pub fn reads(&self, name: &str) -> usize {
        self.lock().reads.get(name).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClusterClient for InMemoryCluster {
    async fn secret_value(&self, name: &str, key: &str) -> Result<Vec<u8>, ClusterError> {
        let mut state = self.lock();
        *state.reads.entry(name.to_owned()).or_default() += 1;

        let secret = state.secrets.get(name).ok_or_else(|| ClusterError::NotFound {
            kind: SECRET_KIND,
            name: name.to_owned(),
        })?;
        secret
            .data
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::MissingKey {
                kind: SECRET_KIND,
                name: name.to_owned(),
                key: key.to_owned(),
            })
    }

    async fn config_map_value(&self, name: &str, key: &str) -> Result<String, ClusterError> {
        let mut state = self.lock();
        *state.reads.entry(name.to_owned()).or_default() += 1;

        let config_map = state
            .config_maps
            .get(name)
            .ok_or_else(|| ClusterError::NotFound {
                kind: CONFIGMAP_KIND,
                name: name.to_owned(),
            })?;
        config_map
            .get(key)
            .cloned()
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
        let mut state = self.lock();
        let current = state
            .secrets
            .get(name)
            .map(|secret| secret.version)
            .ok_or_else(|| ClusterError::NotFound {
                kind: SECRET_KIND,
                name: name.to_owned(),
            })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let replay = match resource_version {
            None => Some(SecretEvent::Added),
            Some(seen) if seen != current.to_string() => Some(SecretEvent::Modified),
            Some(_) => None,
        };
        if let Some(event) = replay {
            // The receiver is still held here, so the send cannot fail.
            let _ = sender.send(SecretNotification::new(event, current.to_string()));
        }

        state.watches.entry(name.to_owned()).or_default().push(sender);
        *state.subscriptions.entry(name.to_owned()).or_default() += 1;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}
