use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::{
    ClusterClient, ClusterError, SecretEvent, SecretEventStream, SecretNotification,
};
use crate::constants::{IBMCLOUD_CREDENTIALS_SECRET, STORAGE_SECRET_STORE_SECRET};
use crate::prelude::{debug, error, info, warn};

/// State shared between the watch task and the provider.
///
/// The task only ever sets `dirty`; the provider clears it after a successful refresh.
#[derive(Debug)]
pub struct WatchState {
    object_name: Mutex<String>,
    resource_version: Mutex<Option<String>>,
    dirty: AtomicBool,
}

impl WatchState {
    fn new(object_name: &str) -> Self {
        Self {
            object_name: Mutex::new(object_name.to_owned()),
            resource_version: Mutex::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    /// Name of the secret currently watched.
    pub fn object_name(&self) -> String {
        self.object_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `true` when the credential changed since the last refresh.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Last resource version seen for the watched secret.
    pub fn resource_version(&self) -> Option<String> {
        self.resource_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_object_name(&self, name: &str) {
        name.clone_into(&mut self.object_name.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn set_resource_version(&self, version: Option<String>) {
        *self
            .resource_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = version;
    }
}

/// Background watch on the credential secret.
///
/// Watches `ibm-cloud-credentials`, or `storage-secret-store` when the former cannot be
/// watched. Every change notification marks [`WatchState`] dirty. The `Added` that opens a
/// fresh subscription only describes the current secret and is not treated as a change.
///
/// A deletion triggers a new primary-then-fallback subscription. When the server merely closes
/// the stream, the subscription is reopened from the last resource version seen, so only
/// changes made in between are reported. If resubscribing fails the task logs the error and
/// stops, leaving the flag as it was.
///
/// Dropping the watcher cancels the task.
#[derive(Debug)]
pub struct SecretWatcher {
    state: Arc<WatchState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SecretWatcher {
    /// Subscribes and spawns the watch task on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns the fallback subscription error when neither secret can be watched.
    pub async fn spawn<C: ClusterClient>(cluster: Arc<C>) -> Result<Self, ClusterError> {
        info!("initializing secret watcher");
        let (name, events) = subscribe(&*cluster, None).await?;

        let state = Arc::new(WatchState::new(name));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            cluster,
            Arc::clone(&state),
            events,
            cancel.clone(),
        ));
        info!("initialized secret watcher: secret_name={name}");

        Ok(Self {
            state,
            cancel,
            task,
        })
    }

    /// Shared watch state.
    pub fn state(&self) -> &Arc<WatchState> {
        &self.state
    }

    /// `false` once the task has stopped.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SecretWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Where a closed subscription left off.
struct Resume<'a> {
    name: &'a str,
    resource_version: &'a str,
}

impl<'a> Resume<'a> {
    fn version_for(resume: Option<&Resume<'a>>, name: &str) -> Option<&'a str> {
        resume
            .filter(|resume| resume.name == name)
            .map(|resume| resume.resource_version)
    }
}

async fn subscribe<C: ClusterClient>(
    cluster: &C,
    resume: Option<&Resume<'_>>,
) -> Result<(&'static str, SecretEventStream), ClusterError> {
    let primary = Resume::version_for(resume, IBMCLOUD_CREDENTIALS_SECRET);
    match cluster
        .watch_secret(IBMCLOUD_CREDENTIALS_SECRET, primary)
        .await
    {
        Ok(events) => Ok((IBMCLOUD_CREDENTIALS_SECRET, events)),
        Err(e) => {
            warn!("unable to watch secret, trying fallback: secret_name={IBMCLOUD_CREDENTIALS_SECRET}, fallback={STORAGE_SECRET_STORE_SECRET}, error={e}");
            let fallback = Resume::version_for(resume, STORAGE_SECRET_STORE_SECRET);
            let events = cluster
                .watch_secret(STORAGE_SECRET_STORE_SECRET, fallback)
                .await
                .inspect_err(|e| {
                    error!("unable to watch secret: secret_name={STORAGE_SECRET_STORE_SECRET}, error={e}");
                })?;
            Ok((STORAGE_SECRET_STORE_SECRET, events))
        }
    }
}

async fn run<C: ClusterClient>(
    cluster: Arc<C>,
    state: Arc<WatchState>,
    mut events: SecretEventStream,
    cancel: CancellationToken,
) {
    // Set while the subscription may still deliver its opening listing.
    let mut listing = true;

    loop {
        let notification = tokio::select! {
            () = cancel.cancelled() => {
                debug!("cancellation signal received; stopping secret watcher");
                return;
            }
            notification = events.next() => notification,
        };

        let secret_name = state.object_name();
        let resubscribe = match notification {
            Some(SecretNotification {
                event: SecretEvent::Added,
                resource_version,
            }) if listing => {
                debug!("secret watch established: secret_name={secret_name}, resource_version={resource_version:?}");
                state.set_resource_version(resource_version);
                None
            }
            Some(SecretNotification {
                event: SecretEvent::Deleted,
                ..
            }) => {
                info!("secret is deleted: secret_name={secret_name}");
                state.mark_dirty();
                state.set_resource_version(None);
                Some(false)
            }
            Some(SecretNotification {
                event: SecretEvent::Expired,
                ..
            }) => {
                warn!("secret watch expired, changes may have been missed: secret_name={secret_name}");
                state.mark_dirty();
                state.set_resource_version(None);
                None
            }
            Some(SecretNotification {
                event,
                resource_version,
            }) => {
                if event == SecretEvent::Modified {
                    info!("secret is modified: secret_name={secret_name}");
                } else {
                    debug!("secret notification: secret_name={secret_name}, event={event:?}");
                }
                state.mark_dirty();
                if resource_version.is_some() {
                    state.set_resource_version(resource_version);
                }
                None
            }
            None => {
                info!("secret watch closed by the server: secret_name={secret_name}");
                Some(true)
            }
        };
        listing = false;

        let Some(resumable) = resubscribe else {
            continue;
        };

        let version = if resumable {
            state.resource_version()
        } else {
            None
        };
        let resume = version.as_deref().map(|resource_version| Resume {
            name: &secret_name,
            resource_version,
        });
        let subscription = tokio::select! {
            () = cancel.cancelled() => return,
            subscription = subscribe(&*cluster, resume.as_ref()) => subscription,
        };
        match subscription {
            Ok((name, stream)) => {
                listing = resume.is_none_or(|resume| resume.name != name);
                if name != secret_name {
                    state.set_resource_version(None);
                }
                state.set_object_name(name);
                events = stream;
                info!("secret watcher resubscribed: secret_name={name}");
            }
            Err(e) => {
                error!("error reinitializing secret watcher, exiting: error={e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::constants::{CLOUD_PROVIDER_ENV, SECRET_STORE_FILE};
    use std::time::Duration;

    async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    fn cluster_with_both_secrets() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV, "v1");
        cluster.put_secret(STORAGE_SECRET_STORE_SECRET, SECRET_STORE_FILE, "v1");
        cluster
    }

    #[tokio::test]
    async fn prefers_the_credentials_secret() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster)).await.unwrap();

        assert_eq!(watcher.state().object_name(), IBMCLOUD_CREDENTIALS_SECRET);
        assert!(!watcher.state().is_dirty());
    }

    #[tokio::test]
    async fn opening_listing_is_not_a_change() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster)).await.unwrap();

        let state = Arc::clone(watcher.state());
        eventually("listing consumed", || state.resource_version().is_some()).await;
        assert_eq!(state.resource_version().as_deref(), Some("1"));
        assert!(!state.is_dirty());
    }

    #[tokio::test]
    async fn falls_back_to_the_secret_store() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(STORAGE_SECRET_STORE_SECRET, SECRET_STORE_FILE, "v1");

        let watcher = SecretWatcher::spawn(Arc::new(cluster)).await.unwrap();
        assert_eq!(watcher.state().object_name(), STORAGE_SECRET_STORE_SECRET);
    }

    #[tokio::test]
    async fn fails_when_nothing_can_be_watched() {
        let err = SecretWatcher::spawn(Arc::new(InMemoryCluster::new()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn modification_marks_state_dirty() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster.clone())).await.unwrap();

        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV, "v2");

        let state = Arc::clone(watcher.state());
        eventually("dirty flag", || state.is_dirty()).await;
        assert_eq!(state.object_name(), IBMCLOUD_CREDENTIALS_SECRET);
        assert!(watcher.is_running());
    }

    #[tokio::test]
    async fn deletion_resubscribes_to_the_fallback() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster.clone())).await.unwrap();

        cluster.delete_secret(IBMCLOUD_CREDENTIALS_SECRET);

        let state = Arc::clone(watcher.state());
        eventually("fallback subscription", || {
            state.object_name() == STORAGE_SECRET_STORE_SECRET
        })
        .await;
        assert!(state.is_dirty());
        assert_eq!(cluster.open_watches(STORAGE_SECRET_STORE_SECRET), 1);
        assert!(watcher.is_running());
    }

    #[tokio::test]
    async fn closed_stream_resumes_without_marking_dirty() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster.clone())).await.unwrap();
        let state = Arc::clone(watcher.state());
        eventually("listing consumed", || state.resource_version().is_some()).await;

        for round in 2..=4 {
            cluster.close_watches(IBMCLOUD_CREDENTIALS_SECRET);
            eventually("new subscription", || {
                cluster.subscriptions(IBMCLOUD_CREDENTIALS_SECRET) == round
                    && cluster.open_watches(IBMCLOUD_CREDENTIALS_SECRET) == 1
            })
            .await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!state.is_dirty());
        assert_eq!(state.object_name(), IBMCLOUD_CREDENTIALS_SECRET);
        assert!(watcher.is_running());
    }

    #[tokio::test]
    async fn change_while_resubscribing_is_reported() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster.clone())).await.unwrap();
        let state = Arc::clone(watcher.state());
        eventually("listing consumed", || state.resource_version().is_some()).await;

        cluster.close_watches(IBMCLOUD_CREDENTIALS_SECRET);
        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV, "v2");

        eventually("missed change reported", || {
            state.resource_version().as_deref() == Some("3")
        })
        .await;
        assert!(state.is_dirty());
    }

    #[tokio::test]
    async fn stops_when_resubscription_fails() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(IBMCLOUD_CREDENTIALS_SECRET, CLOUD_PROVIDER_ENV, "v1");
        let watcher = SecretWatcher::spawn(Arc::new(cluster.clone())).await.unwrap();

        cluster.delete_secret(IBMCLOUD_CREDENTIALS_SECRET);

        eventually("watcher exit", || !watcher.is_running()).await;
        assert!(watcher.state().is_dirty());
    }

    #[tokio::test]
    async fn drop_cancels_the_task() {
        let cluster = cluster_with_both_secrets();
        let watcher = SecretWatcher::spawn(Arc::new(cluster.clone())).await.unwrap();
        assert_eq!(cluster.open_watches(IBMCLOUD_CREDENTIALS_SECRET), 1);

        drop(watcher);

        eventually("watch released", || {
            cluster.open_watches(IBMCLOUD_CREDENTIALS_SECRET) == 0
        })
        .await;
    }
}
