//! In-process sidecar served over a unix socket in a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Code, Response, Status};

use super::pb;
use super::pb::secret_provider_server::{SecretProvider, SecretProviderServer};

pub(crate) const TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Default)]
struct Calls {
    default_calls: AtomicUsize,
    secret_calls: AtomicUsize,
    last_default: Mutex<Option<pb::Request>>,
    last_secret: Mutex<Option<pb::Request>>,
    failure: Mutex<Option<Code>>,
}

impl Calls {
    fn failure(&self) -> Result<(), Status> {
        match *self.failure.lock().unwrap() {
            Some(code) => Err(Status::new(code, "injected failure")),
            None => Ok(()),
        }
    }
}

struct FakeService {
    calls: Arc<Calls>,
}

#[tonic::async_trait]
impl SecretProvider for FakeService {
    async fn get_default_iam_token(
        &self,
        request: tonic::Request<pb::Request>,
    ) -> Result<Response<pb::Response>, Status> {
        let count = self.calls.default_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.calls.last_default.lock().unwrap() = Some(request.into_inner());
        self.calls.failure()?;

        Ok(Response::new(pb::Response {
            iamtoken: format!("default-token-{count}"),
            tokenlifetime: TOKEN_LIFETIME_SECS,
        }))
    }

    async fn get_iam_token(
        &self,
        request: tonic::Request<pb::Request>,
    ) -> Result<Response<pb::Response>, Status> {
        let count = self.calls.secret_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let request = request.into_inner();
        let token = format!("secret-token-{}-{count}", request.secret);
        *self.calls.last_secret.lock().unwrap() = Some(request);
        self.calls.failure()?;

        Ok(Response::new(pb::Response {
            iamtoken: token,
            tokenlifetime: TOKEN_LIFETIME_SECS,
        }))
    }
}

/// A running fake sidecar; the server stops when this is dropped.
pub(crate) struct FakeSidecar {
    _dir: tempfile::TempDir,
    path: PathBuf,
    calls: Arc<Calls>,
    server: JoinHandle<()>,
}

impl FakeSidecar {
    pub(crate) async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let calls = Arc::new(Calls::default());
        let service = SecretProviderServer::new(FakeService {
            calls: Arc::clone(&calls),
        });
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(UnixListenerStream::new(listener))
                .await
                .unwrap();
        });

        Self {
            _dir: dir,
            path,
            calls,
            server,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn default_calls(&self) -> usize {
        self.calls.default_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn secret_calls(&self) -> usize {
        self.calls.secret_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_default_request(&self) -> Option<pb::Request> {
        self.calls.last_default.lock().unwrap().clone()
    }

    pub(crate) fn last_secret_request(&self) -> Option<pb::Request> {
        self.calls.last_secret.lock().unwrap().clone()
    }

    pub(crate) fn fail_with(&self, code: Code) {
        *self.calls.failure.lock().unwrap() = Some(code);
    }
}

impl Drop for FakeSidecar {
    fn drop(&mut self) {
        self.server.abort();
    }
}
