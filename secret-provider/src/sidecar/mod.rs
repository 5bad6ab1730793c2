//! Client side of the secret sidecar protocol.
//!
//! In managed mode tokens are issued by a companion process listening on a unix socket. The
//! [`SidecarBridge`] dials that socket for every call and never pools channels; the sidecar
//! may be restarted independently of the workload. [`SecretWatcher`] runs next to it and
//! flags the cached default token as stale whenever the credential secret changes.

mod error;
mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SidecarError;
pub use watcher::{SecretWatcher, WatchState};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint as TonicEndpoint, Uri};
use tower::service_fn;

use crate::auth::IamToken;
use crate::prelude::debug;

// Generated from proto/secret_provider.proto.
#[allow(
    dead_code,
    clippy::derive_partial_eq_without_eq,
    reason = "the server half is only used by the in-process test sidecar"
)]
pub(crate) mod pb {
    tonic::include_proto!("secretprovider");
}

use pb::secret_provider_client::SecretProviderClient;

// The authority is ignored; the connector always dials the unix socket.
const TONIC_DUMMY_URI: &str = "http://[::]:50051";

/// Issues tokens through the secret sidecar.
#[derive(Clone, Debug)]
pub struct SidecarBridge {
    endpoint: PathBuf,
    call_timeout: Duration,
}

#[derive(Clone, Copy, Debug)]
enum Rpc {
    DefaultToken,
    SecretToken,
}

impl SidecarBridge {
    /// Creates a bridge for the socket at `endpoint`; each call (dial included) is bounded by
    /// `call_timeout`.
    pub fn new(endpoint: impl Into<PathBuf>, call_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            call_timeout,
        }
    }

    /// Socket path of the sidecar.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Dials the sidecar once and drops the channel.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::Connect`] if the socket cannot be dialled, or
    /// [`SidecarError::Timeout`] if dialling takes longer than `timeout`.
    pub async fn check_connection(&self, timeout: Duration) -> Result<(), SidecarError> {
        tokio::time::timeout(timeout, connect(&self.endpoint))
            .await
            .map_err(|_| SidecarError::Timeout(timeout))??;
        Ok(())
    }

    /// Fetches the token of the default credential.
    ///
    /// `read_secret` asks the sidecar to re-read the credential secret before issuing.
    pub async fn fetch_default_token(
        &self,
        fresh: bool,
        read_secret: bool,
    ) -> Result<IamToken, SidecarError> {
        let request = pb::Request {
            secret: String::new(),
            is_fresh_token_required: fresh,
            read_secret,
        };
        self.call(Rpc::DefaultToken, request).await
    }

    /// Fetches a token for the API key `secret`.
    pub async fn fetch_token_for_secret(
        &self,
        secret: &str,
        fresh: bool,
    ) -> Result<IamToken, SidecarError> {
        let request = pb::Request {
            secret: secret.to_owned(),
            is_fresh_token_required: fresh,
            read_secret: false,
        };
        self.call(Rpc::SecretToken, request).await
    }

    async fn call(&self, rpc: Rpc, request: pb::Request) -> Result<IamToken, SidecarError> {
        let exchange = async {
            let channel = connect(&self.endpoint).await?;
            let mut client = SecretProviderClient::new(channel);
            let response = match rpc {
                Rpc::DefaultToken => client.get_default_iam_token(request).await?,
                Rpc::SecretToken => client.get_iam_token(request).await?,
            };
            Ok::<_, SidecarError>(response.into_inner())
        };

        let response = tokio::time::timeout(self.call_timeout, exchange)
            .await
            .map_err(|_| SidecarError::Timeout(self.call_timeout))??;
        debug!(
            "token issued by secret sidecar: rpc={rpc:?}, lifetime_secs={}",
            response.tokenlifetime
        );

        Ok(IamToken::new(response.iamtoken, response.tokenlifetime))
    }
}

async fn connect(endpoint: &Path) -> Result<Channel, SidecarError> {
    let path = Arc::new(endpoint.to_path_buf());

    TonicEndpoint::from_static(TONIC_DUMMY_URI)
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = Arc::clone(&path);
            async move {
                let stream = UnixStream::connect(path.as_path()).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await
        .map_err(|source| SidecarError::Connect {
            endpoint: endpoint.to_path_buf(),
            source,
        })
}
