use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while talking to the secret sidecar.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SidecarError {
    /// The unix socket could not be dialled.
    #[error("unable to connect to secret sidecar at {}", endpoint.display())]
    Connect {
        /// Socket path.
        endpoint: PathBuf,
        /// Transport error.
        #[source]
        source: tonic::transport::Error,
    },

    /// The sidecar answered with a gRPC error status.
    #[error("secret sidecar rejected the request")]
    Status(#[from] tonic::Status),

    /// Dial and call did not complete within the deadline.
    #[error("secret sidecar did not answer within {0:?}")]
    Timeout(Duration),
}
