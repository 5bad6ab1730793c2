//! In-process IAM authentication for unmanaged providers.
//!
//! A [`Credential`] is loaded once from the cluster and fixes the [`AuthStrategy`]. An
//! [`Authenticator`] then exchanges it against the IAM token endpoint and caches the last
//! token for as long as it has more than the configured margin left.

mod authenticator;
mod credential;
mod token;

pub use authenticator::{Authenticator, TokenExchange};
pub use credential::{Credential, CredentialSource, ProviderFamily};
pub use token::{IamToken, TokenCacheEntry};

use std::path::PathBuf;

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::config::ConfigError;

/// How a credential is exchanged for tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStrategy {
    /// API key from `ibm-credentials.env` (`iam`) or `slclient.toml`.
    StaticKey,
    /// Trusted profile exchanged with the pod's service account token (`pod-identity`).
    WorkloadIdentity,
    /// API key read from a caller-named key.
    Default,
}

/// Errors produced while loading a credential or exchanging it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The credential is marked as encrypted.
    #[error("API key is encrypted as per the configuration, decryption of the same is not supported")]
    DecryptionNotSupported,

    /// `IBMCLOUD_AUTHTYPE` holds an unknown value.
    #[error("unsupported authentication type {0:?}")]
    UnsupportedAuthType(String),

    /// A required field is absent or empty.
    #[error("{field} is missing or empty in {document}")]
    MissingField {
        /// Document that was read.
        document: &'static str,
        /// Missing field.
        field: &'static str,
    },

    /// The credential secret could not be read.
    #[error("unable to read credential from secret {secret}")]
    Cluster {
        /// Secret being read.
        secret: &'static str,
        /// Cluster error.
        #[source]
        source: ClusterError,
    },

    /// A credential document could not be decoded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A satellite credential was not valid base64.
    #[error("unable to decode secret key {key}")]
    SecretDecode {
        /// Key that was read.
        key: String,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// A credential value was not valid UTF-8.
    #[error("secret key {key} is not valid UTF-8")]
    SecretNotUtf8 {
        /// Key that was read.
        key: String,
    },

    /// The token exchange URL is not an absolute URL.
    #[error("invalid token exchange URL {url}")]
    InvalidExchangeUrl {
        /// Configured URL.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// The projected service account token could not be read.
    #[error("unable to read service account token from {}", path.display())]
    ServiceAccountToken {
        /// Token path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The exchange request failed at the transport level or returned malformed JSON.
    #[error("token exchange request failed")]
    Http(#[source] reqwest::Error),

    /// The token endpoint answered with a non-success status.
    #[error("token exchange failed with status {status}: {body}")]
    Exchange {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}
