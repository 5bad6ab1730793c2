use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

use super::{AuthError, AuthStrategy, IamToken, TokenCacheEntry};
use crate::constants::TOKEN_EXCHANGE_PATH;
use crate::prelude::{debug, warn};

const API_KEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";
const CR_TOKEN_GRANT: &str = "urn:ibm:params:oauth:grant-type:cr-token";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// IAM token endpoint of one exchange URL.
#[derive(Clone, Debug)]
pub struct TokenExchange {
    client: reqwest::Client,
    token_url: Url,
}

impl TokenExchange {
    /// Targets `{base_url}/identity/token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidExchangeUrl`] if `base_url` is not an absolute URL.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, AuthError> {
        let token_url = Url::parse(base_url)
            .and_then(|base| base.join(TOKEN_EXCHANGE_PATH))
            .map_err(|source| AuthError::InvalidExchangeUrl {
                url: base_url.to_owned(),
                source,
            })?;

        Ok(Self { client, token_url })
    }

    /// Full URL of the token endpoint.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    async fn request(&self, form: &[(&str, &str)]) -> Result<IamToken, AuthError> {
        let response = self
            .client
            .post(self.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(AuthError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "token exchange rejected: url={}, status={}",
                self.token_url,
                status.as_u16()
            );
            return Err(AuthError::Exchange {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response.json().await.map_err(AuthError::Http)?;
        Ok(IamToken::new(body.access_token, body.expires_in))
    }
}

#[derive(Clone)]
enum Grant {
    ApiKey(Zeroizing<String>),
    ComputeIdentity {
        profile_id: String,
        token_path: PathBuf,
    },
}

/// Exchanges one credential for IAM tokens, caching the last one.
#[derive(Clone)]
pub struct Authenticator {
    grant: Grant,
    strategy: AuthStrategy,
    exchange: TokenExchange,
    margin: Duration,
    cache: Option<TokenCacheEntry>,
}

impl Authenticator {
    /// API-key exchange.
    pub fn api_key(api_key: &str, strategy: AuthStrategy, exchange: TokenExchange) -> Self {
        Self::with_grant(Grant::ApiKey(Zeroizing::new(api_key.to_owned())), strategy, exchange)
    }

    /// Compute-identity exchange: the projected service account token at `token_path` is
    /// traded for a token of trusted profile `profile_id`.
    pub fn compute_identity(
        profile_id: &str,
        token_path: impl Into<PathBuf>,
        exchange: TokenExchange,
    ) -> Self {
        let grant = Grant::ComputeIdentity {
            profile_id: profile_id.to_owned(),
            token_path: token_path.into(),
        };
        Self::with_grant(grant, AuthStrategy::WorkloadIdentity, exchange)
    }

    /// Selects the exchange matching `strategy` for `material` (API key or profile id).
    pub fn for_strategy(
        strategy: AuthStrategy,
        material: &str,
        token_path: impl Into<PathBuf>,
        exchange: TokenExchange,
    ) -> Self {
        match strategy {
            AuthStrategy::WorkloadIdentity => {
                Self::compute_identity(material, token_path, exchange)
            }
            AuthStrategy::StaticKey | AuthStrategy::Default => {
                Self::api_key(material, strategy, exchange)
            }
        }
    }

    fn with_grant(grant: Grant, strategy: AuthStrategy, exchange: TokenExchange) -> Self {
        Self {
            grant,
            strategy,
            exchange,
            margin: Duration::ZERO,
            cache: None,
        }
    }

    /// Treats cached tokens as expired `margin` before their real expiry.
    #[must_use]
    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Strategy this authenticator was built for.
    pub const fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    /// Returns the cached token unless `fresh` is set or it is about to expire; otherwise
    /// performs an exchange and caches the result.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the exchange fails; the cache is left untouched.
    pub async fn token(&mut self, fresh: bool) -> Result<IamToken, AuthError> {
        if !fresh {
            if let Some(token) = self.cache.as_ref().and_then(|e| e.current(self.margin)) {
                debug!("serving cached token: lifetime_secs={}", token.lifetime_secs());
                return Ok(token);
            }
        }

        let token = match &self.grant {
            Grant::ApiKey(api_key) => {
                self.exchange
                    .request(&[("grant_type", API_KEY_GRANT), ("apikey", api_key.as_str())])
                    .await?
            }
            Grant::ComputeIdentity {
                profile_id,
                token_path,
            } => {
                let cr_token = tokio::fs::read_to_string(token_path)
                    .await
                    .map(Zeroizing::new)
                    .map_err(|source| AuthError::ServiceAccountToken {
                        path: token_path.clone(),
                        source,
                    })?;
                self.exchange
                    .request(&[
                        ("grant_type", CR_TOKEN_GRANT),
                        ("cr_token", cr_token.trim()),
                        ("profile_id", profile_id.as_str()),
                    ])
                    .await?
            }
        };

        self.cache = Some(TokenCacheEntry::new(token.clone(), self.strategy));
        Ok(token)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("strategy", &self.strategy)
            .field("token_url", &self.exchange.token_url.as_str())
            .field("margin", &self.margin)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(token: &str, expires_in: u64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": token,
            "refresh_token": "not-used",
            "token_type": "Bearer",
            "expires_in": expires_in,
        }))
    }

    fn exchange(server: &MockServer) -> TokenExchange {
        TokenExchange::new(reqwest::Client::new(), &server.uri()).unwrap()
    }

    #[test]
    fn token_path_is_appended_to_the_base_url() {
        let exchange =
            TokenExchange::new(reqwest::Client::new(), "https://iam.cloud.ibm.com").unwrap();
        assert_eq!(
            exchange.token_url().as_str(),
            "https://iam.cloud.ibm.com/identity/token"
        );
    }

    #[test]
    fn relative_exchange_url_is_rejected() {
        let err = TokenExchange::new(reqwest::Client::new(), "iam.cloud.ibm.com").unwrap_err();
        assert!(matches!(err, AuthError::InvalidExchangeUrl { .. }));
    }

    #[tokio::test]
    async fn api_key_exchange_is_cached_until_fresh_is_requested() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("apikey=key-1"))
            .and(body_string_contains(
                "grant_type=urn%3Aibm%3Aparams%3Aoauth%3Agrant-type%3Aapikey",
            ))
            .respond_with(token_body("issued", 3600))
            .expect(2)
            .mount(&server)
            .await;

        let mut auth = Authenticator::api_key("key-1", AuthStrategy::StaticKey, exchange(&server))
            .with_expiry_margin(Duration::from_secs(60));

        assert_eq!(auth.token(false).await.unwrap().token(), "issued");
        assert_eq!(auth.token(false).await.unwrap().token(), "issued");
        assert_eq!(auth.token(true).await.unwrap().token(), "issued");
    }

    #[tokio::test]
    async fn short_lived_tokens_are_not_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(token_body("short", 30))
            .expect(2)
            .mount(&server)
            .await;

        let mut auth = Authenticator::api_key("key", AuthStrategy::Default, exchange(&server))
            .with_expiry_margin(Duration::from_secs(60));

        auth.token(false).await.unwrap();
        auth.token(false).await.unwrap();
    }

    #[tokio::test]
    async fn compute_identity_sends_the_service_account_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .and(body_string_contains("cr_token=sa-token"))
            .and(body_string_contains("profile_id=Profile-1"))
            .and(body_string_contains("cr-token"))
            .respond_with(token_body("profile-token", 1200))
            .expect(1)
            .mount(&server)
            .await;

        let mut sa_token = tempfile::NamedTempFile::new().unwrap();
        writeln!(sa_token, "sa-token").unwrap();

        let mut auth = Authenticator::for_strategy(
            AuthStrategy::WorkloadIdentity,
            "Profile-1",
            sa_token.path(),
            exchange(&server),
        );
        let token = auth.token(true).await.unwrap();

        assert_eq!(token.token(), "profile-token");
        assert_eq!(token.lifetime_secs(), 1200);
        assert_eq!(auth.strategy(), AuthStrategy::WorkloadIdentity);
    }

    #[tokio::test]
    async fn missing_service_account_token_fails_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(token_body("unused", 1200))
            .expect(0)
            .mount(&server)
            .await;

        let mut auth = Authenticator::compute_identity(
            "Profile-1",
            "/nonexistent/sa-token",
            exchange(&server),
        );
        let err = auth.token(true).await.unwrap_err();

        assert!(matches!(err, AuthError::ServiceAccountToken { .. }));
    }

    #[tokio::test]
    async fn rejected_exchange_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("BXNIM0415E"))
            .mount(&server)
            .await;

        let mut auth = Authenticator::api_key("bad", AuthStrategy::StaticKey, exchange(&server));
        let err = auth.token(true).await.unwrap_err();

        let AuthError::Exchange { status, body } = err else {
            panic!("expected an exchange error, got {err:?}");
        };
        assert_eq!(status, 400);
        assert_eq!(body, "BXNIM0415E");
    }
}
