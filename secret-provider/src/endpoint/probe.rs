use std::time::Duration;

/// Liveness check for endpoint candidates.
///
/// An endpoint is reachable when a plain `GET` completes at the transport level; the status
/// code is ignored.
#[derive(Clone, Debug)]
pub struct ReachabilityProber {
    client: reqwest::Client,
}

impl ReachabilityProber {
    /// Creates a prober whose requests are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    /// Reuses an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Issues one `GET` against `url`.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the request cannot be completed (malformed URL,
    /// connection failure, timeout).
    pub async fn probe(&self, url: &str) -> Result<(), reqwest::Error> {
        self.client.get(url).send().await.map(drop)
    }
}
