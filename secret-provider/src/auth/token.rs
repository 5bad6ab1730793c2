use std::fmt;
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use super::AuthStrategy;

/// A bearer token and its lifetime in seconds.
#[derive(Clone)]
pub struct IamToken {
    token: Zeroizing<String>,
    lifetime_secs: u64,
}

impl IamToken {
    /// Wraps an issued token.
    pub fn new(token: impl Into<String>, lifetime_secs: u64) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            lifetime_secs,
        }
    }

    /// The bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Remaining lifetime reported when the token was handed out.
    pub const fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }
}

impl fmt::Debug for IamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamToken")
            .field("token", &"<redacted>")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish()
    }
}

/// The last token issued for a credential.
#[derive(Clone, Debug)]
pub struct TokenCacheEntry {
    token: IamToken,
    issued_at: Instant,
    strategy: AuthStrategy,
}

impl TokenCacheEntry {
    /// Records `token` as issued now.
    pub fn new(token: IamToken, strategy: AuthStrategy) -> Self {
        Self {
            token,
            issued_at: Instant::now(),
            strategy,
        }
    }

    /// Strategy the token was issued under.
    pub const fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    /// Lifetime left, before subtracting any margin.
    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.token.lifetime_secs).saturating_sub(self.issued_at.elapsed())
    }

    /// The cached token with its remaining lifetime, or `None` once less than `margin` is
    /// left.
    pub fn current(&self, margin: Duration) -> Option<IamToken> {
        let remaining = self.remaining();
        if remaining.saturating_sub(margin).is_zero() {
            return None;
        }

        Some(IamToken {
            token: self.token.token.clone(),
            lifetime_secs: remaining.as_secs(),
        })
    }
}
