//! Bearer token seam.
//!
//! The scheduler asks a [`TokenProvider`] for a token before every physical
//! call, so providers that cache and refresh (OAuth2 client credentials, see
//! `firecrest-client`) stay in charge of expiry.

use std::fmt;

use async_trait::async_trait;

use crate::error::{SchedError, SchedResult};

/// Source of access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a valid access token.
    async fn get_token(&self) -> SchedResult<String>;

    /// Check if a token is available without contacting anything.
    fn has_valid_token(&self) -> bool;
}

/// A fixed token, for short-lived sessions and tests.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"[REDACTED]").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self) -> SchedResult<String> {
        Ok(self.0.clone())
    }

    fn has_valid_token(&self) -> bool {
        !self.0.is_empty()
    }
}

/// Environment variable token provider.
///
/// Reads the variable on every call, so an external agent can rotate it.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    env_var: String,
}

impl EnvTokenProvider {
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
        }
    }

    /// Provider for `FIRECREST_TOKEN`.
    pub fn firecrest() -> Self {
        Self::new("FIRECREST_TOKEN")
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn get_token(&self) -> SchedResult<String> {
        std::env::var(&self.env_var)
            .map_err(|_| SchedError::Token(format!("Environment variable {} not set", self.env_var)))
    }

    fn has_valid_token(&self) -> bool {
        std::env::var(&self.env_var).is_ok()
    }
}
