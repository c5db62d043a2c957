//! OAuth2 client-credentials authorization.

use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use firecrest_sched::{SchedError, SchedResult, TokenProvider};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// Tokens closer than this to expiry are refreshed.
const MIN_TOKEN_VALIDITY: Duration = Duration::from_secs(10);

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// `None` when the server gave no lifetime; such tokens are not reused.
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_valid(&self, now: Instant) -> bool {
        self.expires_at
            .is_some_and(|at| at.saturating_duration_since(now) > MIN_TOKEN_VALIDITY)
    }
}

/// Fetches and caches access tokens with the client-credentials grant.
pub struct ClientCredentialsAuth {
    client: Client,
    client_id: String,
    client_secret: String,
    token_uri: String,
    cached: RwLock<Option<CachedToken>>,
}

impl fmt::Debug for ClientCredentialsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsAuth")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ClientCredentialsAuth {
    pub fn new(
        client: Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_uri: impl Into<String>,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_uri: token_uri.into(),
            cached: RwLock::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.read().expect("token cache lock poisoned");
        cached
            .as_ref()
            .filter(|t| t.is_valid(Instant::now()))
            .map(|t| t.token.clone())
    }

    async fn fetch_token(&self) -> SchedResult<CachedToken> {
        debug!("Requesting access token from {}", self.token_uri);
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SchedError::Token(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "no body".to_string());
            return Err(SchedError::Token(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SchedError::Token(format!("invalid token response: {e}")))?;

        info!("Obtained access token for client {}", self.client_id);
        Ok(CachedToken {
            token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsAuth {
    async fn get_token(&self) -> SchedResult<String> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *self.cached.write().expect("token cache lock poisoned") = Some(fresh);
        Ok(token)
    }

    fn has_valid_token(&self) -> bool {
        self.cached_token().is_some()
    }
}
