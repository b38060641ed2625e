//! OAuth2 token acquisition for Microsoft Graph.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::{EntraConfig, EntraCredentials, EntraError, EntraResult};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Caches one Graph access token and refreshes it shortly before expiry.
///
/// Uses the client-credentials grant, or the resource-owner password grant
/// when the credentials carry a delegated account.
#[derive(Debug)]
pub struct TokenCache {
    credentials: EntraCredentials,
    token_url: String,
    scope: String,
    http_client: reqwest::Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    grace_period: Duration,
}

impl TokenCache {
    pub fn new(config: &EntraConfig, credentials: EntraCredentials) -> Self {
        Self {
            credentials,
            token_url: config.token_url(),
            scope: config.scope(),
            http_client: reqwest::Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
            grace_period: Duration::minutes(5),
        }
    }

    /// Name of the grant this cache uses, for logs.
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        if self.credentials.delegated.is_some() {
            "password"
        } else {
            "client_credentials"
        }
    }

    /// Returns a valid access token, acquiring a new one if needed.
    #[instrument(skip(self), fields(grant = self.grant_type()))]
    pub async fn get_token(&self) -> EntraResult<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(token) = cache.as_ref() {
                if !token.is_expired(self.grace_period) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cache = self.cached_token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = cache.as_ref() {
            if !token.is_expired(self.grace_period) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Acquiring access token");
        let token = self.acquire_token().await?;
        let access_token = token.access_token.clone();
        *cache = Some(token);
        Ok(access_token)
    }

    /// Drops the cached token so the next call acquires a fresh one.
    pub async fn invalidate(&self) {
        *self.cached_token.write().await = None;
    }

    async fn acquire_token(&self) -> EntraResult<CachedToken> {
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
            ("scope", self.scope.as_str()),
        ];
        match &self.credentials.delegated {
            Some(account) => {
                params.push(("grant_type", "password"));
                params.push(("username", account.username.as_str()));
                params.push(("password", account.password.expose_secret()));
            }
            None => params.push(("grant_type", "client_credentials")),
        }

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| EntraError::Auth(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => format!(
                    "{}: {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                ),
                Err(_) => body,
            };
            return Err(EntraError::Auth(format!(
                "Token request failed with status {status}: {detail}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EntraError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        debug!(expires_at = %expires_at, "Acquired access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_respects_grace_period() {
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        assert!(!token.is_expired(Duration::minutes(5)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[test]
    fn test_grant_type_follows_credentials() {
        let config = EntraConfig::builder().tenant_id("t").build().unwrap();
        let app = EntraCredentials::app("client", "secret".to_string().into());
        assert_eq!(TokenCache::new(&config, app.clone()).grant_type(), "client_credentials");

        let delegated = app.acting_as(crate::DelegatedAccount {
            username: "svc-onboard@example.org".to_string(),
            password: "pw".to_string().into(),
        });
        assert_eq!(TokenCache::new(&config, delegated).grant_type(), "password");
    }
}
