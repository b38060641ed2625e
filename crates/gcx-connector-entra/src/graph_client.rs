//! Microsoft Graph HTTP client with token injection, retries and paging.

use std::sync::Arc;

use reqwest::header::RETRY_AFTER;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::rate_limit::RateLimiter;
use crate::{EntraConfig, EntraError, EntraResult, TokenCache};

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

/// `OData` error body.
#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    pub code: String,
    pub message: String,
}

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Consistency level requested for a read.
///
/// Advanced queries (`$count`, `in` filters, `ge` on `createdDateTime`) are
/// only served with eventual consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Session,
    Eventual,
}

/// Microsoft Graph API client bound to one set of credentials.
#[derive(Debug)]
pub struct GraphClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
}

impl GraphClient {
    /// Creates a client for the configured cloud.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &EntraConfig, token_cache: Arc<TokenCache>) -> EntraResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EntraError::Config(format!("Failed to create HTTP client: {e}")))?;

        let rate_limiter =
            RateLimiter::new(config.rate_limit.clone()).map_err(EntraError::Config)?;

        Ok(Self {
            http_client,
            token_cache,
            rate_limiter: Arc::new(rate_limiter),
            base_url: config.graph_base_url(),
        })
    }

    /// Versioned Graph root.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the Graph root.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// GET and decode a JSON body.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        consistency: Consistency,
    ) -> EntraResult<T> {
        let response = self
            .send(Method::GET, url, None::<&()>, consistency)
            .await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET a `$count` segment, which Graph returns as `text/plain`.
    #[instrument(skip(self))]
    pub async fn get_count(&self, url: &str) -> EntraResult<u64> {
        let response = self
            .send(Method::GET, url, None::<&()>, Consistency::Eventual)
            .await?;
        let text = response.text().await?;
        text.trim()
            .parse()
            .map_err(|_| EntraError::UnexpectedResponse(format!("invalid count '{text}'")))
    }

    /// PATCH a JSON body; any response body is discarded.
    #[instrument(skip(self, body))]
    pub async fn patch<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> EntraResult<()> {
        self.send(Method::PATCH, url, Some(body), Consistency::Session)
            .await
            .map(|_| ())
    }

    /// POST a JSON body; any response body is discarded.
    #[instrument(skip(self, body))]
    pub async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> EntraResult<()> {
        self.send(Method::POST, url, Some(body), Consistency::Session)
            .await
            .map(|_| ())
    }

    /// Follows `@odata.nextLink` from `initial_url`, handing each page to
    /// `callback`.
    #[instrument(skip(self, callback))]
    pub async fn get_paginated<T, F>(
        &self,
        initial_url: &str,
        consistency: Consistency,
        mut callback: F,
    ) -> EntraResult<()>
    where
        T: DeserializeOwned,
        F: FnMut(Vec<T>) -> EntraResult<()>,
    {
        let mut url = initial_url.to_string();
        loop {
            debug!(url = %url, "Fetching page");
            let page: ODataResponse<T> = self.get(&url, consistency).await?;
            callback(page.value)?;
            match page.next_link {
                Some(next) => url = next,
                None => return Ok(()),
            }
        }
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        consistency: Consistency,
    ) -> EntraResult<Response> {
        self.rate_limiter.check().await?;

        let max_transient = self.rate_limiter.config().max_transient_retries;
        let mut transient_attempts = 0u32;
        let mut throttle_attempts = 0u32;
        let mut token_refreshed = false;

        loop {
            let token = self.token_cache.get_token().await?;
            let mut request = self
                .http_client
                .request(method.clone(), url)
                .bearer_auth(&token);
            if consistency == Consistency::Eventual {
                request = request.header("ConsistencyLevel", "eventual");
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                self.rate_limiter.record_success().await;
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(RateLimiter::parse_retry_after);
                self.rate_limiter
                    .on_throttled(retry_after, throttle_attempts)
                    .await?;
                throttle_attempts += 1;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED && !token_refreshed {
                warn!("Graph rejected the access token, refreshing once");
                self.token_cache.invalidate().await;
                token_refreshed = true;
                continue;
            }

            if matches!(
                status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ) && transient_attempts < max_transient
            {
                let delay = self.rate_limiter.backoff(transient_attempts);
                transient_attempts += 1;
                warn!(
                    status = status.as_u16(),
                    retry = transient_attempts,
                    max = max_transient,
                    delay_ms = delay.as_millis() as u64,
                    "Transient Graph error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status.is_server_error() {
                self.rate_limiter.record_failure().await;
            }
            return Err(error_from_response(response).await);
        }
    }
}

async fn error_from_response(response: Response) -> EntraError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ODataError>(&body) {
        Ok(odata) => EntraError::GraphApi {
            status: status.as_u16(),
            code: odata.error.code,
            message: odata.error.message,
        },
        Err(_) => EntraError::GraphApi {
            status: status.as_u16(),
            code: status
                .canonical_reason()
                .unwrap_or("UnknownError")
                .to_string(),
            message: body,
        },
    }
}
