//! Graph connection settings and credentials.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::rate_limit::RateLimitConfig;
use crate::{EntraError, EntraResult};

/// National cloud hosting the tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntraCloudEnvironment {
    #[default]
    Commercial,
    UsGovernment,
    China,
}

impl EntraCloudEnvironment {
    /// Azure AD authority host.
    #[must_use]
    pub fn login_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
        }
    }

    /// Microsoft Graph host.
    #[must_use]
    pub fn graph_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial => "https://graph.microsoft.com",
            Self::UsGovernment => "https://graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }
}

impl FromStr for EntraCloudEnvironment {
    type Err = EntraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commercial" | "global" | "public" => Ok(Self::Commercial),
            "us_government" | "usgov" | "gcc_high" => Ok(Self::UsGovernment),
            "china" => Ok(Self::China),
            other => Err(EntraError::Config(format!("unknown cloud environment '{other}'"))),
        }
    }
}

impl fmt::Display for EntraCloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commercial => write!(f, "commercial"),
            Self::UsGovernment => write!(f, "us_government"),
            Self::China => write!(f, "china"),
        }
    }
}

/// A user account signed in with the resource-owner password grant.
#[derive(Debug, Clone)]
pub struct DelegatedAccount {
    pub username: String,
    pub password: SecretString,
}

/// App registration used to obtain Graph tokens.
///
/// With `delegated` set, tokens are issued for that user; otherwise the app
/// authenticates as itself.
#[derive(Debug, Clone)]
pub struct EntraCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub delegated: Option<DelegatedAccount>,
}

impl EntraCredentials {
    /// Client-credentials app identity.
    pub fn app(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            delegated: None,
        }
    }

    /// Same app, acting for `account`.
    #[must_use]
    pub fn acting_as(mut self, account: DelegatedAccount) -> Self {
        self.delegated = Some(account);
        self
    }
}

/// Graph connection settings.
#[derive(Debug, Clone)]
pub struct EntraConfig {
    pub tenant_id: String,
    pub cloud: EntraCloudEnvironment,
    pub api_version: String,
    /// `$top` for membership queries.
    pub page_size: u32,
    pub request_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    graph_endpoint: Option<String>,
    login_endpoint: Option<String>,
}

impl EntraConfig {
    #[must_use]
    pub fn builder() -> EntraConfigBuilder {
        EntraConfigBuilder::default()
    }

    /// Graph host, honouring any override.
    #[must_use]
    pub fn graph_endpoint(&self) -> &str {
        self.graph_endpoint
            .as_deref()
            .unwrap_or_else(|| self.cloud.graph_endpoint())
    }

    /// Versioned Graph root, e.g. `https://graph.microsoft.com/v1.0`.
    #[must_use]
    pub fn graph_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.graph_endpoint().trim_end_matches('/'),
            self.api_version
        )
    }

    /// OAuth2 v2 token endpoint for the tenant.
    #[must_use]
    pub fn token_url(&self) -> String {
        let login = self
            .login_endpoint
            .as_deref()
            .unwrap_or_else(|| self.cloud.login_endpoint());
        format!(
            "{}/{}/oauth2/v2.0/token",
            login.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// Scope requested for Graph tokens. Always the cloud's real Graph host.
    #[must_use]
    pub fn scope(&self) -> String {
        format!("{}/.default", self.cloud.graph_endpoint())
    }
}

/// Builder for [`EntraConfig`].
#[derive(Debug, Default)]
pub struct EntraConfigBuilder {
    tenant_id: Option<String>,
    cloud: EntraCloudEnvironment,
    api_version: Option<String>,
    page_size: Option<u32>,
    request_timeout: Option<Duration>,
    rate_limit: Option<RateLimitConfig>,
    graph_endpoint: Option<String>,
    login_endpoint: Option<String>,
}

impl EntraConfigBuilder {
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn cloud(mut self, cloud: EntraCloudEnvironment) -> Self {
        self.cloud = cloud;
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Overrides the Graph host (tests point this at a mock server).
    #[must_use]
    pub fn graph_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.graph_endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the authority host.
    #[must_use]
    pub fn login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = Some(endpoint.into());
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EntraError::Config`] if the tenant id is missing or the page
    /// size is outside 1..=999.
    pub fn build(self) -> EntraResult<EntraConfig> {
        let tenant_id = self
            .tenant_id
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| EntraError::Config("tenant_id is required".to_string()))?;

        let page_size = self.page_size.unwrap_or(999);
        if !(1..=999).contains(&page_size) {
            return Err(EntraError::Config(format!(
                "page_size must be between 1 and 999, got {page_size}"
            )));
        }

        let rate_limit = self.rate_limit.unwrap_or_default();
        rate_limit.validate().map_err(EntraError::Config)?;

        Ok(EntraConfig {
            tenant_id,
            cloud: self.cloud,
            api_version: self.api_version.unwrap_or_else(|| "v1.0".to_string()),
            page_size,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
            rate_limit,
            graph_endpoint: self.graph_endpoint,
            login_endpoint: self.login_endpoint,
        })
    }
}
