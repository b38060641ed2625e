//! Microsoft Graph adapters for GCX onboarding sync
//!
//! Implements the collaborator traits of `gcx-onboard` against Microsoft
//! Graph and Azure blob storage.
//!
//! # Features
//!
//! - `OAuth2` client credentials and delegated (password grant) authentication
//! - Group membership queries with eventual consistency and paging
//! - Batched membership patches with duplicate-member detection
//! - SharePoint list as the synced-department source and cursor store
//! - Sync documents in blob storage for source-group lookup
//! - Failure notifications through `sendMail`
//! - Multi-cloud support (Commercial, US Government, China)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gcx_connector_entra::{EntraConfig, EntraCredentials, EntraDirectory, GraphClient, TokenCache};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EntraConfig::builder()
//!     .tenant_id("your-tenant-id")
//!     .build()?;
//!
//! let credentials = EntraCredentials::app("your-client-id", "your-client-secret".to_string().into());
//! let tokens = Arc::new(TokenCache::new(&config, credentials));
//! let client = Arc::new(GraphClient::new(&config, tokens)?);
//!
//! let directory = EntraDirectory::new(client.clone(), client, config.page_size);
//! # Ok(())
//! # }
//! ```

mod auth;
mod blob;
mod circuit_breaker;
mod config;
mod departments;
mod directory;
mod error;
mod graph_client;
mod mail;
mod rate_limit;

// Re-exports
pub use auth::TokenCache;
pub use blob::{BlobGroupIdResolver, ResourceTenantGroup, SyncConfigDocument};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use config::{
    DelegatedAccount, EntraCloudEnvironment, EntraConfig, EntraConfigBuilder, EntraCredentials,
};
pub use departments::SharePointDepartmentSource;
pub use directory::{EntraDirectory, MAX_MEMBERS_PER_PATCH};
pub use error::{EntraError, EntraResult};
pub use graph_client::{Consistency, GraphClient, ODataError, ODataErrorBody, ODataResponse};
pub use mail::GraphMailSink;
pub use rate_limit::{RateLimitConfig, RateLimiter};
