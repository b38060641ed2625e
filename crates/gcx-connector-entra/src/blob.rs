//! Source-group lookup from per-department sync documents in blob storage.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use gcx_onboard::{GroupIdResolver, ResolverError};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use crate::{EntraError, EntraResult};

/// Sync document written by the B2B group sync for each department.
///
/// Only the fields needed to find the source group are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncConfigDocument {
    #[serde(default)]
    pub dept_alias: Option<String>,
    #[serde(rename = "B2BGroupSyncAlias", default)]
    pub b2b_group_sync_alias: Option<String>,
    #[serde(default)]
    pub group_alias_to_resource_tenant_group_object_id_mapping: HashMap<String, ResourceTenantGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceTenantGroup {
    #[serde(rename = "ResourceTenantGroupObjectId")]
    pub object_id: String,
}

impl SyncConfigDocument {
    /// Decodes a document, reporting problems against `name`.
    pub fn parse(name: &str, contents: &str) -> Result<Self, ResolverError> {
        // Blob text is often saved with a byte-order mark.
        serde_json::from_str(contents.trim_start_matches('\u{feff}')).map_err(|e| {
            ResolverError::Malformed {
                name: name.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Source group object id.
    ///
    /// Uses the entry named by `B2BGroupSyncAlias` when present, otherwise
    /// the only entry of the mapping.
    pub fn source_group_id(&self, name: &str) -> Result<String, ResolverError> {
        let malformed = |message: String| ResolverError::Malformed {
            name: name.to_string(),
            message,
        };
        let mapping = &self.group_alias_to_resource_tenant_group_object_id_mapping;

        let by_alias = self
            .b2b_group_sync_alias
            .as_deref()
            .and_then(|alias| mapping.get(alias));
        let mut entries = mapping.values();
        let entry = match (by_alias, entries.next(), entries.next()) {
            (Some(entry), _, _) | (None, Some(entry), None) => entry,
            (None, None, _) => return Err(malformed("group mapping is empty".to_string())),
            (None, Some(_), Some(_)) => {
                return Err(malformed(format!(
                    "{} group mappings and no matching B2BGroupSyncAlias",
                    mapping.len()
                )))
            }
        };

        let id = Uuid::parse_str(entry.object_id.trim()).map_err(|e| {
            malformed(format!(
                "ResourceTenantGroupObjectId '{}' is not a GUID: {e}",
                entry.object_id
            ))
        })?;
        Ok(id.to_string())
    }
}

/// Fetches `{container}/{abbreviation}{suffix}` over HTTPS.
pub struct BlobGroupIdResolver {
    http_client: reqwest::Client,
    container_url: String,
    sas_token: Option<SecretString>,
    file_suffix: String,
}

impl BlobGroupIdResolver {
    /// # Errors
    ///
    /// Returns an error if `container_url` is not an absolute http(s) URL
    /// without a query, or if the HTTP client cannot be created.
    pub fn new(
        container_url: impl Into<String>,
        sas_token: Option<SecretString>,
        file_suffix: impl Into<String>,
    ) -> EntraResult<Self> {
        let container_url = Url::parse(container_url.into().trim())?;
        if !matches!(container_url.scheme(), "http" | "https") {
            return Err(EntraError::Config(format!(
                "Sync container URL must use http or https, got '{}'",
                container_url.scheme()
            )));
        }
        if container_url.query().is_some() {
            return Err(EntraError::Config(
                "Sync container URL must not carry a query; pass the SAS token separately"
                    .to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EntraError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            container_url: container_url.as_str().trim_end_matches('/').to_string(),
            sas_token,
            file_suffix: file_suffix.into(),
        })
    }

    fn document_name(&self, abbreviation: &str) -> String {
        format!("{abbreviation}{}", self.file_suffix)
    }

    fn document_url(&self, name: &str) -> String {
        let mut url = format!("{}/{}", self.container_url, urlencoding::encode(name));
        if let Some(sas) = &self.sas_token {
            url.push('?');
            url.push_str(sas.expose_secret().trim_start_matches('?'));
        }
        url
    }
}

#[async_trait]
impl GroupIdResolver for BlobGroupIdResolver {
    #[instrument(skip(self))]
    async fn resolve_source_group_id(&self, abbreviation: &str) -> Result<String, ResolverError> {
        let name = self.document_name(abbreviation);
        let response = self
            .http_client
            .get(self.document_url(&name))
            .send()
            .await
            .map_err(EntraError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ResolverError::NotFound(name));
        }
        if !status.is_success() {
            return Err(ResolverError::Store(format!(
                "GET {name} returned {status}"
            )));
        }

        let contents = response.text().await.map_err(EntraError::from)?;
        let group_id = SyncConfigDocument::parse(&name, &contents)?.source_group_id(&name)?;
        debug!(group_id = %group_id, "Resolved source group");
        Ok(group_id)
    }
}
