//! Synced-department list kept in a SharePoint list.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gcx_onboard::{Department, DepartmentListing, DepartmentSource, DepartmentSourceError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::graph_client::{Consistency, GraphClient};

#[derive(Debug, Deserialize)]
struct ListItem {
    id: String,
    #[serde(default)]
    fields: ItemFields,
}

#[derive(Debug, Default, Deserialize)]
struct ItemFields {
    #[serde(rename = "Abbreviation")]
    abbreviation: Option<String>,
    /// Text or number, depending on how the column was created.
    #[serde(rename = "RGCode")]
    rg_code: Option<Value>,
    #[serde(rename = "LastSyncDate")]
    last_sync_date: Option<String>,
}

/// Reads departments from a SharePoint list and stores each department's
/// cursor in its `LastSyncDate` column.
pub struct SharePointDepartmentSource {
    client: Arc<GraphClient>,
    site_id: String,
    list_id: String,
}

impl SharePointDepartmentSource {
    pub fn new(
        client: Arc<GraphClient>,
        site_id: impl Into<String>,
        list_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            site_id: site_id.into(),
            list_id: list_id.into(),
        }
    }

    fn items_path(&self) -> String {
        format!(
            "sites/{}/lists/{}/items",
            urlencoding::encode(&self.site_id),
            urlencoding::encode(&self.list_id)
        )
    }
}

fn department_from_item(item: ListItem) -> Result<Department, DepartmentSourceError> {
    let invalid = |message: &str| DepartmentSourceError::InvalidItem {
        item_id: item.id.clone(),
        message: message.to_string(),
    };

    let abbreviation = item
        .fields
        .abbreviation
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| invalid("missing Abbreviation"))?
        .to_string();

    let code = match &item.fields.rg_code {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let last_sync_cursor = match item.fields.last_sync_date.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| invalid(&format!("LastSyncDate '{raw}': {e}")))?
                .with_timezone(&Utc),
        ),
    };

    Ok(Department {
        item_id: item.id,
        code,
        abbreviation,
        source_group_id: None,
        last_sync_cursor,
    })
}

#[async_trait]
impl DepartmentSource for SharePointDepartmentSource {
    #[instrument(skip(self), fields(list_id = %self.list_id))]
    async fn list_synced_departments(&self) -> Result<DepartmentListing, DepartmentSourceError> {
        let url = format!(
            "{}?expand=fields(select=Abbreviation,RGCode,LastSyncDate)",
            self.client.url(&self.items_path())
        );

        let mut listing = DepartmentListing::default();
        self.client
            .get_paginated(&url, Consistency::Session, |items: Vec<ListItem>| {
                for item in items {
                    match department_from_item(item) {
                        Ok(department) => listing.departments.push(department),
                        Err(e) => {
                            warn!(error = %e, "Skipping department list item");
                            listing.invalid_items.push(e);
                        }
                    }
                }
                Ok(())
            })
            .await?;

        info!(
            count = listing.departments.len(),
            skipped = listing.invalid_items.len(),
            "Listed synced departments"
        );
        Ok(listing)
    }

    #[instrument(skip(self, department), fields(item_id = %department.item_id))]
    async fn advance_cursor(
        &self,
        department: &Department,
        cursor: DateTime<Utc>,
    ) -> Result<(), DepartmentSourceError> {
        let url = self.client.url(&format!(
            "{}/{}/fields",
            self.items_path(),
            urlencoding::encode(&department.item_id)
        ));
        let value = cursor.to_rfc3339_opts(SecondsFormat::Secs, true);

        self.client
            .patch(&url, &json!({ "LastSyncDate": value }))
            .await?;
        info!(cursor = %value, "Advanced department cursor");
        Ok(())
    }
}
