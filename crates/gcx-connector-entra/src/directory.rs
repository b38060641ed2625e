//! [`DirectoryClient`] over Microsoft Graph groups.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcx_onboard::{
    DirectoryClient, DirectoryError, DirectoryMember, DirectoryResult, MemberFilter, MemberPage,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::graph_client::{Consistency, GraphClient, ODataResponse};

/// Graph's limit on `members@odata.bind` entries in one group PATCH.
pub const MAX_MEMBERS_PER_PATCH: usize = 20;

const MEMBER_SELECT: &str = "id,displayName,createdDateTime";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    display_name: Option<String>,
    created_date_time: Option<DateTime<Utc>>,
}

impl From<GraphUser> for DirectoryMember {
    fn from(user: GraphUser) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            created_at: user.created_date_time,
        }
    }
}

/// Graph-backed directory.
///
/// Reads and writes may use different clients, each with its own
/// credentials: one account lists source groups, another can write to the
/// welcome groups.
pub struct EntraDirectory {
    reader: Arc<GraphClient>,
    writer: Arc<GraphClient>,
    page_size: u32,
}

impl EntraDirectory {
    pub fn new(reader: Arc<GraphClient>, writer: Arc<GraphClient>, page_size: u32) -> Self {
        Self {
            reader,
            writer,
            page_size,
        }
    }

    fn members_url(&self, group_id: &str, filter: &MemberFilter) -> String {
        let path = format!(
            "groups/{}/members/microsoft.graph.user",
            urlencoding::encode(group_id)
        );
        format!(
            "{}?$filter={}&$select={}&$count=true&$top={}",
            self.reader.url(&path),
            urlencoding::encode(&filter_expression(filter)),
            MEMBER_SELECT,
            self.page_size
        )
    }
}

/// OData `$filter` text for a membership query.
pub(crate) fn filter_expression(filter: &MemberFilter) -> String {
    match filter {
        MemberFilter::CreatedOnOrAfter(since) => format!(
            "createdDateTime ge {}",
            since.format("%Y-%m-%dT%H:%M:%SZ")
        ),
        MemberFilter::IdIn(ids) => {
            let quoted: Vec<String> = ids
                .iter()
                .map(|id| format!("'{}'", id.replace('\'', "''")))
                .collect();
            format!("id in ({})", quoted.join(","))
        }
    }
}

#[async_trait]
impl DirectoryClient for EntraDirectory {
    #[instrument(skip(self, filter, next_link), fields(continuation = next_link.is_some()))]
    async fn member_page(
        &self,
        group_id: &str,
        filter: &MemberFilter,
        next_link: Option<&str>,
    ) -> DirectoryResult<MemberPage> {
        let url = match next_link {
            Some(link) => link.to_string(),
            None => self.members_url(group_id, filter),
        };

        let page: ODataResponse<GraphUser> =
            self.reader.get(&url, Consistency::Eventual).await?;
        debug!(count = page.value.len(), "Fetched member page");

        Ok(MemberPage {
            members: page.value.into_iter().map(DirectoryMember::from).collect(),
            next_link: page.next_link,
        })
    }

    #[instrument(skip(self))]
    async fn member_count(&self, group_id: &str) -> DirectoryResult<u64> {
        let url = self.reader.url(&format!(
            "groups/{}/members/$count",
            urlencoding::encode(group_id)
        ));
        Ok(self.reader.get_count(&url).await?)
    }

    #[instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    async fn add_members(&self, group_id: &str, user_ids: &[String]) -> DirectoryResult<()> {
        if user_ids.len() > MAX_MEMBERS_PER_PATCH {
            return Err(DirectoryError::Api {
                code: "TooManyMembers".to_string(),
                message: format!(
                    "{} members in one patch, Graph accepts at most {MAX_MEMBERS_PER_PATCH}",
                    user_ids.len()
                ),
            });
        }
        if user_ids.is_empty() {
            return Ok(());
        }

        let binds: Vec<String> = user_ids
            .iter()
            .map(|id| self.writer.url(&format!("directoryObjects/{id}")))
            .collect();
        let url = self
            .writer
            .url(&format!("groups/{}", urlencoding::encode(group_id)));

        self.writer
            .patch(&url, &json!({ "members@odata.bind": binds }))
            .await?;
        Ok(())
    }
}
