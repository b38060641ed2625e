//! Directory client capability consumed by the engine.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::DirectoryResult;

/// Largest number of ids the backend accepts in a single `id in (...)` filter.
pub const MAX_ID_FILTER_VALUES: usize = 15;

/// A user member of a directory group, as returned by a membership query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMember {
    pub id: String,
    pub display_name: Option<String>,
    /// Absent for accounts created before the directory tracked creation time.
    pub created_at: Option<DateTime<Utc>>,
}

/// A user selected for onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUser {
    pub id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-side filter for a membership query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberFilter {
    /// Members created at or after the timestamp (inclusive).
    CreatedOnOrAfter(DateTime<Utc>),
    /// Members whose id is one of the given ids.
    IdIn(Vec<String>),
}

/// One page of a membership query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    pub members: Vec<DirectoryMember>,
    /// Continuation link; `None` on the last page.
    pub next_link: Option<String>,
}

/// Capability over the external directory.
///
/// Implementations must request relaxed ("eventual") consistency for filtered
/// and counted queries. Callers re-check membership instead of trusting the
/// freshness of query results.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetches one page of user members of `group_id` matching `filter`.
    ///
    /// `next_link` is the continuation returned by the previous page, or
    /// `None` to start the query.
    async fn member_page(
        &self,
        group_id: &str,
        filter: &MemberFilter,
        next_link: Option<&str>,
    ) -> DirectoryResult<MemberPage>;

    /// Returns the number of members of `group_id`.
    async fn member_count(&self, group_id: &str) -> DirectoryResult<u64>;

    /// Adds `user_ids` to `group_id` in a single patch.
    async fn add_members(&self, group_id: &str, user_ids: &[String]) -> DirectoryResult<()>;
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily lists every member of `group_id` matching `filter`, following
/// continuation links until the query is exhausted.
///
/// The stream cannot be resumed mid-query; re-issue it to start over.
pub fn list_group_members<'a, C>(
    client: &'a C,
    group_id: &'a str,
    filter: MemberFilter,
) -> BoxStream<'a, DirectoryResult<DirectoryMember>>
where
    C: DirectoryClient + ?Sized,
{
    stream::try_unfold(Cursor::Start, move |cursor| {
        let filter = filter.clone();
        async move { next_page(client, group_id, &filter, cursor).await }
    })
    .map_ok(|members| stream::iter(members.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

async fn next_page<C>(
    client: &C,
    group_id: &str,
    filter: &MemberFilter,
    cursor: Cursor,
) -> DirectoryResult<Option<(Vec<DirectoryMember>, Cursor)>>
where
    C: DirectoryClient + ?Sized,
{
    let next_link = match cursor {
        Cursor::Start => None,
        Cursor::Next(link) => Some(link),
        Cursor::Done => return Ok(None),
    };

    let page = client
        .member_page(group_id, filter, next_link.as_deref())
        .await?;
    let cursor = page.next_link.map_or(Cursor::Done, Cursor::Next);

    Ok(Some((page.members, cursor)))
}

/// Returns the subset of `user_ids` that are currently members of `group_id`.
///
/// Queries in chunks of [`MAX_ID_FILTER_VALUES`].
pub async fn existing_members<C>(
    client: &C,
    group_id: &str,
    user_ids: &[String],
) -> DirectoryResult<HashSet<String>>
where
    C: DirectoryClient + ?Sized,
{
    let wanted: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
    let mut present = HashSet::new();

    for chunk in user_ids.chunks(MAX_ID_FILTER_VALUES) {
        let members: Vec<DirectoryMember> =
            list_group_members(client, group_id, MemberFilter::IdIn(chunk.to_vec()))
                .try_collect()
                .await?;
        // Only trust ids that were asked about.
        present.extend(
            members
                .into_iter()
                .filter(|m| wanted.contains(m.id.as_str()))
                .map(|m| m.id),
        );
    }

    Ok(present)
}
