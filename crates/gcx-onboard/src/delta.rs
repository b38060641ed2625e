//! Detection of users added to a department's source group since its cursor.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tracing::{debug, info, instrument};

use crate::directory::{
    list_group_members, CandidateUser, DirectoryClient, DirectoryMember, MemberFilter,
};
use crate::error::DirectoryResult;

/// Finds users created strictly after a cursor in a source group.
///
/// The backend does not reliably support a strict "greater than" on
/// `createdDateTime` together with field selection, so the query asks for
/// `createdDateTime ge cursor` and the strict comparison happens here. Without
/// the second filter the boundary user would be onboarded again on every run.
pub struct DeltaDetector {
    client: Arc<dyn DirectoryClient>,
}

impl DeltaDetector {
    /// Creates a detector over the given directory.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// Returns new members of `group_id` in discovery order, without duplicates.
    ///
    /// An empty result is not an error.
    #[instrument(skip_all, fields(group_id = %group_id, cursor = %cursor))]
    pub async fn detect(
        &self,
        group_id: &str,
        cursor: DateTime<Utc>,
    ) -> DirectoryResult<Vec<CandidateUser>> {
        let mut members = list_group_members(
            self.client.as_ref(),
            group_id,
            MemberFilter::CreatedOnOrAfter(cursor),
        );

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut scanned = 0usize;

        while let Some(member) = members.try_next().await? {
            scanned += 1;
            let Some(candidate) = accept(member, cursor) else {
                continue;
            };
            if seen.insert(candidate.id.clone()) {
                candidates.push(candidate);
            } else {
                debug!(user_id = %candidate.id, "Skipping duplicate member across pages");
            }
        }

        info!(
            scanned,
            candidates = candidates.len(),
            "Delta detection completed"
        );

        Ok(candidates)
    }
}

/// Applies the strict client-side filter.
fn accept(member: DirectoryMember, cursor: DateTime<Utc>) -> Option<CandidateUser> {
    match member.created_at {
        Some(created_at) if created_at > cursor => Some(CandidateUser {
            id: member.id,
            display_name: member.display_name,
            created_at,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn member(id: &str, created_at: Option<DateTime<Utc>>) -> DirectoryMember {
        DirectoryMember {
            id: id.to_string(),
            display_name: None,
            created_at,
        }
    }

    #[test]
    fn test_boundary_member_is_rejected() {
        let cursor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(accept(member("u1", Some(cursor)), cursor).is_none());
    }

    #[test]
    fn test_member_after_cursor_is_accepted() {
        let cursor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let candidate = accept(member("u1", Some(created)), cursor).unwrap();
        assert_eq!(candidate.id, "u1");
        assert_eq!(candidate.created_at, created);
    }

    #[test]
    fn test_member_without_creation_time_is_rejected() {
        let cursor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(accept(member("legacy", None), cursor).is_none());
    }
}
