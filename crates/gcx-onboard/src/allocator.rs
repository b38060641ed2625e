//! First-fit allocation of admission batches to capacity-limited welcome groups.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::directory::DirectoryClient;

/// Default member ceiling for a welcome group, kept below the backend's hard cap.
pub const DEFAULT_WELCOME_GROUP_LIMIT: u64 = 24_900;

/// A welcome group and its running member count for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeGroup {
    pub id: String,
    pub member_count: u64,
    pub capacity_limit: u64,
}

impl WelcomeGroup {
    /// Creates a welcome group entry.
    pub fn new(id: impl Into<String>, member_count: u64, capacity_limit: u64) -> Self {
        Self {
            id: id.into(),
            member_count,
            capacity_limit,
        }
    }

    /// Remaining room before the limit is reached.
    #[must_use]
    pub fn headroom(&self) -> u64 {
        self.capacity_limit.saturating_sub(self.member_count)
    }

    /// Returns true if `incoming` more members keep the group within its limit.
    #[must_use]
    pub fn fits(&self, incoming: u64) -> bool {
        self.member_count
            .checked_add(incoming)
            .is_some_and(|total| total <= self.capacity_limit)
    }
}

/// Shared, lock-guarded working set of welcome groups for one run.
///
/// Counts are read from the directory once when the table is loaded. After
/// that they only move through [`WelcomeGroupTable::allocate`], which reserves
/// capacity optimistically; growth caused by anything outside this run is not
/// seen until the next run reloads the table. Cloning the table shares the
/// same state, so concurrent departments see each other's reservations.
#[derive(Debug, Clone, Default)]
pub struct WelcomeGroupTable {
    groups: Arc<Mutex<Vec<WelcomeGroup>>>,
    unavailable: Arc<Vec<String>>,
}

impl WelcomeGroupTable {
    /// Creates a table from already-known groups, in allocation order.
    pub fn new(groups: Vec<WelcomeGroup>) -> Self {
        Self {
            groups: Arc::new(Mutex::new(groups)),
            unavailable: Arc::default(),
        }
    }

    /// Records configured groups that were left out because their count
    /// could not be read.
    #[must_use]
    pub fn with_unavailable(mut self, group_ids: Vec<String>) -> Self {
        self.unavailable = Arc::new(group_ids);
        self
    }

    /// Loads member counts for `group_ids` in configuration order.
    ///
    /// A group whose count cannot be read is left out of this run's table and
    /// listed by [`WelcomeGroupTable::unavailable`].
    #[instrument(skip(client, group_ids), fields(groups = group_ids.len()))]
    pub async fn load<C>(client: &C, group_ids: &[String], capacity_limit: u64) -> Self
    where
        C: DirectoryClient + ?Sized,
    {
        let mut groups = Vec::with_capacity(group_ids.len());
        let mut unavailable = Vec::new();

        for id in group_ids {
            match client.member_count(id).await {
                Ok(member_count) => {
                    debug!(group_id = %id, member_count, "Loaded welcome group count");
                    groups.push(WelcomeGroup::new(id.clone(), member_count, capacity_limit));
                }
                Err(e) => {
                    warn!(
                        group_id = %id,
                        error = %e,
                        "Failed to load welcome group member count, excluding it from this run"
                    );
                    unavailable.push(id.clone());
                }
            }
        }

        info!(
            loaded = groups.len(),
            configured = group_ids.len(),
            "Welcome group table loaded"
        );

        Self::new(groups).with_unavailable(unavailable)
    }

    /// Configured groups excluded from this run, in configuration order.
    #[must_use]
    pub fn unavailable(&self) -> &[String] {
        &self.unavailable
    }

    /// Picks the first group, in configured order, that can take `batch_size`
    /// more members and reserves that capacity.
    ///
    /// Returns `None` when no group has room.
    pub async fn allocate(&self, batch_size: usize) -> Option<String> {
        let incoming = batch_size as u64;
        let mut groups = self.groups.lock().await;

        let group = groups.iter_mut().find(|g| g.fits(incoming))?;
        group.member_count += incoming;

        debug!(
            group_id = %group.id,
            batch_size,
            member_count = group.member_count,
            headroom = group.headroom(),
            "Allocated welcome group"
        );

        Some(group.id.clone())
    }

    /// Returns a copy of the current counts.
    pub async fn snapshot(&self) -> Vec<WelcomeGroup> {
        self.groups.lock().await.clone()
    }

    /// Number of groups available to this run.
    pub async fn len(&self) -> usize {
        self.groups.lock().await.len()
    }

    /// Returns true if no welcome group could be loaded.
    pub async fn is_empty(&self) -> bool {
        self.groups.lock().await.is_empty()
    }
}
