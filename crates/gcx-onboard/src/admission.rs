//! Batched admission of users into the assigned and welcome groups.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::directory::{existing_members, DirectoryClient};

/// Default number of users per membership patch (the backend's per-request limit).
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// A slice of a department's candidates submitted as one membership patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentBatch {
    /// Zero-based position of the batch within the department's run.
    pub index: usize,
    pub user_ids: Vec<String>,
}

impl AssignmentBatch {
    /// Number of users in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Returns true if the batch holds no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// Splits `user_ids` into consecutive batches of at most `batch_size`, keeping order.
///
/// Every id lands in exactly one batch. A `batch_size` of zero is treated as one.
#[must_use]
pub fn partition(user_ids: &[String], batch_size: usize) -> Vec<AssignmentBatch> {
    user_ids
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| AssignmentBatch {
            index,
            user_ids: chunk.to_vec(),
        })
        .collect()
}

/// Which of the two destination groups an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetGroup {
    Assigned,
    Welcome,
}

impl TargetGroup {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetGroup::Assigned => "assigned",
            TargetGroup::Welcome => "welcome",
        }
    }
}

impl fmt::Display for TargetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of admitting one batch into one target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// The first patch succeeded.
    Admitted { added: usize },
    /// The first patch hit a duplicate-member conflict and reconciliation
    /// finished the job; `retried` is zero when every id was already present.
    Reconciled {
        already_present: usize,
        retried: usize,
    },
    /// The group was left without some of the batch's users.
    Failed {
        reason: String,
        residual_ids: Vec<String>,
    },
}

impl TargetOutcome {
    /// Returns true unless the outcome is [`TargetOutcome::Failed`].
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !matches!(self, TargetOutcome::Failed { .. })
    }
}

/// Result of admitting one batch into both target groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionOutcome {
    pub batch_index: usize,
    pub assigned_group_id: String,
    pub welcome_group_id: String,
    pub assigned: TargetOutcome,
    pub welcome: TargetOutcome,
}

impl AdmissionOutcome {
    /// Returns true if both target groups now contain every user of the batch.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.assigned.succeeded() && self.welcome.succeeded()
    }

    /// Accumulated failure text keyed by target group, or `None` on success.
    #[must_use]
    pub fn diagnostics(&self) -> Option<String> {
        let lines: Vec<String> = [
            (TargetGroup::Assigned, &self.assigned_group_id, &self.assigned),
            (TargetGroup::Welcome, &self.welcome_group_id, &self.welcome),
        ]
        .into_iter()
        .filter_map(|(target, group_id, outcome)| match outcome {
            TargetOutcome::Failed {
                reason,
                residual_ids,
            } => Some(format!(
                "batch {} {} group {}: {} (residual: {})",
                self.batch_index,
                target,
                group_id,
                reason,
                residual_ids.join(", ")
            )),
            _ => None,
        })
        .collect();

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Submits batches to the assigned and welcome groups, healing duplicate-member
/// conflicts.
pub struct AdmissionEngine {
    client: Arc<dyn DirectoryClient>,
}

impl AdmissionEngine {
    /// Creates an engine over the given directory.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// Admits `batch` into both groups.
    ///
    /// The two groups are independent write paths: a failure against one does
    /// not prevent the attempt against the other.
    #[instrument(
        skip_all,
        fields(
            batch = batch.index,
            size = batch.len(),
            assigned = %assigned_group_id,
            welcome = %welcome_group_id
        )
    )]
    pub async fn admit(
        &self,
        batch: &AssignmentBatch,
        assigned_group_id: &str,
        welcome_group_id: &str,
    ) -> AdmissionOutcome {
        let assigned = self
            .admit_to(TargetGroup::Assigned, assigned_group_id, &batch.user_ids)
            .await;
        let welcome = self
            .admit_to(TargetGroup::Welcome, welcome_group_id, &batch.user_ids)
            .await;

        AdmissionOutcome {
            batch_index: batch.index,
            assigned_group_id: assigned_group_id.to_string(),
            welcome_group_id: welcome_group_id.to_string(),
            assigned,
            welcome,
        }
    }

    async fn admit_to(
        &self,
        target: TargetGroup,
        group_id: &str,
        user_ids: &[String],
    ) -> TargetOutcome {
        match self.client.add_members(group_id, user_ids).await {
            Ok(()) => {
                info!(%target, group_id, added = user_ids.len(), "Batch admitted");
                TargetOutcome::Admitted {
                    added: user_ids.len(),
                }
            }
            Err(e) if e.is_already_member() => {
                warn!(
                    %target,
                    group_id,
                    error = %e,
                    "Some users are already members, reconciling"
                );
                self.reconcile(group_id, user_ids).await
            }
            Err(e) => {
                warn!(%target, group_id, error = %e, "Batch admission failed");
                TargetOutcome::Failed {
                    reason: e.to_string(),
                    residual_ids: user_ids.to_vec(),
                }
            }
        }
    }

    /// Strips ids that are already members of `group_id` and retries the patch
    /// once with whatever is left.
    #[instrument(skip(self, user_ids), fields(size = user_ids.len()))]
    pub async fn reconcile(&self, group_id: &str, user_ids: &[String]) -> TargetOutcome {
        let present = match existing_members(self.client.as_ref(), group_id, user_ids).await {
            Ok(present) => present,
            Err(e) => {
                return TargetOutcome::Failed {
                    reason: format!("membership check failed: {e}"),
                    residual_ids: user_ids.to_vec(),
                };
            }
        };

        let residual: Vec<String> = user_ids
            .iter()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        let already_present = user_ids.len() - residual.len();

        if residual.is_empty() {
            info!(already_present, "All users already members, nothing to retry");
            return TargetOutcome::Reconciled {
                already_present,
                retried: 0,
            };
        }

        match self.client.add_members(group_id, &residual).await {
            Ok(()) => {
                info!(
                    already_present,
                    retried = residual.len(),
                    "Residual users admitted after reconciliation"
                );
                TargetOutcome::Reconciled {
                    already_present,
                    retried: residual.len(),
                }
            }
            Err(e) => {
                warn!(error = %e, residual = residual.len(), "Retry after reconciliation failed");
                TargetOutcome::Failed {
                    reason: e.to_string(),
                    residual_ids: residual,
                }
            }
        }
    }
}
