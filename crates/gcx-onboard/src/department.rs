//! Departments and the collaborators that describe them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DepartmentSourceError, ResolverError};

/// A department whose source group is synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
    /// Identifier of the record holding the department in its list.
    pub item_id: String,
    /// Business code (RG code).
    pub code: String,
    pub abbreviation: String,
    /// Known source group id; resolved from the abbreviation when absent.
    pub source_group_id: Option<String>,
    /// Last successfully synced point; `None` until an operator sets one.
    pub last_sync_cursor: Option<DateTime<Utc>>,
}

impl Department {
    /// Human-readable identity for logs and notifications.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({})", self.abbreviation, self.code)
    }
}

/// Departments read from a source, plus the items that could not be read.
#[derive(Debug, Default)]
pub struct DepartmentListing {
    /// Departments to sync, in processing order.
    pub departments: Vec<Department>,
    /// Items skipped this run, each as a [`DepartmentSourceError::InvalidItem`].
    pub invalid_items: Vec<DepartmentSourceError>,
}

impl From<Vec<Department>> for DepartmentListing {
    fn from(departments: Vec<Department>) -> Self {
        Self {
            departments,
            invalid_items: Vec::new(),
        }
    }
}

/// Source of synced departments and owner of their cursors.
#[async_trait]
pub trait DepartmentSource: Send + Sync {
    /// Lists departments to sync, in processing order.
    ///
    /// An item that cannot be mapped to a department does not fail the
    /// listing; it is returned in [`DepartmentListing::invalid_items`].
    async fn list_synced_departments(&self) -> Result<DepartmentListing, DepartmentSourceError>;

    /// Persists a new cursor for `department`.
    async fn advance_cursor(
        &self,
        department: &Department,
        cursor: DateTime<Utc>,
    ) -> Result<(), DepartmentSourceError>;
}

/// Maps a department abbreviation to its source security group id.
#[async_trait]
pub trait GroupIdResolver: Send + Sync {
    async fn resolve_source_group_id(&self, abbreviation: &str) -> Result<String, ResolverError>;
}
