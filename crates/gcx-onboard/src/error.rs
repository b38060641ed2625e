//! Error types for the onboarding engine and its collaborators.

use thiserror::Error;

/// Result type alias for directory calls.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures reported by a [`crate::DirectoryClient`].
///
/// Retries and backoff are the adapter's business; by the time one of these
/// reaches the engine the call is considered terminal.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backend rejected a membership patch because one or more of the
    /// ids are already members of the group.
    #[error("one or more users are already members: {message}")]
    AlreadyMember { message: String },

    /// Group or directory object does not exist.
    #[error("directory object not found: {0}")]
    NotFound(String),

    /// Any other API-level error returned by the backend.
    #[error("directory API error: {code} - {message}")]
    Api { code: String, message: String },

    /// The request never produced a usable response.
    #[error("directory transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The adapter gave up after repeated throttling.
    #[error("directory throttled, gave up after {attempts} attempts")]
    Throttled { attempts: u32 },

    /// The adapter is failing fast (circuit open).
    #[error("directory temporarily unavailable")]
    Unavailable,

    /// The backend answered with something the adapter could not decode.
    #[error("unexpected directory response: {0}")]
    Decode(String),
}

impl DirectoryError {
    /// Creates a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true for the duplicate-membership rejection that reconciliation can heal.
    #[must_use]
    pub fn is_already_member(&self) -> bool {
        matches!(self, Self::AlreadyMember { .. })
    }

    /// Returns true if a later run is likely to succeed without intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Throttled { .. } | Self::Unavailable
        )
    }
}

/// Failures resolving a department's source group id.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// No sync document (or no mapping entry) exists for the department.
    #[error("sync document not found: {0}")]
    NotFound(String),

    /// The sync document exists but cannot be interpreted.
    #[error("malformed sync document {name}: {message}")]
    Malformed { name: String, message: String },

    /// The document store could not be reached.
    #[error("sync document store error: {0}")]
    Store(String),
}

/// Failures reading departments or writing their cursors.
#[derive(Debug, Error)]
pub enum DepartmentSourceError {
    /// The list service failed.
    #[error("department list error: {0}")]
    Backend(String),

    /// A list item could not be mapped to a department.
    #[error("invalid department item {item_id}: {message}")]
    InvalidItem { item_id: String, message: String },
}

/// Failure delivering a notification.
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Failures of a department run, caught at the department boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The department has never been synced; an operator must set a start date.
    #[error("department {department} has no last sync date")]
    MissingCursor { department: String },

    /// The department's source group could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The department's sync document could not be read or interpreted.
    #[error(transparent)]
    Resolver(ResolverError),

    /// No welcome group has room for the batch.
    #[error("no welcome group has capacity for a batch of {batch_size} users")]
    CapacityExhausted { batch_size: usize },

    /// No readable welcome group has room for the batch and some configured
    /// groups were left out because their member count could not be read.
    #[error(
        "no readable welcome group has capacity for a batch of {batch_size} users; \
         member count unavailable for: {}",
        .groups.join(", ")
    )]
    WelcomeGroupsUnavailable { batch_size: usize, groups: Vec<String> },

    /// A directory call failed outright.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// A batch was not fully admitted; the text lists residual failures per group.
    #[error("admission failed:\n{0}")]
    Admission(String),

    /// The department list could not be loaded.
    #[error(transparent)]
    DepartmentSource(#[from] DepartmentSourceError),

    /// Users were admitted but the cursor write failed.
    #[error("users admitted but cursor was not advanced: {source}")]
    CursorAdvance {
        #[source]
        source: DepartmentSourceError,
    },
}

impl From<ResolverError> for SyncError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::NotFound(what) => Self::NotFound(what),
            other => Self::Resolver(other),
        }
    }
}

impl SyncError {
    /// Short, stable label for logs and notification subjects.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCursor { .. } => "missing_cursor",
            Self::NotFound(_) => "not_found",
            Self::Resolver(_) => "sync_document",
            Self::CapacityExhausted { .. } => "capacity_exhausted",
            Self::WelcomeGroupsUnavailable { .. } => "welcome_groups_unavailable",
            Self::Directory(_) => "directory",
            Self::Admission(_) => "admission",
            Self::DepartmentSource(_) => "department_source",
            Self::CursorAdvance { .. } => "cursor_advance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_not_found_maps_to_not_found() {
        let err: SyncError = ResolverError::NotFound("TBS_SyncConfig.json".into()).into();
        assert!(matches!(err, SyncError::NotFound(ref what) if what == "TBS_SyncConfig.json"));
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_resolver_malformed_stays_resolver() {
        let err: SyncError = ResolverError::Malformed {
            name: "x".into(),
            message: "bad".into(),
        }
        .into();
        assert_eq!(err.kind(), "sync_document");
        assert!(err.to_string().contains("malformed sync document x"));
    }

    #[test]
    fn test_welcome_groups_unavailable_names_groups() {
        let err = SyncError::WelcomeGroupsUnavailable {
            batch_size: 20,
            groups: vec!["w1".into(), "w2".into()],
        };
        assert_eq!(err.kind(), "welcome_groups_unavailable");
        assert!(err.to_string().contains("member count unavailable for: w1, w2"));
    }

    #[test]
    fn test_directory_error_classification() {
        assert!(DirectoryError::AlreadyMember {
            message: "exists".into()
        }
        .is_already_member());
        assert!(DirectoryError::Unavailable.is_transient());
        assert!(DirectoryError::Throttled { attempts: 3 }.is_transient());
        assert!(!DirectoryError::NotFound("g".into()).is_transient());
        assert!(!DirectoryError::Api {
            code: "Authorization_RequestDenied".into(),
            message: "no".into()
        }
        .is_transient());
    }
}
