//! GCX onboarding sync engine.
//!
//! Admits users newly added to a department's source security group into the
//! shared "assigned" group and one of several capacity-limited "welcome"
//! groups. The engine only talks to the outside world through traits, so the
//! directory backend, the department list, the sync-document store and mail
//! delivery can all be swapped out (see `gcx-connector-entra` for the
//! Microsoft Graph implementations).
//!
//! # Components
//!
//! - [`DirectoryClient`] - paginated membership queries, member counts and
//!   batched membership patches
//! - [`DeltaDetector`] - users created after a department's last sync
//! - [`WelcomeGroupTable`] - first-fit capacity allocation across welcome groups
//! - [`AdmissionEngine`] - batched admission with duplicate-member reconciliation
//! - [`SyncOrchestrator`] - drives one run over every synced department
//!
//! # Example
//!
//! ```ignore
//! use gcx_onboard::{Notifier, SyncOrchestrator, SyncSettings};
//!
//! let (notifier, worker) = Notifier::spawn(sink, 64);
//! let settings = SyncSettings::new(assigned_group_id, welcome_group_ids);
//! let orchestrator = SyncOrchestrator::new(directory, departments, resolver, notifier, settings);
//!
//! let report = orchestrator.run_sync().await;
//! drop(orchestrator);
//! worker.shutdown().await;
//! ```

mod admission;
mod allocator;
mod delta;
mod department;
mod directory;
mod error;
mod notify;
mod orchestrator;

pub use admission::{
    partition, AdmissionEngine, AdmissionOutcome, AssignmentBatch, TargetGroup, TargetOutcome,
    DEFAULT_BATCH_SIZE,
};
pub use allocator::{WelcomeGroup, WelcomeGroupTable, DEFAULT_WELCOME_GROUP_LIMIT};
pub use delta::DeltaDetector;
pub use department::{Department, DepartmentListing, DepartmentSource, GroupIdResolver};
pub use directory::{
    existing_members, list_group_members, CandidateUser, DirectoryClient, DirectoryMember,
    MemberFilter, MemberPage, MAX_ID_FILTER_VALUES,
};
pub use error::{
    DepartmentSourceError, DirectoryError, DirectoryResult, NotifyError, ResolverError, SyncError,
    SyncResult,
};
pub use notify::{
    DispatchStats, LogSink, Notification, NotificationSink, Notifier, NotifierWorker,
};
pub use orchestrator::{
    DepartmentPhase, DepartmentReport, DepartmentStatus, SyncOrchestrator, SyncRunReport,
    SyncSettings,
};
