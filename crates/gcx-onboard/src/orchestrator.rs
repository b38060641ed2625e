//! Drives one onboarding run across every synced department.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn, Instrument};

use crate::admission::{partition, AdmissionEngine, DEFAULT_BATCH_SIZE};
use crate::allocator::{WelcomeGroupTable, DEFAULT_WELCOME_GROUP_LIMIT};
use crate::delta::DeltaDetector;
use crate::department::{Department, DepartmentSource, GroupIdResolver};
use crate::directory::DirectoryClient;
use crate::error::{DepartmentSourceError, DirectoryError, SyncError};
use crate::notify::{html_escape, Notification, Notifier};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Group every admitted user joins.
    pub assigned_group_id: String,
    /// Welcome groups in allocation order.
    pub welcome_group_ids: Vec<String>,
    /// Member ceiling applied to every welcome group.
    pub welcome_group_limit: u64,
    /// Users per membership patch.
    pub batch_size: usize,
    /// Departments processed at the same time; 1 means strictly sequential.
    pub max_concurrent_departments: usize,
}

impl SyncSettings {
    /// Creates settings with default limits.
    pub fn new(assigned_group_id: impl Into<String>, welcome_group_ids: Vec<String>) -> Self {
        Self {
            assigned_group_id: assigned_group_id.into(),
            welcome_group_ids,
            welcome_group_limit: DEFAULT_WELCOME_GROUP_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_departments: 1,
        }
    }

    #[must_use]
    pub fn with_welcome_group_limit(mut self, limit: u64) -> Self {
        self.welcome_group_limit = limit;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_departments(mut self, max: usize) -> Self {
        self.max_concurrent_departments = max;
        self
    }
}

/// Step of a department's run; failures record where they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepartmentPhase {
    Resolving,
    Detecting,
    Allocating,
    Admitting,
    Advancing,
}

impl DepartmentPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DepartmentPhase::Resolving => "resolving",
            DepartmentPhase::Detecting => "detecting",
            DepartmentPhase::Allocating => "allocating",
            DepartmentPhase::Admitting => "admitting",
            DepartmentPhase::Advancing => "advancing",
        }
    }
}

impl fmt::Display for DepartmentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a department's run ended.
#[derive(Debug)]
pub enum DepartmentStatus {
    /// Every candidate was admitted and the cursor moved to `cursor`.
    Synced {
        admitted: usize,
        batches: usize,
        cursor: DateTime<Utc>,
    },
    /// The run stopped at `phase`; the cursor was not advanced unless the
    /// failure happened while advancing it.
    Failed {
        phase: DepartmentPhase,
        error: SyncError,
    },
}

/// Per-department facts of a run.
#[derive(Debug)]
pub struct DepartmentReport {
    pub code: String,
    pub abbreviation: String,
    /// Candidate user ids detected this run, in discovery order.
    pub candidates: Vec<String>,
    pub status: DepartmentStatus,
}

impl DepartmentReport {
    /// Returns true if the department synced completely.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.status, DepartmentStatus::Synced { .. })
    }
}

/// Result of one run. A run always completes; failures are per department.
#[derive(Debug)]
pub struct SyncRunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the department list itself could not be loaded.
    pub load_error: Option<SyncError>,
    /// List items that could not be read as departments and were skipped.
    pub skipped_items: Vec<DepartmentSourceError>,
    /// One report per department, in list order.
    pub departments: Vec<DepartmentReport>,
}

impl SyncRunReport {
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.departments.iter().filter(|d| d.succeeded()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.departments.len() - self.succeeded_count()
    }

    /// Returns true if the list loaded cleanly and every department synced.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.load_error.is_none() && self.skipped_items.is_empty() && self.failed_count() == 0
    }
}

struct DepartmentFailure {
    phase: DepartmentPhase,
    error: SyncError,
}

impl DepartmentFailure {
    fn at(phase: DepartmentPhase) -> impl FnOnce(SyncError) -> Self {
        move |error| Self { phase, error }
    }
}

struct DepartmentSynced {
    admitted: usize,
    batches: usize,
    cursor: DateTime<Utc>,
}

/// Runs onboarding for every synced department.
pub struct SyncOrchestrator {
    directory: Arc<dyn DirectoryClient>,
    departments: Arc<dyn DepartmentSource>,
    resolver: Arc<dyn GroupIdResolver>,
    notifier: Notifier,
    settings: SyncSettings,
    detector: DeltaDetector,
    admission: AdmissionEngine,
}

impl SyncOrchestrator {
    /// Creates an orchestrator from its collaborators.
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        departments: Arc<dyn DepartmentSource>,
        resolver: Arc<dyn GroupIdResolver>,
        notifier: Notifier,
        settings: SyncSettings,
    ) -> Self {
        Self {
            detector: DeltaDetector::new(Arc::clone(&directory)),
            admission: AdmissionEngine::new(Arc::clone(&directory)),
            directory,
            departments,
            resolver,
            notifier,
            settings,
        }
    }

    /// Returns the settings this orchestrator runs with.
    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Performs one run.
    ///
    /// The welcome group table is loaded fresh for the run and shared by every
    /// department in it. Cursors advance to the run's start time.
    #[instrument(skip(self))]
    pub async fn run_sync(&self) -> SyncRunReport {
        let started_at = Utc::now();
        info!("Onboarding sync run started");

        let listing = match self.departments.list_synced_departments().await {
            Ok(listing) => listing,
            Err(e) => {
                error!(error = %e, "Failed to load synced departments");
                self.send(Notification {
                    subject: "GCX onboarding sync: department list unavailable".to_string(),
                    body: format!(
                        "<p>The run could not load the synced department list.</p><pre>{}</pre>",
                        html_escape(&e.to_string())
                    ),
                })
                .await;
                return SyncRunReport {
                    started_at,
                    finished_at: Utc::now(),
                    load_error: Some(e.into()),
                    skipped_items: Vec::new(),
                    departments: Vec::new(),
                };
            }
        };
        let departments = listing.departments;
        let skipped_items = listing.invalid_items;
        info!(
            count = departments.len(),
            skipped = skipped_items.len(),
            "Loaded synced departments"
        );
        if !skipped_items.is_empty() {
            self.notify_skipped_items(&skipped_items).await;
        }

        let table = WelcomeGroupTable::load(
            self.directory.as_ref(),
            &self.settings.welcome_group_ids,
            self.settings.welcome_group_limit,
        )
        .await;

        let reports: Vec<DepartmentReport> = stream::iter(departments)
            .map(|department| self.process_department(department, &table, started_at))
            .buffered(self.settings.max_concurrent_departments.max(1))
            .collect()
            .await;

        let report = SyncRunReport {
            started_at,
            finished_at: Utc::now(),
            load_error: None,
            skipped_items,
            departments: reports,
        };

        info!(
            departments = report.departments.len(),
            skipped = report.skipped_items.len(),
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "Onboarding sync run completed"
        );

        report
    }

    async fn process_department(
        &self,
        department: Department,
        table: &WelcomeGroupTable,
        run_started: DateTime<Utc>,
    ) -> DepartmentReport {
        let span = tracing::info_span!(
            "department",
            code = %department.code,
            abbreviation = %department.abbreviation
        );

        async move {
            let mut candidates = Vec::new();
            let status = match self
                .sync_department(&department, table, run_started, &mut candidates)
                .await
            {
                Ok(synced) => {
                    info!(
                        admitted = synced.admitted,
                        batches = synced.batches,
                        "Department synced"
                    );
                    DepartmentStatus::Synced {
                        admitted: synced.admitted,
                        batches: synced.batches,
                        cursor: synced.cursor,
                    }
                }
                Err(failure) => {
                    error!(
                        phase = %failure.phase,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        "Department sync failed"
                    );
                    self.notify_failure(&department, &candidates, &failure).await;
                    DepartmentStatus::Failed {
                        phase: failure.phase,
                        error: failure.error,
                    }
                }
            };

            DepartmentReport {
                code: department.code,
                abbreviation: department.abbreviation,
                candidates,
                status,
            }
        }
        .instrument(span)
        .await
    }

    async fn sync_department(
        &self,
        department: &Department,
        table: &WelcomeGroupTable,
        run_started: DateTime<Utc>,
        candidates_out: &mut Vec<String>,
    ) -> Result<DepartmentSynced, DepartmentFailure> {
        let Some(cursor) = department.last_sync_cursor else {
            return Err(DepartmentFailure {
                phase: DepartmentPhase::Detecting,
                error: SyncError::MissingCursor {
                    department: department.label(),
                },
            });
        };

        let group_id = self
            .source_group_id(department)
            .await
            .map_err(DepartmentFailure::at(DepartmentPhase::Resolving))?;

        let candidates = self
            .detector
            .detect(&group_id, cursor)
            .await
            .map_err(|e| DepartmentFailure::at(DepartmentPhase::Detecting)(detection_error(e)))?;
        candidates_out.extend(candidates.iter().map(|c| c.id.clone()));

        let batches = partition(candidates_out.as_slice(), self.settings.batch_size);
        let mut admitted = 0usize;

        for batch in &batches {
            let welcome_group_id = table.allocate(batch.len()).await.ok_or_else(|| {
                let batch_size = batch.len();
                let error = if table.unavailable().is_empty() {
                    SyncError::CapacityExhausted { batch_size }
                } else {
                    SyncError::WelcomeGroupsUnavailable {
                        batch_size,
                        groups: table.unavailable().to_vec(),
                    }
                };
                DepartmentFailure::at(DepartmentPhase::Allocating)(error)
            })?;

            let outcome = self
                .admission
                .admit(batch, &self.settings.assigned_group_id, &welcome_group_id)
                .await;

            // Later batches are not attempted: the cursor will not move anyway.
            if let Some(diagnostics) = outcome.diagnostics() {
                return Err(DepartmentFailure {
                    phase: DepartmentPhase::Admitting,
                    error: SyncError::Admission(diagnostics),
                });
            }
            admitted += batch.len();
        }

        self.departments
            .advance_cursor(department, run_started)
            .await
            .map_err(|source| DepartmentFailure {
                phase: DepartmentPhase::Advancing,
                error: SyncError::CursorAdvance { source },
            })?;

        Ok(DepartmentSynced {
            admitted,
            batches: batches.len(),
            cursor: run_started,
        })
    }

    async fn source_group_id(&self, department: &Department) -> Result<String, SyncError> {
        match &department.source_group_id {
            Some(id) => Ok(id.clone()),
            None => Ok(self
                .resolver
                .resolve_source_group_id(&department.abbreviation)
                .await?),
        }
    }

    async fn notify_failure(
        &self,
        department: &Department,
        candidates: &[String],
        failure: &DepartmentFailure,
    ) {
        let subject = format!(
            "GCX onboarding sync failed for {} ({})",
            department.label(),
            failure.error.kind()
        );

        let candidate_list = if candidates.is_empty() {
            "<p>No candidate users were detected.</p>".to_string()
        } else {
            let items: String = candidates
                .iter()
                .map(|id| format!("<li>{}</li>", html_escape(id)))
                .collect();
            format!(
                "<p>Candidate users ({}):</p><ul>{}</ul>",
                candidates.len(),
                items
            )
        };

        let body = format!(
            "<p>Department: {}</p><p>Code: {}</p><p>Failed while {}.</p><pre>{}</pre>{}",
            html_escape(&department.abbreviation),
            html_escape(&department.code),
            failure.phase,
            html_escape(&failure.error.to_string()),
            candidate_list
        );

        self.send(Notification { subject, body }).await;
    }

    async fn notify_skipped_items(&self, items: &[DepartmentSourceError]) {
        for item in items {
            warn!(error = %item, "Skipped department list item");
        }

        let list: String = items
            .iter()
            .map(|item| format!("<li>{}</li>", html_escape(&item.to_string())))
            .collect();
        self.send(Notification {
            subject: format!(
                "GCX onboarding sync: {} department list item(s) skipped",
                items.len()
            ),
            body: format!(
                "<p>These list items could not be read and were not synced:</p><ul>{list}</ul>"
            ),
        })
        .await;
    }

    async fn send(&self, notification: Notification) {
        if !self.notifier.notify(notification).await {
            warn!("Notification was not queued");
        }
    }
}

/// A missing source group during detection is reported as not found.
fn detection_error(err: DirectoryError) -> SyncError {
    match err {
        DirectoryError::NotFound(what) => SyncError::NotFound(what),
        other => other.into(),
    }
}
