//! In-memory collaborators for gcx-onboard integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcx_onboard::{
    Department, DepartmentListing, DepartmentSource, DepartmentSourceError, DirectoryClient,
    DirectoryError, DirectoryMember, DirectoryResult, GroupIdResolver, MemberFilter, MemberPage,
    Notification, NotificationSink, Notifier, NotifierWorker, NotifyError, ResolverError,
    SyncOrchestrator, SyncSettings,
};

/// Parses an RFC 3339 timestamp.
pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Generates `count` user ids with a common prefix.
pub fn user_ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}-{i:03}")).collect()
}

#[derive(Default)]
struct DirectoryState {
    members: HashMap<String, Vec<DirectoryMember>>,
    counts: HashMap<String, u64>,
    add_failures: HashMap<String, VecDeque<DirectoryError>>,
    failing_counts: HashSet<String>,
    failing_queries: HashSet<String>,
    add_calls: Vec<(String, Vec<String>)>,
    page_calls: usize,
}

/// Scriptable directory that behaves like the real backend for the calls the
/// engine makes: inclusive creation filter, paging, and all-or-nothing patches
/// rejected when any id is already a member.
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
    page_size: usize,
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl FakeDirectory {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            page_size: page_size.max(1),
        }
    }

    /// Adds a user to `group_id` with the given creation time.
    pub fn with_member(self, group_id: &str, user_id: &str, created_at: &str) -> Self {
        self.push_member(group_id, user_id, Some(ts(created_at)));
        self
    }

    /// Adds a user whose creation time is unknown.
    pub fn with_untimed_member(self, group_id: &str, user_id: &str) -> Self {
        self.push_member(group_id, user_id, None);
        self
    }

    /// Adds many users created at the same instant.
    pub fn with_members(self, group_id: &str, ids: &[String], created_at: &str) -> Self {
        for id in ids {
            self.push_member(group_id, id, Some(ts(created_at)));
        }
        self
    }

    /// Pins the member count reported for `group_id`.
    pub fn with_count(self, group_id: &str, count: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(group_id.to_string(), count);
        self
    }

    /// Makes the member count of `group_id` fail.
    pub fn with_failing_count(self, group_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_counts
            .insert(group_id.to_string());
        self
    }

    /// Makes every membership query against `group_id` fail.
    pub fn with_failing_queries(self, group_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_queries
            .insert(group_id.to_string());
        self
    }

    /// Queues an error for the next patch against `group_id`.
    pub fn fail_next_add(self, group_id: &str, error: DirectoryError) -> Self {
        self.state
            .lock()
            .unwrap()
            .add_failures
            .entry(group_id.to_string())
            .or_default()
            .push_back(error);
        self
    }

    fn push_member(&self, group_id: &str, user_id: &str, created_at: Option<DateTime<Utc>>) {
        self.state
            .lock()
            .unwrap()
            .members
            .entry(group_id.to_string())
            .or_default()
            .push(DirectoryMember {
                id: user_id.to_string(),
                display_name: Some(format!("User {user_id}")),
                created_at,
            });
    }

    /// Every patch issued, in order, as `(group_id, user_ids)`.
    pub fn add_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().add_calls.clone()
    }

    /// Patches issued against one group.
    pub fn add_calls_for(&self, group_id: &str) -> Vec<Vec<String>> {
        self.add_calls()
            .into_iter()
            .filter(|(g, _)| g == group_id)
            .map(|(_, ids)| ids)
            .collect()
    }

    /// Sorted ids currently in `group_id`.
    pub fn member_ids(&self, group_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .members
            .get(group_id)
            .map(|m| m.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Number of page requests served.
    pub fn page_calls(&self) -> usize {
        self.state.lock().unwrap().page_calls
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn member_page(
        &self,
        group_id: &str,
        filter: &MemberFilter,
        next_link: Option<&str>,
    ) -> DirectoryResult<MemberPage> {
        let mut state = self.state.lock().unwrap();
        state.page_calls += 1;

        if state.failing_queries.contains(group_id) {
            return Err(DirectoryError::transport("connection reset"));
        }
        let Some(members) = state.members.get(group_id) else {
            return Err(DirectoryError::NotFound(group_id.to_string()));
        };

        let matching: Vec<DirectoryMember> = members
            .iter()
            .filter(|m| match filter {
                MemberFilter::CreatedOnOrAfter(since) => m.created_at.is_some_and(|c| c >= *since),
                MemberFilter::IdIn(ids) => ids.contains(&m.id),
            })
            .cloned()
            .collect();

        let offset: usize = match next_link {
            Some(link) => link
                .strip_prefix("page:")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| DirectoryError::Decode(format!("bad link {link}")))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(matching.len());
        let next_link = (end < matching.len()).then(|| format!("page:{end}"));

        Ok(MemberPage {
            members: matching[offset.min(end)..end].to_vec(),
            next_link,
        })
    }

    async fn member_count(&self, group_id: &str) -> DirectoryResult<u64> {
        let state = self.state.lock().unwrap();
        if state.failing_counts.contains(group_id) {
            return Err(DirectoryError::transport("count timed out"));
        }
        if let Some(count) = state.counts.get(group_id) {
            return Ok(*count);
        }
        Ok(state.members.get(group_id).map_or(0, |m| m.len() as u64))
    }

    async fn add_members(&self, group_id: &str, user_ids: &[String]) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .add_calls
            .push((group_id.to_string(), user_ids.to_vec()));

        if let Some(error) = state
            .add_failures
            .get_mut(group_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let members = state.members.entry(group_id.to_string()).or_default();
        if user_ids.iter().any(|id| members.iter().any(|m| &m.id == id)) {
            return Err(DirectoryError::AlreadyMember {
                message: "One or more added object references already exist for the \
                          following modified properties: 'members'."
                    .to_string(),
            });
        }

        members.extend(user_ids.iter().map(|id| DirectoryMember {
            id: id.clone(),
            display_name: None,
            created_at: None,
        }));
        Ok(())
    }
}

/// Department list kept in memory; cursor writes update it in place.
#[derive(Default)]
pub struct MemoryDepartments {
    departments: Mutex<Vec<Department>>,
    advanced: Mutex<Vec<(String, DateTime<Utc>)>>,
    invalid_items: Vec<(String, String)>,
    fail_list: bool,
    fail_advance: HashSet<String>,
}

impl MemoryDepartments {
    pub fn new(departments: Vec<Department>) -> Self {
        Self {
            departments: Mutex::new(departments),
            ..Default::default()
        }
    }

    pub fn failing_list() -> Self {
        Self {
            fail_list: true,
            ..Default::default()
        }
    }

    /// Adds a list item that cannot be read as a department.
    pub fn with_invalid_item(mut self, item_id: &str, message: &str) -> Self {
        self.invalid_items
            .push((item_id.to_string(), message.to_string()));
        self
    }

    pub fn with_failing_advance(mut self, code: &str) -> Self {
        self.fail_advance.insert(code.to_string());
        self
    }

    /// Cursor writes performed, as `(code, cursor)`.
    pub fn advanced(&self) -> Vec<(String, DateTime<Utc>)> {
        self.advanced.lock().unwrap().clone()
    }

    /// Current cursor of the department with `code`.
    pub fn cursor_of(&self, code: &str) -> Option<DateTime<Utc>> {
        self.departments
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.code == code)
            .and_then(|d| d.last_sync_cursor)
    }
}

#[async_trait]
impl DepartmentSource for MemoryDepartments {
    async fn list_synced_departments(&self) -> Result<DepartmentListing, DepartmentSourceError> {
        if self.fail_list {
            return Err(DepartmentSourceError::Backend("list unavailable".into()));
        }
        Ok(DepartmentListing {
            departments: self.departments.lock().unwrap().clone(),
            invalid_items: self
                .invalid_items
                .iter()
                .map(|(item_id, message)| DepartmentSourceError::InvalidItem {
                    item_id: item_id.clone(),
                    message: message.clone(),
                })
                .collect(),
        })
    }

    async fn advance_cursor(
        &self,
        department: &Department,
        cursor: DateTime<Utc>,
    ) -> Result<(), DepartmentSourceError> {
        if self.fail_advance.contains(&department.code) {
            return Err(DepartmentSourceError::Backend("write rejected".into()));
        }
        self.advanced
            .lock()
            .unwrap()
            .push((department.code.clone(), cursor));
        if let Some(d) = self
            .departments
            .lock()
            .unwrap()
            .iter_mut()
            .find(|d| d.item_id == department.item_id)
        {
            d.last_sync_cursor = Some(cursor);
        }
        Ok(())
    }
}

/// Resolver backed by a map of abbreviation to group id.
#[derive(Default)]
pub struct MapResolver {
    groups: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MapResolver {
    pub fn with(mut self, abbreviation: &str, group_id: &str) -> Self {
        self.groups
            .insert(abbreviation.to_string(), group_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GroupIdResolver for MapResolver {
    async fn resolve_source_group_id(&self, abbreviation: &str) -> Result<String, ResolverError> {
        self.calls.lock().unwrap().push(abbreviation.to_string());
        self.groups
            .get(abbreviation)
            .cloned()
            .ok_or_else(|| ResolverError::NotFound(format!("{abbreviation}_SyncConfig.json")))
    }
}

/// Sink that keeps every notification.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
    delay: Option<Duration>,
}

impl RecordingSink {
    /// A sink that takes `delay` to deliver each notification.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A department with a known source group.
pub fn department(code: &str, abbreviation: &str, group_id: &str, cursor: &str) -> Department {
    Department {
        item_id: format!("item-{code}"),
        code: code.to_string(),
        abbreviation: abbreviation.to_string(),
        source_group_id: Some(group_id.to_string()),
        last_sync_cursor: Some(ts(cursor)),
    }
}

/// Everything a test needs to drive and inspect one orchestrator.
pub struct Harness {
    pub directory: Arc<FakeDirectory>,
    pub departments: Arc<MemoryDepartments>,
    pub resolver: Arc<MapResolver>,
    pub sink: Arc<RecordingSink>,
    pub orchestrator: SyncOrchestrator,
    worker: NotifierWorker,
}

impl Harness {
    pub fn new(
        directory: FakeDirectory,
        departments: MemoryDepartments,
        resolver: MapResolver,
        settings: SyncSettings,
    ) -> Self {
        Self::with_notifier(
            directory,
            departments,
            resolver,
            settings,
            RecordingSink::default(),
            64,
        )
    }

    /// Like [`Harness::new`] with a given sink and notification queue capacity.
    pub fn with_notifier(
        directory: FakeDirectory,
        departments: MemoryDepartments,
        resolver: MapResolver,
        settings: SyncSettings,
        sink: RecordingSink,
        queue_capacity: usize,
    ) -> Self {
        let directory = Arc::new(directory);
        let departments = Arc::new(departments);
        let resolver = Arc::new(resolver);
        let sink = Arc::new(sink);
        let (notifier, worker) = Notifier::spawn(sink.clone(), queue_capacity);

        let orchestrator = SyncOrchestrator::new(
            directory.clone(),
            departments.clone(),
            resolver.clone(),
            notifier,
            settings,
        );

        Self {
            directory,
            departments,
            resolver,
            sink,
            orchestrator,
            worker,
        }
    }

    /// Flushes queued notifications and returns everything delivered.
    pub async fn finish(self) -> Vec<Notification> {
        let sink = self.sink.clone();
        drop(self.orchestrator);
        self.worker.shutdown().await;
        sink.delivered()
    }
}
