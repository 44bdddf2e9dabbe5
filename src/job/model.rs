//! Job state shared between the engine, the checkpoint store and observers.
//!
//! Field names serialize in camelCase so persisted checkpoints and state
//! updates keep a stable shape for front-ends.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::api::{FailureCategory, User};

/// Job state machine.
///
/// `Idle → Scanning → ScanComplete → Deleting ⇄ Paused → Done | Error`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Scanning,
    ScanComplete,
    Deleting,
    Paused,
    Done,
    Error,
}

impl Phase {
    /// Phases that mean a job was cut short when found in a stored checkpoint.
    pub fn was_interrupted(&self) -> bool {
        !matches!(self, Self::Idle | Self::Done | Self::ScanComplete)
    }

    /// Phases in which no job task is doing work.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::ScanComplete | Self::Paused | Self::Done | Self::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::ScanComplete => "scan_complete",
            Self::Deleting => "deleting",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Community,
    Conversation,
}

impl TargetKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Community => "server",
            Self::Conversation => "conversation",
        }
    }
}

/// A candidate enumerated at the start of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOrderItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub icon: Option<String>,
}

/// A target that holds authored messages, as found by the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTarget {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub icon: Option<String>,
    pub message_count: u64,
}

/// Failure counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureSummary {
    pub auth: u64,
    pub permission: u64,
    pub not_found: u64,
    pub rate_limited: u64,
    pub network: u64,
    pub unknown: u64,
}

impl FailureSummary {
    pub fn increment(&mut self, category: FailureCategory) {
        *self.slot(category) += 1;
    }

    pub fn get(&self, category: FailureCategory) -> u64 {
        match category {
            FailureCategory::Auth => self.auth,
            FailureCategory::Permission => self.permission,
            FailureCategory::NotFound => self.not_found,
            FailureCategory::RateLimited => self.rate_limited,
            FailureCategory::Network => self.network,
            FailureCategory::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> u64 {
        FailureCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }

    fn slot(&mut self, category: FailureCategory) -> &mut u64 {
        match category {
            FailureCategory::Auth => &mut self.auth,
            FailureCategory::Permission => &mut self.permission,
            FailureCategory::NotFound => &mut self.not_found,
            FailureCategory::RateLimited => &mut self.rate_limited,
            FailureCategory::Network => &mut self.network,
            FailureCategory::Unknown => &mut self.unknown,
        }
    }
}

/// Observable progress of the current job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobProgress {
    pub phase: Phase,
    pub has_credential: bool,
    /// Milliseconds since the Unix epoch; zero when not started.
    pub started_at: i64,
    pub scan_targets: Vec<ScanTarget>,
    pub scan_order: Vec<ScanOrderItem>,
    /// Index into `scan_order` being probed, or -1.
    pub scan_active_index: i64,
    /// `"i / n"` while scanning.
    pub scan_progress: String,
    pub total_found: u64,
    pub deleted: u64,
    pub failed: u64,
    pub skipped: u64,
    pub current_target: String,
    pub last_error: String,
    pub user: Option<User>,
    pub failure_summary: FailureSummary,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            has_credential: false,
            started_at: 0,
            scan_targets: Vec::new(),
            scan_order: Vec::new(),
            scan_active_index: -1,
            scan_progress: String::new(),
            total_found: 0,
            deleted: 0,
            failed: 0,
            skipped: 0,
            current_target: String::new(),
            last_error: String::new(),
            user: None,
            failure_summary: FailureSummary::default(),
        }
    }
}

impl JobProgress {
    /// Messages handled so far: deleted, failed or skipped.
    pub fn processed(&self) -> u64 {
        self.deleted + self.failed + self.skipped
    }

    pub fn reset_counters(&mut self) {
        self.deleted = 0;
        self.failed = 0;
        self.skipped = 0;
        self.failure_summary = FailureSummary::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Success,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Success => "success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub level: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn now(level: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            level,
            message: message.into(),
        }
    }
}

/// Bounded job log; the oldest entries are dropped first.
#[derive(Debug, Clone)]
pub struct JobLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl JobLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn with_entries(capacity: usize, entries: Vec<LogEntry>) -> Self {
        let mut log = Self::new(capacity);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Durable record of a deletion run, sufficient to resume it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checkpoint {
    /// Progress snapshot taken at the last sync.
    pub state: JobProgress,
    pub selected_target_ids: Vec<String>,
    pub completed_targets: Vec<String>,
    pub active_target_id: Option<String>,
    /// Search offset within the active target.
    pub current_offset: u64,
    /// Messages handled since entering the active target.
    pub processed_in_active_target: u64,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl Checkpoint {
    /// Empty checkpoint carrying a copy of `state`.
    pub fn fresh(state: &JobProgress) -> Self {
        Self {
            state: state.clone(),
            ..Default::default()
        }
    }

    /// Decode a stored checkpoint, defaulting any field that is missing or
    /// has the wrong shape instead of discarding the whole record.
    pub fn restore(bytes: &[u8]) -> Self {
        let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(bytes) else {
            return Self::default();
        };
        let active_target_id: Option<String> = lenient(&fields, "activeTargetId");

        let mut checkpoint = Self {
            state: lenient(&fields, "state"),
            selected_target_ids: lenient(&fields, "selectedTargetIds"),
            completed_targets: lenient(&fields, "completedTargets"),
            active_target_id: active_target_id.filter(|id| !id.is_empty()),
            current_offset: lenient(&fields, "currentOffset"),
            processed_in_active_target: lenient(&fields, "processedInActiveTarget"),
            updated_at: lenient(&fields, "updatedAt"),
        };
        if checkpoint.active_target_id.is_none() {
            checkpoint.current_offset = 0;
            checkpoint.processed_in_active_target = 0;
        }
        checkpoint
    }

    pub fn is_completed(&self, target_id: &str) -> bool {
        self.completed_targets.iter().any(|id| id == target_id)
    }

    /// Make `target_id` the active target. Per-target cursors are kept only
    /// when it already was the active target.
    pub fn enter_target(&mut self, target_id: &str) {
        if self.active_target_id.as_deref() != Some(target_id) {
            self.active_target_id = Some(target_id.to_string());
            self.current_offset = 0;
            self.processed_in_active_target = 0;
        }
    }

    /// Mark `target_id` completed and clear the active cursors.
    pub fn complete_target(&mut self, target_id: &str) {
        if !self.is_completed(target_id) {
            self.completed_targets.push(target_id.to_string());
        }
        self.active_target_id = None;
        self.current_offset = 0;
        self.processed_in_active_target = 0;
    }
}

fn lenient<T: DeserializeOwned + Default>(
    fields: &serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> T {
    fields
        .get(name)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
