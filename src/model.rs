use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a queued action does once it reaches the remote endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    QuizSubmission,
    ScholarshipSave,
    NotificationPreferenceUpdate,
    ProfileUpdate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::QuizSubmission,
        ActionKind::ScholarshipSave,
        ActionKind::NotificationPreferenceUpdate,
        ActionKind::ProfileUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::QuizSubmission => "quiz-submission",
            ActionKind::ScholarshipSave => "scholarship-save",
            ActionKind::NotificationPreferenceUpdate => "notification-preference-update",
            ActionKind::ProfileUpdate => "profile-update",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::InFlight => "in_flight",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ActionStatus::Pending),
            "in_flight" => Some(ActionStatus::InFlight),
            "completed" => Some(ActionStatus::Completed),
            "failed" => Some(ActionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedAction {
    pub id: String,
    pub kind: ActionKind,
    pub payload: Value,
    pub status: ActionStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedDataset {
    pub key: String,
    pub records: Vec<Value>,
    pub last_refreshed_at: DateTime<Utc>,
}

/// Outcome of a single drain pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Actions still pending or failed once the pass finished.
    pub remaining: u64,
    /// True when the pass stopped early because connectivity dropped.
    pub interrupted: bool,
    pub finished_at: DateTime<Utc>,
}
