use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::Task;
use crate::stats::Statistics;

pub type RunId = Uuid;

/// Run lifecycle: `starting → running → {completed, error, stopped}`.
/// Terminal states are absorbing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Starting,
    Running,
    Completed,
    Error,
    Stopped,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Stopped)
    }
}

/// Result of executing one task. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub user_id: u32,
    pub prompt: String,
    pub success: bool,
    /// Empty on failure.
    pub response_text: String,
    /// Whitespace-delimited word count of the response; 0 on failure.
    /// A deliberate approximation, not a tokenizer contract.
    pub token_count: usize,
    #[serde(with = "crate::config::duration_secs")]
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub(crate) fn success(
        task: &Task,
        response_text: String,
        latency: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let token_count = response_text.split_whitespace().count();
        Self {
            user_id: task.user_id,
            prompt: task.prompt.clone(),
            success: true,
            response_text,
            token_count,
            latency,
            timestamp,
            error: None,
        }
    }

    pub(crate) fn failure(
        task: &Task,
        error: String,
        latency: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: task.user_id,
            prompt: task.prompt.clone(),
            success: false,
            response_text: String::new(),
            token_count: 0,
            latency,
            timestamp,
            error: Some(error),
        }
    }
}

/// Per-user view of a multi-user run. Mutated only by the coordinator as
/// that user's tasks complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: u32,
    pub assigned_prompts: Vec<String>,
    pub completed_queries: usize,
    pub failed_queries: usize,
    pub total_tokens: usize,
}

impl UserSession {
    pub fn new(user_id: u32, assigned_prompts: Vec<String>) -> Self {
        Self {
            user_id,
            assigned_prompts,
            completed_queries: 0,
            failed_queries: 0,
            total_tokens: 0,
        }
    }
}

/// The mutable heart of a run. All fields are read and written under the
/// run's single mutex; no access outside it.
#[derive(Debug)]
pub struct RunState {
    pub status: RunStatus,
    pub stop_requested: bool,
    /// `100 * recorded_outcomes / total_tasks`; monotonically non-decreasing.
    pub progress: f64,
    pub total_tasks: usize,
    pub completed_requests: usize,
    pub failed_requests: usize,
    /// Append-only.
    pub outcomes: Vec<QueryOutcome>,
    pub user_sessions: BTreeMap<u32, UserSession>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunState {
    pub(crate) fn new(total_tasks: usize, user_sessions: BTreeMap<u32, UserSession>) -> Self {
        Self {
            status: RunStatus::Starting,
            stop_requested: false,
            progress: 0.0,
            total_tasks,
            completed_requests: 0,
            failed_requests: 0,
            outcomes: Vec::with_capacity(total_tasks),
            user_sessions,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Appends one outcome and folds it into counters, progress, and the
    /// owning user session. One critical section per outcome.
    pub(crate) fn record_outcome(&mut self, outcome: QueryOutcome) {
        if outcome.success {
            self.completed_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        if let Some(session) = self.user_sessions.get_mut(&outcome.user_id) {
            if outcome.success {
                session.completed_queries += 1;
                session.total_tokens += outcome.token_count;
            } else {
                session.failed_queries += 1;
            }
        }

        self.outcomes.push(outcome);

        if self.total_tasks > 0 {
            let recorded = self.completed_requests + self.failed_requests;
            self.progress = 100.0 * recorded as f64 / self.total_tasks as f64;
        }
    }
}

/// What a status query returns: live (recomputed) for an active run, frozen
/// for an archived one.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub id: RunId,
    pub status: RunStatus,
    pub progress: f64,
    pub completed_requests: usize,
    pub failed_requests: usize,
    pub statistics: Statistics,
    pub error: Option<String>,
}
