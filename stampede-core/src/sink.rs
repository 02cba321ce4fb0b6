use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::state::{QueryOutcome, RunId, RunState, RunStatus, StatusSnapshot, UserSession};
use crate::stats::Statistics;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Frozen archive of a terminal run. Built once when the run reaches a
/// terminal status and never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub config: RunConfig,
    pub status: RunStatus,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub outcomes: Vec<QueryOutcome>,
    pub user_sessions: BTreeMap<u32, UserSession>,
    pub statistics: Statistics,
    pub error: Option<String>,
}

impl RunRecord {
    pub(crate) fn from_state(
        id: RunId,
        config: &RunConfig,
        state: &RunState,
        statistics: Statistics,
    ) -> Self {
        let finished_at = state.finished_at.unwrap_or_else(Utc::now);
        let duration_seconds = (finished_at - state.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            id,
            config: config.clone(),
            status: state.status,
            progress: state.progress,
            started_at: state.started_at,
            finished_at,
            duration_seconds,
            outcomes: state.outcomes.clone(),
            user_sessions: state.user_sessions.clone(),
            statistics,
            error: state.error.clone(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.id,
            status: self.status,
            progress: self.progress,
            completed_requests: self.statistics.successful_requests,
            failed_requests: self.statistics.failed_requests,
            statistics: self.statistics.clone(),
            error: self.error.clone(),
        }
    }
}

/// Persistence seam. A save failure is logged by the registry and never
/// changes the run's reported status.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn save(&self, record: &RunRecord) -> Result<(), SinkError>;
}

/// Appends one JSON object per archived run to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RunSink for JsonLinesSink {
    async fn save(&self, record: &RunRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write as _;

            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            writeln!(file, "{line}")
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(())
    }
}

/// Discards records; useful when archiving is not wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl RunSink for NullSink {
    async fn save(&self, _record: &RunRecord) -> Result<(), SinkError> {
        Ok(())
    }
}
