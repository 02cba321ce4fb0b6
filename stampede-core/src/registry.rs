use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::coordinator;
use crate::error::{Error, Result};
use crate::gateway::InferenceGateway;
use crate::sink::{RunRecord, RunSink};
use crate::source;
use crate::state::{RunId, RunState, RunStatus, StatusSnapshot};
use crate::stats;

/// Boundary-facing state machine: maps run ids to live state, migrates
/// terminal runs to the archive, and exposes start/stop/status.
///
/// Constructed once at process start and shared by reference; runs own
/// their worker pools and share nothing with each other beyond this map.
pub struct RunRegistry {
    gateway: Arc<dyn InferenceGateway>,
    sink: Arc<dyn RunSink>,
    active: DashMap<RunId, Arc<ActiveRun>>,
    archived: DashMap<RunId, Arc<RunRecord>>,
}

struct ActiveRun {
    config: RunConfig,
    tpm_monitoring: bool,
    state: Arc<Mutex<RunState>>,
}

impl RunRegistry {
    pub fn new(gateway: Arc<dyn InferenceGateway>, sink: Arc<dyn RunSink>) -> Self {
        Self {
            gateway,
            sink,
            active: DashMap::new(),
            archived: DashMap::new(),
        }
    }

    /// Validates the config, registers a `starting` run, launches the
    /// coordinator as a detached task, and returns a fresh run id without
    /// blocking on completion. No run is registered on a config error.
    pub fn start(self: &Arc<Self>, config: RunConfig) -> Result<RunId> {
        config.validate()?;

        let plan = source::materialize(&config);
        let id = Uuid::new_v4();
        let run = Arc::new(ActiveRun {
            config,
            tpm_monitoring: plan.tpm_monitoring,
            state: Arc::new(Mutex::new(RunState::new(
                plan.total_tasks(),
                plan.user_sessions.clone(),
            ))),
        });

        self.active.insert(id, run.clone());
        info!(run_id = %id, total_tasks = plan.total_tasks(), "run registered");

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.drive(id, run, plan).await;
        });

        Ok(id)
    }

    /// Sets the cooperative stop flag on an active run. Advisory: in-flight
    /// gateway calls are allowed to finish. Returns false for an unknown or
    /// already-terminal run.
    pub fn stop(&self, id: RunId) -> bool {
        let Some(run) = self.active.get(&id) else {
            return false;
        };

        let mut st = run
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if st.status.is_terminal() {
            return false;
        }

        st.stop_requested = true;
        info!(run_id = %id, "stop requested");
        true
    }

    /// Live status (statistics recomputed from current outcomes) for an
    /// active run, the frozen final snapshot for an archived one, `None`
    /// for an unknown id.
    pub fn status(&self, id: RunId) -> Option<StatusSnapshot> {
        if let Some(run) = self.active.get(&id) {
            let st = run
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let statistics = stats::compute(&st.outcomes, run.tpm_monitoring);
            return Some(StatusSnapshot {
                id,
                status: st.status,
                progress: st.progress,
                completed_requests: st.completed_requests,
                failed_requests: st.failed_requests,
                statistics,
                error: st.error.clone(),
            });
        }

        self.archived.get(&id).map(|record| record.snapshot())
    }

    /// The frozen record of an archived run, if it reached a terminal
    /// status.
    pub fn record(&self, id: RunId) -> Option<Arc<RunRecord>> {
        self.archived.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Orchestrates one run to its terminal status, then archives it.
    /// Faults here become a run-level `error`; outcomes collected so far
    /// are preserved and still reported.
    async fn drive(self: Arc<Self>, id: RunId, run: Arc<ActiveRun>, plan: source::RunPlan) {
        let result = coordinator::execute(self.gateway.clone(), run.state.clone(), plan).await;

        let record = {
            let mut st = run
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            st.status = match &result {
                Ok(()) => {
                    if st.stop_requested && st.outcomes.len() < st.total_tasks {
                        RunStatus::Stopped
                    } else {
                        RunStatus::Completed
                    }
                }
                Err(err) => {
                    st.error = Some(err.to_string());
                    RunStatus::Error
                }
            };
            st.finished_at = Some(chrono::Utc::now());

            let statistics = stats::compute(&st.outcomes, run.tpm_monitoring);
            RunRecord::from_state(id, &run.config, &st, statistics)
        };

        match &result {
            Ok(()) => info!(
                run_id = %id,
                status = %record.status,
                outcomes = record.outcomes.len(),
                "run finished"
            ),
            Err(Error::GatewayUnavailable) => {
                warn!(run_id = %id, "gateway unavailable, run aborted before any task")
            }
            Err(err) => warn!(run_id = %id, error = %err, "run orchestration failed"),
        }

        let record = Arc::new(record);
        // Insert before removing from the active map so a concurrent status
        // query never observes a gap.
        self.archived.insert(id, record.clone());
        self.active.remove(&id);

        if let Err(err) = self.sink.save(&record).await {
            warn!(run_id = %id, error = %err, "failed to persist run record");
        }
    }
}
