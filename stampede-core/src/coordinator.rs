use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::gateway::InferenceGateway;
use crate::source::{RunPlan, Task};
use crate::state::{QueryOutcome, RunState, RunStatus};

/// Executes a run plan against the gateway with a fixed pool of
/// `concurrency` workers draining a shared queue.
///
/// Returns `Ok(())` once every worker has exited, whether the queue
/// emptied or a stop request drained the pool early; the caller resolves
/// the terminal status from the state. Fails before any task executes if
/// the gateway is unreachable.
pub(crate) async fn execute(
    gateway: Arc<dyn InferenceGateway>,
    state: Arc<Mutex<RunState>>,
    plan: RunPlan,
) -> Result<()> {
    // Mandatory one-shot precheck; never repeated per task.
    if !gateway.is_available().await {
        return Err(Error::GatewayUnavailable);
    }

    {
        let mut st = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        st.status = RunStatus::Running;
    }

    let model: Arc<str> = Arc::from(plan.model.as_str());
    let queue: Arc<Mutex<VecDeque<Task>>> = Arc::new(Mutex::new(plan.tasks));

    let mut handles = Vec::with_capacity(plan.concurrency);
    for worker_id in 0..plan.concurrency {
        let gateway = gateway.clone();
        let state = state.clone();
        let queue = queue.clone();
        let model = model.clone();
        let delay = plan.delay_between_queries;

        handles.push(tokio::spawn(async move {
            worker(worker_id, gateway, state, queue, model, delay).await;
        }));
    }

    for handle in handles {
        handle.await?;
    }

    Ok(())
}

/// One worker loop: check the stop flag, dequeue, call the gateway, record
/// the outcome. An empty queue or an observed stop request ends the loop;
/// an in-flight call is always allowed to finish.
async fn worker(
    worker_id: usize,
    gateway: Arc<dyn InferenceGateway>,
    state: Arc<Mutex<RunState>>,
    queue: Arc<Mutex<VecDeque<Task>>>,
    model: Arc<str>,
    delay: Option<Duration>,
) {
    loop {
        {
            let st = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if st.stop_requested {
                debug!(worker_id, "stop requested, worker exiting");
                break;
            }
        }

        let task = {
            let mut q = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            q.pop_front()
        };
        let Some(task) = task else {
            break;
        };

        let timestamp = Utc::now();
        let started = Instant::now();
        let outcome = match gateway.generate(&model, &task.prompt).await {
            Ok(text) => QueryOutcome::success(&task, text, started.elapsed(), timestamp),
            Err(err) => QueryOutcome::failure(&task, err.to_string(), started.elapsed(), timestamp),
        };

        {
            let mut st = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            st.record_outcome(outcome);
        }

        // Multi-user pacing between successive pickups.
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}
