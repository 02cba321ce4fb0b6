#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stampede_core::{
    GatewayError, GatewayResult, HomogeneousConfig, InferenceGateway, MultiUserConfig,
    PromptSource, RunConfig, RunId, RunRecord, RunRegistry, RunSink, RunStatus, SinkError,
};

/// Scripted gateway: fixed latency per call, optional failure tail.
struct MockGateway {
    available: bool,
    latency: Duration,
    fail_from: Option<usize>,
    calls: AtomicUsize,
}

impl MockGateway {
    fn new(latency: Duration) -> Self {
        Self {
            available: true,
            latency,
            fail_from: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Duration::ZERO)
        }
    }

    fn failing_from(latency: Duration, call: usize) -> Self {
        Self {
            fail_from: Some(call),
            ..Self::new(latency)
        }
    }
}

#[async_trait]
impl InferenceGateway for MockGateway {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(&self, _model: &str, _prompt: &str) -> GatewayResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if let Some(fail_from) = self.fail_from
            && call >= fail_from
        {
            return Err(GatewayError::Api("scripted failure".to_string()));
        }
        Ok("alpha beta gamma dolor sit".to_string())
    }
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Vec<RunRecord>>,
}

#[async_trait]
impl RunSink for RecordingSink {
    async fn save(&self, record: &RunRecord) -> Result<(), SinkError> {
        self.saved.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn flood_config(total_requests: usize, concurrency: usize) -> RunConfig {
    RunConfig::Homogeneous(HomogeneousConfig {
        model: "llama3:8b".to_string(),
        concurrency,
        total_requests,
        prompt: "What is the capital of France?".to_string(),
    })
}

fn registry(gateway: MockGateway) -> (Arc<RunRegistry>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let registry = Arc::new(RunRegistry::new(Arc::new(gateway), sink.clone()));
    (registry, sink)
}

async fn wait_terminal(registry: &RunRegistry, id: RunId) -> RunStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(snapshot) = registry.status(id)
                && snapshot.status.is_terminal()
            {
                return snapshot.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn flood_run_completes_every_request() {
    let (registry, sink) = registry(MockGateway::new(Duration::from_millis(2)));
    let id = registry.start(flood_config(5, 2)).unwrap();

    let status = wait_terminal(&registry, id).await;
    assert_eq!(status, RunStatus::Completed);

    let record = registry.record(id).unwrap();
    assert_eq!(record.outcomes.len(), 5);
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.statistics.successful_requests, 5);
    assert_eq!(record.statistics.failed_requests, 0);
    assert_eq!(record.statistics.success_rate, 100.0);
    // Five words in every scripted response.
    assert_eq!(record.statistics.total_tokens, 25);
    assert!(record.error.is_none());

    assert_eq!(sink.saved.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn throughput_is_successes_over_total_busy_time() {
    let (registry, _sink) = registry(MockGateway::new(Duration::from_millis(5)));
    let id = registry.start(flood_config(4, 2)).unwrap();
    wait_terminal(&registry, id).await;

    let record = registry.record(id).unwrap();
    let latency_sum: f64 = record
        .outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| o.latency.as_secs_f64())
        .sum();
    let expected = 4.0 / latency_sum;

    let rps = record.statistics.requests_per_second;
    assert!(
        (rps - expected).abs() < 1e-9,
        "requests_per_second {rps} != successes / busy time {expected}"
    );
}

#[tokio::test]
async fn failures_count_toward_progress_but_not_success_rate() {
    let (registry, _sink) = registry(MockGateway::failing_from(Duration::from_millis(1), 6));
    let id = registry.start(flood_config(10, 2)).unwrap();

    let status = wait_terminal(&registry, id).await;
    assert_eq!(status, RunStatus::Completed);

    let record = registry.record(id).unwrap();
    assert_eq!(record.outcomes.len(), 10);
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.statistics.successful_requests, 6);
    assert_eq!(record.statistics.failed_requests, 4);
    assert_eq!(record.statistics.success_rate, 60.0);

    let failed = record.outcomes.iter().find(|o| !o.success).unwrap();
    assert_eq!(failed.token_count, 0);
    assert_eq!(failed.error.as_deref(), Some("gateway error: scripted failure"));
}

#[tokio::test]
async fn multi_user_run_tracks_per_user_sessions() {
    let config = RunConfig::MultiUser(MultiUserConfig {
        model: "llama3:8b".to_string(),
        user_count: 2,
        queries_per_user: 3,
        concurrency: 2,
        delay_between_queries: Duration::from_millis(1),
        prompts: PromptSource::RandomPool,
        tpm_monitoring: true,
    });

    let (registry, _sink) = registry(MockGateway::new(Duration::from_millis(2)));
    let id = registry.start(config).unwrap();

    let status = wait_terminal(&registry, id).await;
    assert_eq!(status, RunStatus::Completed);

    let record = registry.record(id).unwrap();
    assert_eq!(record.outcomes.len(), 6);
    assert_eq!(record.user_sessions.len(), 2);
    for user_id in [1, 2] {
        let session = &record.user_sessions[&user_id];
        assert_eq!(session.completed_queries, 3);
        assert_eq!(session.failed_queries, 0);
        assert_eq!(session.assigned_prompts.len(), 3);
        assert!(session.total_tokens > 0);
    }

    // The whole run fits in one or two minute windows.
    let samples = &record.statistics.tpm_samples;
    assert!(!samples.is_empty());
    let tokens: u64 = samples.iter().map(|s| s.tokens).sum();
    assert_eq!(tokens, record.statistics.total_tokens as u64);
    let queries: u64 = samples.iter().map(|s| s.queries).sum();
    assert_eq!(queries, 6);
}

#[tokio::test]
async fn tpm_monitoring_can_be_disabled() {
    let config = RunConfig::MultiUser(MultiUserConfig {
        model: "llama3:8b".to_string(),
        user_count: 1,
        queries_per_user: 2,
        concurrency: 1,
        delay_between_queries: Duration::ZERO,
        prompts: PromptSource::RandomPool,
        tpm_monitoring: false,
    });

    let (registry, _sink) = registry(MockGateway::new(Duration::from_millis(1)));
    let id = registry.start(config).unwrap();
    wait_terminal(&registry, id).await;

    let record = registry.record(id).unwrap();
    assert!(record.statistics.tpm_samples.is_empty());
    assert_eq!(record.statistics.average_tpm, 0.0);
    assert_eq!(record.statistics.peak_tpm, 0.0);
}

#[tokio::test]
async fn stop_request_ends_run_early() {
    let (registry, sink) = registry(MockGateway::new(Duration::from_millis(50)));
    let id = registry.start(flood_config(50, 2)).unwrap();

    // Let a couple of tasks get picked up before stopping.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(registry.stop(id));

    let status = wait_terminal(&registry, id).await;
    assert_eq!(status, RunStatus::Stopped);

    let record = registry.record(id).unwrap();
    assert!(record.outcomes.len() < 50, "run should end before the queue drains");
    assert!(record.progress < 100.0);

    // The record is archived exactly once, and a terminal run refuses
    // further stop requests.
    assert_eq!(sink.saved.lock().unwrap().len(), 1);
    assert!(!registry.stop(id));
}

#[tokio::test]
async fn stop_on_unknown_run_is_refused() {
    let (registry, _sink) = registry(MockGateway::new(Duration::ZERO));
    assert!(!registry.stop(uuid::Uuid::new_v4()));
    assert!(registry.status(uuid::Uuid::new_v4()).is_none());
}

#[tokio::test]
async fn unavailable_gateway_fails_before_any_task() {
    let (registry, _sink) = registry(MockGateway::unavailable());
    let id = registry.start(flood_config(5, 2)).unwrap();

    let status = wait_terminal(&registry, id).await;
    assert_eq!(status, RunStatus::Error);

    let record = registry.record(id).unwrap();
    assert!(record.outcomes.is_empty());
    assert_eq!(record.progress, 0.0);
    assert!(record.error.as_deref().unwrap().contains("not available"));
}

#[tokio::test]
async fn invalid_config_registers_nothing() {
    let (registry, sink) = registry(MockGateway::new(Duration::ZERO));
    let err = registry.start(flood_config(0, 2)).unwrap_err();
    assert_eq!(err.to_string(), "`total_requests` must be a positive integer");
    assert!(sink.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn progress_never_decreases_while_polling() {
    let (registry, _sink) = registry(MockGateway::new(Duration::from_millis(3)));
    let id = registry.start(flood_config(20, 4)).unwrap();

    let mut last = 0.0f64;
    loop {
        let snapshot = registry.status(id).unwrap();
        assert!(
            snapshot.progress >= last,
            "progress went backwards: {last} -> {}",
            snapshot.progress
        );
        last = snapshot.progress;
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last, 100.0);
}
