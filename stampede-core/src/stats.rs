use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::state::QueryOutcome;

/// Derived statistics, recomputable at any time from a run's outcomes.
/// All-zero over zero outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Percentage in `0..=100`.
    pub success_rate: f64,
    pub latency: LatencyStats,
    /// Successful count divided by the sum of successful latencies — NOT
    /// wall-clock throughput.
    pub requests_per_second: f64,
    /// Approximate tokens across successful outcomes.
    pub total_tokens: usize,
    /// Minute-aligned throughput samples (multi-user runs only).
    pub tpm_samples: Vec<TpmSample>,
    pub average_tpm: f64,
    pub peak_tpm: f64,
}

/// Latency distribution over successful outcomes, in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation; 0 with fewer than 2 successes.
    pub std_dev: f64,
}

/// One tokens-per-minute window: `[timestamp - 1 minute, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpmSample {
    /// Window end, truncated to the minute boundary.
    pub timestamp: DateTime<Utc>,
    /// Tokens of successful outcomes inside the window.
    pub tokens: u64,
    /// All outcomes inside the window, failed included.
    pub queries: u64,
}

/// Recomputes statistics from the current outcome list. Linear scan; the
/// list is append-only and small relative to run size.
pub fn compute(outcomes: &[QueryOutcome], tpm_monitoring: bool) -> Statistics {
    if outcomes.is_empty() {
        return Statistics::default();
    }

    let total_requests = outcomes.len();
    let successful: Vec<&QueryOutcome> = outcomes.iter().filter(|o| o.success).collect();
    let successful_requests = successful.len();
    let failed_requests = total_requests - successful_requests;
    let success_rate = 100.0 * successful_requests as f64 / total_requests as f64;
    let total_tokens: usize = successful.iter().map(|o| o.token_count).sum();

    let mut latencies: Vec<f64> = successful.iter().map(|o| o.latency.as_secs_f64()).collect();
    latencies.sort_by(f64::total_cmp);
    let latency = latency_stats(&latencies);

    let latency_sum: f64 = latencies.iter().sum();
    let requests_per_second = if latency_sum > 0.0 {
        successful_requests as f64 / latency_sum
    } else {
        0.0
    };

    let tpm_samples = if tpm_monitoring {
        tpm_windows(outcomes)
    } else {
        Vec::new()
    };
    let (average_tpm, peak_tpm) = tpm_summary(&tpm_samples);

    Statistics {
        total_requests,
        successful_requests,
        failed_requests,
        success_rate,
        latency,
        requests_per_second,
        total_tokens,
        tpm_samples,
        average_tpm,
        peak_tpm,
    }
}

fn latency_stats(sorted: &[f64]) -> LatencyStats {
    let n = sorted.len();
    if n == 0 {
        return LatencyStats::default();
    }

    let min = sorted[0];
    let max = sorted[n - 1];
    let mean = sorted.iter().sum::<f64>() / n as f64;

    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };

    let std_dev = if n >= 2 {
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        variance.sqrt()
    } else {
        0.0
    };

    LatencyStats {
        min,
        max,
        mean,
        median,
        std_dev,
    }
}

/// Walks minute-aligned windows from the first to the last outcome
/// timestamp, one sample per window. Zero-throughput windows are emitted;
/// a gap is informative.
pub fn tpm_windows(outcomes: &[QueryOutcome]) -> Vec<TpmSample> {
    if outcomes.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&QueryOutcome> = outcomes.iter().collect();
    sorted.sort_by_key(|o| o.timestamp);

    let first = sorted[0].timestamp;
    let last = sorted[sorted.len() - 1].timestamp;

    let minute = TimeDelta::minutes(1);
    let mut window_end = minute_floor(first) + minute;

    let mut samples = Vec::new();
    loop {
        let window_start = window_end - minute;
        if window_start > last {
            break;
        }

        let mut tokens: u64 = 0;
        let mut queries: u64 = 0;
        for outcome in &sorted {
            if outcome.timestamp >= window_start && outcome.timestamp < window_end {
                queries += 1;
                if outcome.success {
                    tokens += outcome.token_count as u64;
                }
            }
        }

        samples.push(TpmSample {
            timestamp: window_end,
            tokens,
            queries,
        });

        window_end += minute;
    }

    samples
}

fn tpm_summary(samples: &[TpmSample]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }

    let tokens: Vec<f64> = samples.iter().map(|s| s.tokens as f64).collect();
    let average = tokens.iter().sum::<f64>() / tokens.len() as f64;
    let peak = tokens.iter().copied().fold(0.0_f64, f64::max);
    (average, peak)
}

fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(60);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}
