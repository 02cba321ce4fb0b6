use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on simulated users per run.
pub const MAX_USER_COUNT: u32 = 10;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_QUERY_DELAY: Duration = Duration::from_millis(500);

/// Immutable per-run parameters. One variant per load shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunConfig {
    /// N identical prompts flooded through a bounded worker pool.
    Homogeneous(HomogeneousConfig),

    /// Simulated users, each with its own prompt sequence and counters.
    MultiUser(MultiUserConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomogeneousConfig {
    pub model: String,
    pub concurrency: usize,
    pub total_requests: usize,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiUserConfig {
    pub model: String,
    pub user_count: u32,
    pub queries_per_user: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause a worker takes between successive task pickups, emulating
    /// human pacing.
    #[serde(default = "default_query_delay", with = "duration_secs")]
    pub delay_between_queries: Duration,

    #[serde(default)]
    pub prompts: PromptSource,

    /// Collect per-minute tokens-per-minute samples.
    #[serde(default = "default_true")]
    pub tpm_monitoring: bool,
}

/// Where a simulated user's prompts come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PromptSource {
    /// Draw from the built-in prompt catalog.
    #[default]
    RandomPool,

    /// Caller-supplied prompts, one per line.
    Custom { prompts: Vec<String> },
}

impl PromptSource {
    /// Splits caller-supplied text into non-empty trimmed lines.
    pub fn from_custom_text(text: &str) -> Self {
        let prompts = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self::Custom { prompts }
    }
}

impl RunConfig {
    pub fn model(&self) -> &str {
        match self {
            Self::Homogeneous(cfg) => &cfg.model,
            Self::MultiUser(cfg) => &cfg.model,
        }
    }

    pub fn concurrency(&self) -> usize {
        match self {
            Self::Homogeneous(cfg) => cfg.concurrency,
            Self::MultiUser(cfg) => cfg.concurrency,
        }
    }

    /// Total number of tasks a run of this config will enqueue.
    pub fn total_tasks(&self) -> usize {
        match self {
            Self::Homogeneous(cfg) => cfg.total_requests,
            Self::MultiUser(cfg) => cfg.user_count as usize * cfg.queries_per_user,
        }
    }

    /// Validates every field before a run id is handed out.
    pub fn validate(&self) -> Result<()> {
        if self.model().trim().is_empty() {
            return Err(Error::InvalidModel);
        }
        if self.concurrency() == 0 {
            return Err(Error::InvalidConcurrency);
        }

        match self {
            Self::Homogeneous(cfg) => {
                if cfg.total_requests == 0 {
                    return Err(Error::InvalidTotalRequests);
                }
                if cfg.prompt.trim().is_empty() {
                    return Err(Error::InvalidPrompt);
                }
            }
            Self::MultiUser(cfg) => {
                if cfg.user_count == 0 || cfg.user_count > MAX_USER_COUNT {
                    return Err(Error::InvalidUserCount);
                }
                if cfg.queries_per_user == 0 {
                    return Err(Error::InvalidQueriesPerUser);
                }
                if let PromptSource::Custom { prompts } = &cfg.prompts
                    && prompts.is_empty()
                {
                    return Err(Error::InvalidCustomPrompts);
                }
            }
        }

        Ok(())
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_query_delay() -> Duration {
    DEFAULT_QUERY_DELAY
}

fn default_true() -> bool {
    true
}

/// Durations archived as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn multi_user(user_count: u32, queries_per_user: usize) -> MultiUserConfig {
        MultiUserConfig {
            model: "llama3:8b".to_string(),
            user_count,
            queries_per_user,
            concurrency: DEFAULT_CONCURRENCY,
            delay_between_queries: Duration::ZERO,
            prompts: PromptSource::RandomPool,
            tpm_monitoring: true,
        }
    }

    fn homogeneous(total_requests: usize) -> HomogeneousConfig {
        HomogeneousConfig {
            model: "llama3:8b".to_string(),
            concurrency: 2,
            total_requests,
            prompt: "Hello, this is a test prompt.".to_string(),
        }
    }

    #[test]
    fn validates_homogeneous_bounds() {
        RunConfig::Homogeneous(homogeneous(5)).validate().unwrap();

        assert!(matches!(
            RunConfig::Homogeneous(homogeneous(0)).validate(),
            Err(Error::InvalidTotalRequests)
        ));

        let mut blank_prompt = homogeneous(5);
        blank_prompt.prompt = "   ".to_string();
        assert!(matches!(
            RunConfig::Homogeneous(blank_prompt).validate(),
            Err(Error::InvalidPrompt)
        ));
    }

    #[test]
    fn rejects_user_count_out_of_bounds() {
        assert!(matches!(
            RunConfig::MultiUser(multi_user(0, 3)).validate(),
            Err(Error::InvalidUserCount)
        ));
        assert!(matches!(
            RunConfig::MultiUser(multi_user(11, 3)).validate(),
            Err(Error::InvalidUserCount)
        ));
        RunConfig::MultiUser(multi_user(10, 3)).validate().unwrap();
    }

    #[test]
    fn rejects_zero_queries_per_user() {
        assert!(matches!(
            RunConfig::MultiUser(multi_user(2, 0)).validate(),
            Err(Error::InvalidQueriesPerUser)
        ));
    }

    #[test]
    fn rejects_explicitly_empty_custom_prompts() {
        let mut cfg = multi_user(2, 3);
        cfg.prompts = PromptSource::from_custom_text("  \n\n   \n");
        assert!(matches!(
            RunConfig::MultiUser(cfg).validate(),
            Err(Error::InvalidCustomPrompts)
        ));
    }

    #[test]
    fn custom_text_splits_non_empty_lines() {
        let source = PromptSource::from_custom_text("first\n\n  second  \nthird\n");
        let PromptSource::Custom { prompts } = source else {
            panic!("expected custom prompts");
        };
        assert_eq!(prompts, vec!["first", "second", "third"]);
    }

    #[test]
    fn total_tasks_is_users_times_queries() {
        assert_eq!(RunConfig::MultiUser(multi_user(4, 5)).total_tasks(), 20);
    }
}
