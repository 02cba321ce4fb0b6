use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A gateway failure produces exactly one failed outcome; it is never a
/// run-level error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway error: {0}")]
    Api(String),
}

/// The "submit one prompt, receive outcome" seam the engine drives.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Reachability probe, run once per test before any task executes.
    async fn is_available(&self) -> bool;

    /// Submits one prompt and waits for the full response text.
    async fn generate(&self, model: &str, prompt: &str) -> GatewayResult<String>;
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Gateway for a local Ollama-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OllamaGateway {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaGateway {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";

    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for OllamaGateway {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    #[serde(default)]
    response: String,
}

#[async_trait]
impl InferenceGateway for OllamaGateway {
    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(&self, model: &str, prompt: &str) -> GatewayResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(url)
            .json(&payload)
            .timeout(GENERATE_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Api(format!("unexpected status {status}")));
        }

        let body: GenerateBody = resp.json().await.map_err(classify)?;
        Ok(body.response)
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_decode() {
        GatewayError::Api(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}
