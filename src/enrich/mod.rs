//! LLM client for catalog enrichment.
//!
//! Supports Ollama API for local inference. Enrichment is strictly
//! best-effort: every caller treats a failure here as a missing nicety,
//! never as a pipeline error.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default prompt for generating a short teaser description.
pub const DEFAULT_DESCRIPTION_PROMPT: &str = r#"You are writing catalog copy for a documentary film site. Write a single enticing sentence (at most 25 words) describing a documentary with this title:

{title}

Respond with ONLY the sentence, no quotes, no additional text."#;

/// Default prompt for picking a category.
pub const DEFAULT_CATEGORY_PROMPT: &str = r#"You are cataloguing documentary films. Pick the single best matching category for a documentary with this title:

{title}

Allowed categories:
{categories}

Respond with ONLY one category name from the list, nothing else."#;

/// Configuration for the enrichment client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Whether enrichment is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ollama API endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_enabled() -> bool {
    false
}
fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:3b-instruct-q5_K_M".to_string()
}
fn default_max_tokens() -> u32 {
    128
}
fn default_temperature() -> f32 {
    0.4
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Errors from the enrichment service.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("enrichment is disabled")]
    Disabled,
}

/// Client for the enrichment model.
pub struct EnrichClient {
    config: EnrichConfig,
    client: Client,
}

impl EnrichClient {
    pub fn new(config: EnrichConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| EnrichError::Connection(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Check if the model service is reachable.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let url = format!("{}/api/tags", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Generate a one-line teaser description from the title.
    pub async fn generate_description(&self, title: &str) -> Result<String, EnrichError> {
        if !self.config.enabled {
            return Err(EnrichError::Disabled);
        }
        let prompt = DEFAULT_DESCRIPTION_PROMPT.replace("{title}", title);

        debug!("generating description for: {}", title);
        let response = self.call_ollama(&prompt).await?;

        let description = response.trim().trim_matches('"').to_string();
        if description.is_empty() {
            return Err(EnrichError::Parse("empty description response".to_string()));
        }
        Ok(description)
    }

    /// Pick a category name from `allowed` for the given title. Returns
    /// `None` when the model answers outside the vocabulary.
    pub async fn categorize(
        &self,
        title: &str,
        allowed: &[String],
    ) -> Result<Option<String>, EnrichError> {
        if !self.config.enabled {
            return Err(EnrichError::Disabled);
        }
        if allowed.is_empty() {
            return Ok(None);
        }
        let prompt = DEFAULT_CATEGORY_PROMPT
            .replace("{title}", title)
            .replace("{categories}", &allowed.join("\n"));

        debug!("categorizing: {}", title);
        let response = self.call_ollama(&prompt).await?;
        Ok(match_category(&response, allowed))
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String, EnrichError> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EnrichError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EnrichError::Api(format!("HTTP {}: {}", status, body)));
        }

        let ollama_resp: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| EnrichError::Parse(e.to_string()))?;

        Ok(ollama_resp.response)
    }
}

/// Match a model answer against the allowed vocabulary, tolerating case
/// differences and stray punctuation.
fn match_category(response: &str, allowed: &[String]) -> Option<String> {
    let cleaned = response
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    allowed
        .iter()
        .find(|name| name.to_lowercase() == cleaned)
        .cloned()
}
