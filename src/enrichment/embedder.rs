use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use ureq::Agent;

use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

/// Batch embeddings client. The whole batch is accepted or discarded:
/// a response with a different vector count than the input count cannot be
/// trusted positionally, so partial results are never returned.
#[derive(Debug, Clone)]
pub struct Embedder {
    agent: Agent,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
}

impl Embedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Self {
            agent,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// True when endpoint, model, and credential are all present.
    #[inline]
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.model.is_some() && self.api_key.is_some()
    }

    /// Embed a batch of texts in one request. Returns `None` when the
    /// endpoint is unconfigured, unreachable, or answers with a vector
    /// count different from the input count.
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }

        let (Some(base_url), Some(model), Some(api_key)) = (
            self.base_url.as_deref(),
            self.model.as_deref(),
            self.api_key.as_deref(),
        ) else {
            debug!("Embedding endpoint not configured; skipping vectors");
            return None;
        };

        let request = EmbedRequest {
            model,
            input: texts,
        };
        let request_json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(error) => {
                warn!("Failed to serialize embedding request: {}", error);
                return None;
            }
        };

        let result = self
            .agent
            .post(base_url)
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {api_key}"))
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string());

        let body = match result {
            Ok(body) => body,
            Err(ureq::Error::StatusCode(status)) => {
                warn!("Embedding endpoint returned status {}", status);
                return None;
            }
            Err(error) => {
                warn!("Embedding request failed: {}", error);
                return None;
            }
        };

        let response: EmbedResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(error) => {
                warn!("Failed to parse embedding response: {}", error);
                return None;
            }
        };

        let embeddings: Vec<Vec<f32>> = response
            .data
            .into_iter()
            .map(|datum| datum.embedding)
            .collect();

        if embeddings.len() != texts.len() {
            warn!(
                "Embedding count mismatch: sent {}, received {}; discarding batch",
                texts.len(),
                embeddings.len()
            );
            return None;
        }

        Some(embeddings)
    }

    /// Embed a single query text; used by the retrieval seam.
    #[inline]
    pub fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let texts = vec![text.to_string()];
        let mut vectors = self.embed_batch(&texts)?;
        vectors.pop()
    }
}
