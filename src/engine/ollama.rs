//! Ollama-backed analysis engine.
//!
//! Sends one non-streaming chat request per analysis to `/api/chat`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::prompt::{build_prompt, SYSTEM_PROMPT};
use super::AnalysisEngine;
use crate::error::EngineError;
use crate::models::{EntityMetadata, RatingStats, Review};

/// Configuration for the Ollama engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    /// Most recent reviews included in the prompt.
    pub max_reviews_in_prompt: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.3,
            max_reviews_in_prompt: 50,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Analysis engine calling a local or remote Ollama server.
pub struct OllamaEngine {
    config: EngineConfig,
    http_client: reqwest::Client,
}

impl OllamaEngine {
    /// Create a new engine. Per-call timeouts are applied on each request.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        info!(
            "Initializing analysis engine with model {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| EngineError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Send a prompt (no tools) and get the response text.
    async fn send_prompt(&self, prompt: String, timeout: Duration) -> Result<String, EngineError> {
        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(timeout)
                } else if e.is_connect() {
                    EngineError::Unreachable(self.config.ollama_url.clone())
                } else {
                    EngineError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Backend { status, body });
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(timeout)
            } else {
                EngineError::Request(format!("Failed to parse Ollama response: {}", e))
            }
        })?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl AnalysisEngine for OllamaEngine {
    async fn analyze(
        &self,
        entity: &EntityMetadata,
        reviews: &[Review],
        stats: &RatingStats,
        timeout: Duration,
    ) -> Result<String, EngineError> {
        let prompt = build_prompt(entity, reviews, stats, self.config.max_reviews_in_prompt);
        debug!(
            entity_id = %entity.id,
            prompt_chars = prompt.len(),
            "Sending analysis request"
        );

        let text = self.send_prompt(prompt, timeout).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyResponse);
        }

        Ok(text.to_string())
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.model_name, "llama3.2:latest");
        assert_eq!(config.max_reviews_in_prompt, 50);
    }

    #[test]
    fn test_request_serialization() {
        let request = OllamaChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            stream: false,
            options: OllamaOptions { temperature: 0.5 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["options"]["temperature"], 0.5);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model":"m","message":{"role":"assistant","content":"Solid."},"done":true}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "Solid.");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        // Port 9 (discard) is not an Ollama server; the call must fail, not hang.
        let engine = OllamaEngine::new(EngineConfig {
            ollama_url: "http://127.0.0.1:9".to_string(),
            ..EngineConfig::default()
        })
        .unwrap();
        let entity = EntityMetadata {
            id: "e1".to_string(),
            name: "Ada".to_string(),
            category: None,
            location: None,
            instagram_handle: None,
        };

        let result = engine
            .analyze(&entity, &[], &RatingStats::default(), Duration::from_secs(2))
            .await;
        assert!(result.is_err());
    }
}
