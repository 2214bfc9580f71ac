//! Inference capability: backends create engines for a model, engines answer
//! chat completion requests.

use crate::models::ModelConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod http;

pub use http::LocalServerBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

/// `{choices: [{message: {content}}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    /// A single-choice completion carrying `content`.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChatMessage::assistant(content),
            }],
        }
    }

    /// Content of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Download/initialisation progress, `progress` in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    pub progress: f64,
    pub text: String,
}

pub type ProgressListener = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// A loaded model.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<ChatCompletion>;

    /// Releases the weights. Called once the engine stops being the active one.
    async fn unload(&self) {}
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn create_engine(
        &self,
        model: &ModelConfig,
        progress: Option<ProgressListener>,
    ) -> Result<Arc<dyn InferenceEngine>>;

    async fn delete_model_cache(&self, model_id: &str) -> Result<()>;

    async fn has_model_in_cache(&self, model_id: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_wire_format() {
        let json = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"SELECT 1"},"finish_reason":"stop"}]}"#;
        let completion: ChatCompletion = serde_json::from_str(json).unwrap();
        assert_eq!(completion.content(), Some("SELECT 1"));
        assert_eq!(ChatCompletion { choices: vec![] }.content(), None);
    }

    #[test]
    fn test_request_omits_missing_response_format() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            temperature: 0.3,
            max_tokens: 300,
            response_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("response_format").is_none());
        assert_eq!(value["messages"][1]["role"], "user");

        let structured = CompletionRequest {
            response_format: Some(ResponseFormat::json_object()),
            ..request
        };
        let value = serde_json::to_value(&structured).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
    }
}
