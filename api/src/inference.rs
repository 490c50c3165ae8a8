//! Client for the OpenAI-compatible chat completions endpoint used for planning.

use serde::Serialize;
use serde_json::Value;

use crate::config::InferenceConfig;
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("AI service is not configured")]
    NotConfigured,
    #[error("Failed to connect to AI service: {0}")]
    Unreachable(String),
    #[error("AI service returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        AppError::UpstreamUnavailable {
            message: err.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    pub fn new(client: reqwest::Client, config: InferenceConfig) -> Self {
        Self { client, config }
    }

    /// Send one system + user exchange and return the text of the first choice.
    ///
    /// A 200 reply without readable content yields an empty string; transport
    /// failures and non-200 statuses are errors.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let token = self
            .config
            .token
            .as_deref()
            .ok_or(InferenceError::NotConfigured)?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(token)
            .header("accept", "application/json")
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::Unreachable(e.to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Err(InferenceError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(first_choice_content(&body))
    }
}

fn first_choice_content(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}
