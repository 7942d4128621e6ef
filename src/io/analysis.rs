//! AI analysis client (chat-completion style)
//!
//! The client talks to the location store's analysis proxy, which holds the
//! provider credential server-side. No secret is ever configured here.

use crate::domain::types::Coordinate;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("analysis service returned status {0}")]
    Status(u16),

    #[error("analysis response contained no completion")]
    EmptyResponse,
}

/// Inputs to one analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisRequest {
    pub user: Coordinate,
    pub friend: Coordinate,
    pub distance_m: f64,
}

impl AnalysisRequest {
    /// Natural-language prompt embedding both coordinates and the distance
    pub fn prompt(&self) -> String {
        format!(
            "Analyze the situation of two locations:\n\
             User location: latitude {}, longitude {}\n\
             Friend location: latitude {}, longitude {}\n\
             Distance: {:.2} meters\n\
             \n\
             Please analyze:\n\
             1. The likely type of environment at each location (e.g. residential area, commercial district, park)\n\
             2. What the other person might currently be doing\n\
             3. Practical suggestions based on the distance and locations\n\
             4. Any other relevant observations\n\
             \n\
             Return the result as HTML, using appropriate tags and formatting.",
            self.user.latitude,
            self.user.longitude,
            self.friend.latitude,
            self.friend.longitude,
            self.distance_m
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatCompletionResponse {
    /// Text of the first completion
    pub fn into_first_content(self) -> Option<String> {
        self.choices.into_iter().next().map(|c| c.message.content)
    }
}

/// Produces situational analysis text for two positions
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AnalysisError>;
}

/// HTTP implementation of [`AnalysisService`]
pub struct HttpAnalysisClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl HttpAnalysisClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: endpoint.into(), model: model.into(), temperature })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body(&self, request: &AnalysisRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: request.prompt() }],
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        let body = self.build_body(request);
        debug!(endpoint = %self.endpoint, model = %self.model, "analysis_request");

        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status.as_u16()));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion.into_first_content().ok_or(AnalysisError::EmptyResponse)
    }
}
