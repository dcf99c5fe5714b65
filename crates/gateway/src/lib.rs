//! Feedback gateway: turns a day's happy moments (or the whole diary) into
//! a natural-language prompt, calls a generative-text endpoint, and extracts
//! the first candidate's reply.

use async_trait::async_trait;
use serde_json::{Value, json};

/// Returned when the endpoint answers successfully but the payload carries
/// no candidate text. Deliberately a normal (non-error) outcome — callers
/// can tell it apart from a [`GatewayError`].
pub const FALLBACK_FEEDBACK: &str = "Could not retrieve AI feedback.";

/// Transport or upstream failure of a feedback/analysis call. No retry is
/// attempted; the caller surfaces the message and moves on.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no API key configured for the generation endpoint")]
    MissingKey,
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generation endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// Contract the reconciliation controller depends on. `feedback` works on a
/// single day's 1–3 moments, `analysis` on all moments flattened across the
/// whole diary.
#[async_trait]
pub trait FeedbackGateway: Send + Sync {
    async fn feedback(&self, items: &[String]) -> Result<String, GatewayError>;
    async fn analysis(&self, moments: &[String]) -> Result<String, GatewayError>;
}

/// Client for a Gemini-style `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    feedback_max_tokens: u32,
    analysis_max_tokens: u32,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.8,
            feedback_max_tokens: 100,
            analysis_max_tokens: 300,
        }
    }

    pub fn with_generation(
        mut self,
        temperature: f32,
        feedback_max_tokens: u32,
        analysis_max_tokens: u32,
    ) -> Self {
        self.temperature = temperature;
        self.feedback_max_tokens = feedback_max_tokens;
        self.analysis_max_tokens = analysis_max_tokens;
        self
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GatewayError> {
        if self.api_key.trim().is_empty() {
            return Err(GatewayError::MissingKey);
        }

        let url = format!(
            "{}/v1/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let payload = request_body(prompt, self.temperature, max_tokens);

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        match extract_candidate_text(&body) {
            Some(text) => Ok(text),
            None => {
                tracing::warn!("generation succeeded but returned no candidate text");
                Ok(FALLBACK_FEEDBACK.to_string())
            }
        }
    }
}

#[async_trait]
impl FeedbackGateway for GeminiClient {
    async fn feedback(&self, items: &[String]) -> Result<String, GatewayError> {
        self.generate(&feedback_prompt(items), self.feedback_max_tokens)
            .await
    }

    async fn analysis(&self, moments: &[String]) -> Result<String, GatewayError> {
        self.generate(&analysis_prompt(moments), self.analysis_max_tokens)
            .await
    }
}

// ── Prompts and wire shapes ───────────────────────────────────────────────────

fn joined_moments(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn feedback_prompt(items: &[String]) -> String {
    format!(
        "These are the happy moments the user wrote down today: {}. \
         Respond with warm empathy and encouragement in one or two sentences. \
         Use fitting emoji sparingly.",
        joined_moments(items)
    )
}

fn analysis_prompt(moments: &[String]) -> String {
    format!(
        "Below are all the happy moments a user has recorded in their diary: {}. \
         Briefly describe the patterns in what makes this person happy and \
         close with one warm, encouraging observation.",
        joined_moments(moments)
    )
}

fn request_body(prompt: &str, temperature: f32, max_tokens: u32) -> Value {
    json!({
        "contents": [
            { "role": "user", "parts": [{ "text": prompt }] }
        ],
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": max_tokens,
        },
    })
}

/// First candidate's text, trimmed. `None` when the payload has no usable
/// candidate — the caller substitutes [`FALLBACK_FEEDBACK`].
fn extract_candidate_text(body: &Value) -> Option<String> {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

// ── Tests ────────────────────────────────────────────────────────────────────
