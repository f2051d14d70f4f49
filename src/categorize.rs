//! Categorization gateway
//!
//! Thin adapter around the LLM chat-completions API used to label emails.
//! Strictly best-effort: a missing API key disables it, any failure is
//! reported to the caller, and the caller (the ingestor) only ever logs the
//! outcome — ingestion never fails because categorization did.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::CategorizationConfig;

/// Valid email categories for the finance inbox.
pub const VALID_CATEGORIES: &[&str] = &[
    "CLIENT_COMMUNICATION",
    "MARKET_RESEARCH",
    "REGULATORY_COMPLIANCE",
    "FINANCIAL_REPORTING",
    "TRANSACTION_ALERTS",
    "INTERNAL_OPERATIONS",
    "VENDOR_SERVICES",
    "MARKETING_SALES",
    "EDUCATIONAL_CONTENT",
    "OTHER",
];

/// Maximum email content length passed to the model.
const MAX_CONTENT_CHARS: usize = 1000;

/// Categorization result for a single email.
#[derive(Debug, Clone)]
pub struct Categorization {
    pub category: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Categorization error types.
///
/// `Disabled` (no API key configured) is distinct from the attempted-and-failed
/// variants so logs can tell the two apart, but both are recoverable
/// conditions at the call site.
#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("categorization is disabled: no API key configured")]
    Disabled,
    #[error("categorization request failed: {0}")]
    Network(String),
    #[error("categorization response malformed: {0}")]
    Malformed(String),
    #[error("model returned unknown category '{0}'")]
    InvalidCategory(String),
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CategorizationPayload {
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Gateway invoking the LLM categorization call.
pub struct CategorizationGateway {
    http_client: Client,
    config: CategorizationConfig,
}

impl CategorizationGateway {
    /// Create a gateway from configuration.
    pub fn new(config: CategorizationConfig) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            config,
        }
    }

    /// The prompt version recorded alongside categorization results.
    pub fn prompt_version(&self) -> &str {
        &self.config.prompt_version
    }

    /// Whether categorization will be attempted at all.
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Categorize one email from its subject, sender, and content.
    pub async fn categorize(
        &self,
        subject: &str,
        sender: &str,
        content: &str,
    ) -> Result<Categorization, CategorizeError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(CategorizeError::Disabled)?;

        let content = truncate_chars(content, MAX_CONTENT_CHARS);
        let prompt = build_prompt(subject, sender, &content);

        let body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are an expert email categorization system for financial professionals."
                },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CategorizeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CategorizeError::Network(format!(
                "status {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CategorizeError::Malformed(e.to_string()))?;

        let text = completion
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| CategorizeError::Malformed("no choices in response".to_string()))?;

        parse_categorization(&text)
    }
}

/// Build the categorization prompt.
fn build_prompt(subject: &str, sender: &str, content: &str) -> String {
    format!(
        "Categorize the following email into exactly one of these categories: {}.\n\
         Respond with a JSON object: {{\"category\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}.\n\n\
         Subject: {}\nSender: {}\nContent: {}",
        VALID_CATEGORIES.join(", "),
        subject,
        sender,
        content
    )
}

/// Extract and validate the JSON object embedded in a model response.
///
/// Models occasionally wrap the JSON in prose or code fences; everything
/// between the first `{` and the last `}` is treated as the payload.
fn parse_categorization(text: &str) -> Result<Categorization, CategorizeError> {
    let start = text.find('{');
    let end = text.rfind('}');

    let (Some(start), Some(end)) = (start, end) else {
        return Err(CategorizeError::Malformed(
            "no JSON object in model response".to_string(),
        ));
    };
    if end < start {
        return Err(CategorizeError::Malformed(
            "no JSON object in model response".to_string(),
        ));
    }

    let payload: CategorizationPayload = serde_json::from_str(&text[start..=end])
        .map_err(|e| CategorizeError::Malformed(e.to_string()))?;

    if !VALID_CATEGORIES.contains(&payload.category.as_str()) {
        return Err(CategorizeError::InvalidCategory(payload.category));
    }

    Ok(Categorization {
        category: payload.category,
        confidence: payload.confidence.clamp(0.0, 1.0),
        reasoning: payload.reasoning,
    })
}

/// Truncate on a char boundary, appending an ellipsis marker when shortened.
fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    let truncated: String = content.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
