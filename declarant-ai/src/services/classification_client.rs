//! Classification service client
//!
//! One call per item to the hosted model (Responses API). The client builds the
//! request from item fields, extracts the structured answer and reports
//! confidence on the 0-100 scale whatever unit the service uses.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use declarant_common::config::{AgentType, ClassifierConfig, ConfidenceScale};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::{ClassificationResult, NormalizedItem};
use crate::services::confidence_bucketer::clamp_confidence;

const USER_AGENT: &str = concat!("declarant-ai/", env!("CARGO_PKG_VERSION"));

/// Sampling temperature; kept low for consistent codes across runs
const TEMPERATURE: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service error {0}: {1}")]
    Service(u16, String),

    #[error("Unparseable classifier response: {0}")]
    Parse(String),

    #[error("Classifier not configured: {0}")]
    Configuration(String),
}

/// Boundary to the external classification capability
#[async_trait]
pub trait ClassificationClient: Send + Sync {
    /// Wait until another request may be issued
    ///
    /// Awaited before `classify` and outside the per-item timeout, so time
    /// spent queueing for the outbound budget never counts against an item.
    async fn ready(&self) {}

    async fn classify(
        &self,
        item: &NormalizedItem,
        agent: AgentType,
    ) -> Result<ClassificationResult, ClassificationError>;
}

/// Per-profile request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentProfile {
    pub agent: AgentType,
    /// File search hits over the tariff vector store
    pub max_search_results: u32,
    /// Fall back to web search when the store has no match
    pub web_search: bool,
}

impl AgentProfile {
    pub fn for_agent(agent: AgentType) -> Self {
        match agent {
            AgentType::HsCode => Self {
                agent,
                max_search_results: 5,
                web_search: true,
            },
            AgentType::CodeSearch => Self {
                agent,
                max_search_results: 3,
                web_search: false,
            },
        }
    }

    fn instructions(&self, confidence_threshold: f64) -> String {
        match self.agent {
            AgentType::HsCode => format!(
                "You are an expert in the customs tariff nomenclature (TN VED / HS).\n\
                 For each goods description determine the most precise tariff code \
                 (format like 8517.12.000), justify the choice and state your confidence.\n\
                 - Search the tariff code base with file search first; use web search only \
                 when the base has no suitable code.\n\
                 - Analyse material, purpose and construction of the goods.\n\
                 - confidence is 0-100 where 100 means certain; {threshold:.0} or more counts as reliable.\n\
                 - When confidence is below {threshold:.0}, list alternative codes.\n\
                 - description is the official wording of the chosen code.\n\
                 Examples: \"Apple iPhone smartphone\" -> 8517.12.000 (95); \
                 \"Arabica coffee beans\" -> 0901.11.000 (90); \
                 \"Car tyres R16\" -> 4011.10.000 (85).",
                threshold = confidence_threshold
            ),
            AgentType::CodeSearch => "You are a precise goods classifier for the customs tariff \
                 nomenclature (TN VED / HS). Using the tariff code base, return the single most \
                 relevant code for the goods description, its official wording and your confidence \
                 from 0 to 100. Keep reasoning to one sentence."
                .to_string(),
        }
    }
}

/// Structured answer requested from the model
#[derive(Debug, Deserialize)]
struct RawClassification {
    hs_code: String,
    confidence: f64,
    #[serde(default, alias = "code_description")]
    description: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    alternative_codes: Vec<String>,
}

/// Rescale a reported confidence to 0-100 and clamp it
pub fn normalize_confidence(raw: f64, scale: ConfidenceScale) -> f64 {
    let percent = match scale {
        ConfidenceScale::Percent => raw,
        ConfidenceScale::Unit => raw * 100.0,
    };
    clamp_confidence(percent)
}

/// Client for the OpenAI Responses API
pub struct OpenAiClassifier {
    http: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    api_key: Option<String>,
    config: ClassifierConfig,
}

impl OpenAiClassifier {
    pub fn new(config: ClassifierConfig, api_key: Option<String>) -> Result<Self, ClassificationError> {
        let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            ClassificationError::Configuration("requests_per_minute must be at least 1".to_string())
        })?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.item_timeout())
            .build()
            .map_err(|e| ClassificationError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            config,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Request body for one item
    pub fn build_request(&self, item: &NormalizedItem, agent: AgentType) -> Value {
        let profile = AgentProfile::for_agent(agent);

        let mut tools = Vec::new();
        if let Some(store) = &self.config.vector_store_id {
            tools.push(json!({
                "type": "file_search",
                "vector_store_ids": [store],
                "max_num_results": profile.max_search_results,
            }));
        }
        if profile.web_search {
            tools.push(json!({ "type": "web_search_preview" }));
        }

        json!({
            "model": self.config.model,
            "instructions": profile.instructions(self.config.confidence_threshold),
            "input": item_prompt(item),
            "temperature": TEMPERATURE,
            "tools": tools,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": "tariff_classification",
                    "strict": true,
                    "schema": output_schema(),
                }
            }
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ClassificationClient for OpenAiClassifier {
    async fn ready(&self) {
        // Without a key every call fails at once; no budget to spend
        if self.api_key.is_some() {
            self.rate_limiter.until_ready().await;
        }
    }

    async fn classify(
        &self,
        item: &NormalizedItem,
        agent: AgentType,
    ) -> Result<ClassificationResult, ClassificationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ClassificationError::Configuration("OpenAI API key is not set".to_string())
        })?;

        debug!(row_index = item.row_index, agent = agent.as_str(), "Classifying item");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.build_request(item, agent))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassificationError::Timeout(self.config.item_timeout())
                } else {
                    ClassificationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Service(status.as_u16(), service_message(&body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClassificationError::Parse(e.to_string()))?;

        parse_response(item.row_index, &body, self.config.confidence_scale)
    }
}

/// User message for one item: description plus any known context
pub fn item_prompt(item: &NormalizedItem) -> String {
    let mut context = Vec::new();
    if let Some(quantity) = item.quantity {
        match &item.unit {
            Some(unit) => context.push(format!("quantity: {} {}", quantity, unit)),
            None => context.push(format!("quantity: {}", quantity)),
        }
    } else if let Some(unit) = &item.unit {
        context.push(format!("unit: {}", unit));
    }
    for (key, value) in &item.attributes {
        context.push(format!("{}: {}", key, value));
    }

    if context.is_empty() {
        format!("Determine the tariff code for the goods: {}", item.description)
    } else {
        format!(
            "Determine the tariff code for the goods: {} ({})",
            item.description,
            context.join(", ")
        )
    }
}

fn output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "hs_code": { "type": "string" },
            "confidence": { "type": "number" },
            "description": { "type": "string" },
            "reasoning": { "type": "string" },
            "alternative_codes": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["hs_code", "confidence", "description", "reasoning", "alternative_codes"],
        "additionalProperties": false
    })
}

/// `error.message` from an API error body, else the raw body
fn service_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Concatenated `output_text` parts of the response's message items
fn output_text(body: &Value) -> Option<String> {
    let text: String = body["output"]
        .as_array()?
        .iter()
        .filter(|item| item["type"] == "message")
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .filter(|part| part["type"] == "output_text")
        .filter_map(|part| part["text"].as_str())
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

/// The answer as JSON, tolerating prose around the object
fn extract_json(text: &str) -> Option<RawClassification> {
    if let Ok(parsed) = serde_json::from_str(text.trim()) {
        return Some(parsed);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

pub fn parse_response(
    row_index: usize,
    body: &Value,
    scale: ConfidenceScale,
) -> Result<ClassificationResult, ClassificationError> {
    let text = output_text(body)
        .ok_or_else(|| ClassificationError::Parse("response has no output text".to_string()))?;

    let raw = extract_json(&text)
        .ok_or_else(|| ClassificationError::Parse(format!("no classification object in: {}", text)))?;

    let code = raw.hs_code.trim();
    if code.is_empty() {
        return Err(ClassificationError::Parse("empty tariff code".to_string()));
    }

    Ok(ClassificationResult::success(
        row_index,
        code,
        normalize_confidence(raw.confidence, scale),
        raw.reasoning,
    )
    .with_code_description(raw.description)
    .with_alternatives(raw.alternative_codes))
}
