//! OpenAI-compatible client for embeddings, chat completions and batch
//! attribute inference.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use kidcat_core::{AttributePatch, EMBEDDING_DIMENSIONS};
use kidcat_storage::{classify_reqwest_error, classify_status, BackoffPolicy, RetryDisposition};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::repair::repair_json;
use crate::service::{AttributeInference, ChatMessage, ChatModel, Embedder, ServiceError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const INFERENCE_INSTRUCTIONS: &str = r#"You extract structured shopping attributes for children's and parenting products.
The input is a JSON array of catalogue rows. Reply with a raw JSON array holding one object per product.
Every object must carry "name" exactly as given. Include only attributes you can infer:
- "age_suitability": one of "0–5 months", "6–11 months", "1–1.5 years", "1.6–2 years", "3–5 years", "6–8 years", "9–12 years", "mothers", "all ages"
- "gender": one of "male", "female", "unisex"
- "giftability", "educational_value", "durability", "value_for_money", "safety_perception", "sensitivity_level", "portability": numbers from 0 to 10
- "seasonal_use": list of month numbers 1-12, empty when not seasonal
- "waterproof": boolean
- "design_features": list of short tags
- "package_quantity": positive integer
- "usage_type", "material_origin", "chemical_safety": short strings
Omit unknown keys. No Markdown."#;

const INFERENCE_SHAPE: &str = r#"a JSON array of objects, each with a "name" string"#;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            temperature: 0.9,
            max_tokens: 1024,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing OpenAI API key");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// POST with bounded retries on 429/5xx and transient transport errors.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.endpoint(path);
        let backoff = self.config.backoff;
        let mut attempt = 0usize;
        loop {
            match self.client.post(&url).json(body).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<R>().await?);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%url, status = status.as_u16(), attempt, "retrying model request");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ServiceError::Status {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%url, error = %err, attempt, "retrying model request");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    async fn chat(&self, messages: JsonValue) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.config.chat_model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        let response: ChatResponse = self.post_json("chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::Malformed("chat response has no content".to_string()))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: text,
        };
        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ServiceError::Malformed("no embedding returned".to_string()))?;
        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(ServiceError::Dimensions {
                expected: EMBEDDING_DIMENSIONS,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let messages = serde_json::to_value(messages)
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        self.chat(messages).await
    }
}

#[async_trait]
impl AttributeInference for OpenAiClient {
    async fn infer(
        &self,
        rows: &[JsonValue],
        image_url: Option<&str>,
    ) -> Result<Vec<AttributePatch>, ServiceError> {
        let rows_json = serde_json::to_string(rows)
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        let user_content = match image_url {
            Some(image) => json!([
                {"type": "text", "text": rows_json},
                {"type": "image_url", "image_url": {"url": image}},
            ]),
            None => JsonValue::String(rows_json),
        };
        let messages = json!([
            {"role": "system", "content": INFERENCE_INSTRUCTIONS},
            {"role": "user", "content": user_content},
        ]);
        let raw = self.chat(messages).await?;
        debug!(rows = rows.len(), chars = raw.len(), "inference reply received");

        let value = repair_json(self, &raw, INFERENCE_SHAPE).await?;
        patches_from_value(value)
    }
}

/// Accept either a bare array or a single object; entries that do not carry
/// a name or do not fit the attribute shape are skipped.
pub fn patches_from_value(value: JsonValue) -> Result<Vec<AttributePatch>, ServiceError> {
    let items = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(_) => vec![value],
        other => {
            return Err(ServiceError::Malformed(format!(
                "expected an array of attribute objects, got {other}"
            )))
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<AttributePatch>(item) {
            Ok(patch) => Some(patch),
            Err(err) => {
                warn!(error = %err, "skipping unusable attribute object");
                None
            }
        })
        .collect())
}
