//! Narrow interfaces over the hosted model services.

use async_trait::async_trait;
use kidcat_core::AttributePatch;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not configured: {0}")]
    NotConfigured(&'static str),
    #[error("service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed service output: {0}")]
    Malformed(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Text digest to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

/// Catalogue rows (JSON objects) to partial attribute objects keyed by name.
/// `image_url` switches on the image-aware variant.
#[async_trait]
pub trait AttributeInference: Send + Sync {
    async fn infer(
        &self,
        rows: &[JsonValue],
        image_url: Option<&str>,
    ) -> Result<Vec<AttributePatch>, ServiceError>;
}

/// Conversation history to the raw text of the next assistant message.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError>;
}
