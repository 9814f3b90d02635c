//! Deterministic service stand-ins for tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kidcat_core::{AttributePatch, EMBEDDING_DIMENSIONS};
use serde_json::Value as JsonValue;

use crate::service::{AttributeInference, ChatMessage, ChatModel, Embedder, ServiceError};

/// Bag-of-words hashing embedder: equal texts give equal vectors and texts
/// sharing words point in similar directions.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vector = vec![0f32; EMBEDDING_DIMENSIONS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % EMBEDDING_DIMENSIONS as u64) as usize] += 1.0;
        }
        Ok(vector)
    }
}

/// Always fails, like an unreachable embedding endpoint.
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
        Err(ServiceError::Status {
            status: 503,
            body: "embedding service unavailable".to_string(),
        })
    }
}

/// Replays canned replies in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .ok_or(ServiceError::Malformed("no scripted reply left".to_string()))
    }
}

/// Returns the same patches for every batch and counts calls.
#[derive(Debug, Default)]
pub struct StaticInference {
    patches: Vec<AttributePatch>,
    calls: AtomicUsize,
    last_image: Mutex<Option<String>>,
}

impl StaticInference {
    pub fn new(patches: Vec<AttributePatch>) -> Self {
        Self {
            patches,
            calls: AtomicUsize::new(0),
            last_image: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_image(&self) -> Option<String> {
        self.last_image.lock().ok().and_then(|i| i.clone())
    }
}

#[async_trait]
impl AttributeInference for StaticInference {
    async fn infer(
        &self,
        _rows: &[JsonValue],
        image_url: Option<&str>,
    ) -> Result<Vec<AttributePatch>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_image.lock() {
            *last = image_url.map(str::to_string);
        }
        Ok(self.patches.clone())
    }
}
