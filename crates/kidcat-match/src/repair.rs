use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::service::{ChatMessage, ChatModel, ServiceError};

const REPAIR_INSTRUCTIONS: &str = "You convert text into valid JSON. Reply with the JSON only, \
no Markdown and no commentary. Keep every value that is present in the input.";

/// Strip a surrounding Markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // drop an info string such as ```json
    match body.split_once('\n') {
        Some((first, rest)) if !first.trim_start().starts_with(['{', '[']) => rest.trim(),
        _ => body.trim(),
    }
}

pub fn parse_json(text: &str) -> Option<JsonValue> {
    serde_json::from_str(strip_code_fence(text)).ok()
}

async fn ask_for_repair(
    repairer: &dyn ChatModel,
    raw: &str,
    expected_shape: &str,
) -> Result<String, ServiceError> {
    let messages = [
        ChatMessage::system(REPAIR_INSTRUCTIONS),
        ChatMessage::user(format!("Expected shape: {expected_shape}\n\nText:\n{raw}")),
    ];
    repairer.complete(&messages).await
}

/// Parse service output as JSON, asking `repairer` exactly once to coerce it
/// into `expected_shape` when it does not parse.
pub async fn repair_json(
    repairer: &dyn ChatModel,
    raw: &str,
    expected_shape: &str,
) -> Result<JsonValue, ServiceError> {
    if let Some(value) = parse_json(raw) {
        return Ok(value);
    }
    warn!(expected_shape, "service output is not JSON, attempting one repair");
    let repaired = ask_for_repair(repairer, raw, expected_shape).await?;
    parse_json(&repaired).ok_or_else(|| {
        ServiceError::Malformed(format!("repair did not yield {expected_shape}"))
    })
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let value = parse_json(text).ok_or_else(|| "not JSON".to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Like [`repair_json`], but JSON that parses into the wrong shape also gets
/// the single repair attempt.
pub async fn repair_into<T: DeserializeOwned>(
    repairer: &dyn ChatModel,
    raw: &str,
    expected_shape: &str,
) -> Result<T, ServiceError> {
    let reason = match decode(raw) {
        Ok(value) => return Ok(value),
        Err(reason) => reason,
    };
    warn!(expected_shape, %reason, "service output has the wrong shape, attempting one repair");
    let repaired = ask_for_repair(repairer, raw, expected_shape).await?;
    decode(&repaired).map_err(|reason| {
        ServiceError::Malformed(format!("repair did not yield {expected_shape}: {reason}"))
    })
}
