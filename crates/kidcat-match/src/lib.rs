//! Attribute digests, hosted-model service seams, and the matching engine
//! that turns a shopper profile into ranked catalogue records.

mod conversation;
mod digest;
mod engine;
mod openai;
mod repair;
mod service;
#[cfg(any(test, feature = "test-support"))]
pub mod stand_in;

pub use conversation::{
    is_reset_word, AssistantTurn, ChatMode, Conversation, ConversationError, GuidedQuestion,
    Reply, SessionContext, FREE_FLOW_CHOICE, GUIDED_CHOICE, GUIDED_QUESTIONS, RESET_WORDS,
    START_OVER, SYSTEM_PROMPT,
};
pub use digest::{bucket, digest};
pub use engine::{
    MatchError, MatchingEngine, ProductProfile, Recommendation, DEFAULT_PAGE_SIZE,
    PLACEHOLDER_IMAGE,
};
pub use openai::{
    patches_from_value, OpenAiClient, OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL,
    DEFAULT_EMBEDDING_MODEL,
};
pub use repair::{parse_json, repair_into, repair_json, strip_code_fence};
pub use service::{AttributeInference, ChatMessage, ChatModel, Embedder, Role, ServiceError};

pub const CRATE_NAME: &str = "kidcat-match";
