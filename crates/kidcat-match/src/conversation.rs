//! Session-scoped chat state and the turn logic behind the chat endpoints.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{MatchingEngine, ProductProfile, Recommendation};
use crate::repair::repair_into;
use crate::service::{ChatMessage, ChatModel, Role};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const FREE_FLOW_CHOICE: &str = "Free Flow";
pub const GUIDED_CHOICE: &str = "Guided Questions";
pub const START_OVER: &str = "Start Over";
pub const RESET_WORDS: &[&str] = &[
    "reset",
    "clear",
    "restart",
    "start over",
    "new",
    "new chat",
    "new conversation",
];

const FREE_FLOW_GREETING: &str = "Go Ahead, type what you want and I will try my best to help you!";
const GUIDED_GREETING: &str = "Let's get started";
const GUIDED_DONE: &str = "Thank you for answering the questions!";
const RESET_REPLY: &str = "Chat reset. You can start over.";
const APOLOGY: &str = "Sorry, I couldn't process that. Could you try rephrasing?";

const FREE_FLOW_INSTRUCTIONS: &str = r#"You help parents find products for children and mothers.
Always reply with one JSON object and nothing else:
{"response": "<text for the shopper>", "options": ["<optional quick replies>"], "results": <optional product profile>}
Only add "results" once you know the age bracket, the gender and the budget. A product profile holds
"maximum_price" (number), "age_suitability" (one of "0–5 months", "6–11 months", "1–1.5 years", "1.6–2 years",
"3–5 years", "6–8 years", "9–12 years", "mothers", "all ages"), "gender" ("male", "female" or "unisex") and any
0-10 scores for giftability, educational_value, durability, value_for_money, safety_perception,
sensitivity_level and portability."#;

const TURN_SHAPE: &str =
    r#"a JSON object with a "response" string, an optional "options" list and an optional "results" object"#;

pub struct GuidedQuestion {
    pub question: &'static str,
    pub options: &'static [&'static str],
}

pub const GUIDED_QUESTIONS: [GuidedQuestion; 3] = [
    GuidedQuestion {
        question: "Who are you shopping for?",
        options: &[
            "Mothers",
            "Your Baby",
            "Gift for a Baby",
            "Gift for a Mother",
            "Other",
            START_OVER,
        ],
    },
    GuidedQuestion {
        question: "What is your budget?",
        options: &["$0 - $50", "$50 - $100", "$100 - $200", "$200+", START_OVER],
    },
    GuidedQuestion {
        question: "What type of product are you looking for?",
        options: &[
            "Clothing",
            "Toys",
            "Diapers",
            "Accessories",
            "Other",
            START_OVER,
        ],
    },
];

fn owned(options: &[&str]) -> Vec<String> {
    options.iter().map(|o| o.to_string()).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Guided,
    FreeFlow,
}

/// Everything one shopper's conversation carries between requests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    messages: Vec<ChatMessage>,
    mode: ChatMode,
    question_index: usize,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT)],
            mode: ChatMode::Guided,
            question_index: 0,
        }
    }

    /// Back to a single system message, guided mode, first question.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
    }
}

/// One line or several consecutive assistant lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Text(String),
    Lines(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub success: bool,
    pub response: Reply,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ProductProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<Recommendation>,
}

impl AssistantTurn {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: Reply::Text(response.into()),
            options: None,
            results: None,
            products: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }
}

/// What the chat model is asked to return on a free-flow turn.
#[derive(Debug, Clone, Deserialize)]
struct ModelTurn {
    response: String,
    #[serde(default)]
    options: Option<Vec<String>>,
    #[serde(default)]
    results: Option<ProductProfile>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("invalid choice: {0:?}")]
    InvalidChoice(String),
}

pub fn is_reset_word(message: &str) -> bool {
    let lowered = message.trim().to_lowercase();
    RESET_WORDS.contains(&lowered.as_str())
}

#[derive(Clone)]
pub struct Conversation {
    chat: Arc<dyn ChatModel>,
    engine: MatchingEngine,
}

impl Conversation {
    pub fn new(chat: Arc<dyn ChatModel>, engine: MatchingEngine) -> Self {
        Self { chat, engine }
    }

    /// Pick free flow or the guided questions for this session.
    pub fn choose(
        &self,
        session: &mut SessionContext,
        choice: &str,
    ) -> Result<AssistantTurn, ConversationError> {
        match choice {
            FREE_FLOW_CHOICE => {
                session.mode = ChatMode::FreeFlow;
                session.push(Role::System, FREE_FLOW_INSTRUCTIONS);
                session.push(Role::Assistant, FREE_FLOW_GREETING);
                Ok(AssistantTurn::text(FREE_FLOW_GREETING))
            }
            GUIDED_CHOICE => {
                session.mode = ChatMode::Guided;
                let question = &GUIDED_QUESTIONS[session.question_index];
                session.push(Role::Assistant, GUIDED_GREETING);
                session.push(Role::Assistant, question.question);
                Ok(AssistantTurn {
                    response: Reply::Lines(vec![
                        GUIDED_GREETING.to_string(),
                        question.question.to_string(),
                    ]),
                    ..AssistantTurn::text("")
                }
                .with_options(owned(question.options)))
            }
            other => Err(ConversationError::InvalidChoice(other.to_string())),
        }
    }

    /// Handle one shopper message. Always yields a turn; failures become an
    /// apology or the matching engine's user message.
    pub async fn reply(&self, session: &mut SessionContext, message: &str) -> AssistantTurn {
        session.push(Role::User, message);
        if is_reset_word(message) {
            session.reset();
            return AssistantTurn::text(RESET_REPLY);
        }
        match session.mode {
            ChatMode::Guided => self.guided_turn(session),
            ChatMode::FreeFlow => self.free_flow_turn(session).await,
        }
    }

    fn guided_turn(&self, session: &mut SessionContext) -> AssistantTurn {
        if session.question_index + 1 < GUIDED_QUESTIONS.len() {
            session.question_index += 1;
            let question = &GUIDED_QUESTIONS[session.question_index];
            session.push(Role::Assistant, question.question);
            return AssistantTurn::text(question.question).with_options(owned(question.options));
        }
        // the answers stay in the history for the model to build on
        session.push(Role::Assistant, GUIDED_DONE);
        session.push(Role::System, FREE_FLOW_INSTRUCTIONS);
        session.mode = ChatMode::FreeFlow;
        AssistantTurn::text(GUIDED_DONE)
    }

    async fn free_flow_turn(&self, session: &mut SessionContext) -> AssistantTurn {
        let turn = match self.model_turn(session).await {
            Ok(turn) => turn,
            Err(message) => {
                warn!(error = %message, "chat turn failed");
                session.push(Role::Assistant, APOLOGY);
                return AssistantTurn::text(APOLOGY);
            }
        };
        session.push(Role::Assistant, turn.response.as_str());

        let mut reply = AssistantTurn {
            options: turn.options,
            ..AssistantTurn::text(turn.response)
        };
        if let Some(profile) = turn.results {
            match self.engine.recommend(&profile).await {
                Ok(products) => {
                    info!(products = products.len(), "recommendations ready");
                    reply.products = products;
                }
                Err(err) => {
                    warn!(error = %err, "matching failed");
                    reply.response = Reply::Text(err.user_message().to_string());
                }
            }
            reply.results = Some(profile);
        }
        reply
    }

    async fn model_turn(&self, session: &SessionContext) -> Result<ModelTurn, String> {
        let raw = self
            .chat
            .complete(session.messages())
            .await
            .map_err(|e| e.to_string())?;
        repair_into::<ModelTurn>(self.chat.as_ref(), &raw, TURN_SHAPE)
            .await
            .map_err(|e| e.to_string())
    }
}
