use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User id sent when the caller does not identify the user.
pub const DEFAULT_USER_ID: &str = "anon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of an "ask", sent by the client to the proxy and forwarded unchanged
/// to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub message: String,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
    /// Ask the backend to answer only from course evidence.
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub optional_artifacts: Option<Value>,
    /// Topic the UI is currently showing, used by the backend as a hint.
    #[serde(default)]
    pub ui_topic: Option<String>,
}

impl AskRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chat_history: Vec::new(),
            strict_mode: false,
            user_id: default_user_id(),
            optional_artifacts: None,
            ui_topic: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.chat_history = history;
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.ui_topic = topic;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Option<Value>) -> Self {
        self.optional_artifacts = artifacts;
        self
    }
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}
