use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// One entry of the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Sender::Ai, content)
    }

    /// A failed exchange, recorded on the assistant's side.
    pub fn error(message: &str) -> Self {
        Self::new(Sender::Ai, format!("Error: {}", message))
    }

    fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
