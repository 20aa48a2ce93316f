//! Notifier - the chat-transport abstraction
//!
//! The core never talks to a chat service directly; it goes through this
//! trait. A frontend implements it against its transport (a terminal, a
//! messaging API, a test double). Editing a previously sent message is what
//! drives the animated status indicator.

use async_trait::async_trait;

use crate::error::Result;

/// Where a message goes (an opaque chat/channel identifier)
pub type ChatTarget = String;

/// Handle to a sent message, usable for later edits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub chat: ChatTarget,
    pub id: String,
}

/// One option of an interactive choice message
#[derive(Debug, Clone)]
pub struct Choice {
    /// Button label shown to the operator
    pub label: String,
    /// Opaque id handed back through the frontend when tapped
    pub action_id: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action_id: action_id.into(),
        }
    }
}

/// Chat-transport interface used by the dispatcher
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a plain text message
    async fn send_text(&self, chat: &ChatTarget, text: &str) -> Result<MessageRef>;

    /// Send a message with interactive options
    async fn send_choice(
        &self,
        chat: &ChatTarget,
        text: &str,
        options: &[Choice],
    ) -> Result<MessageRef>;

    /// Replace the text of a previously sent message
    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<()>;
}
