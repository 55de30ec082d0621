//! Role-tagged prompt parts handed to the generation client.

use serde::{Deserialize, Serialize};

use crate::core::model::{Message, MessageRole};

/// Speaker of a prompt part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartRole {
    /// User-side text, including merge reports and instructions.
    User,
    /// Earlier model output.
    Model,
}

/// One role-tagged piece of a prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Speaker.
    pub role: PartRole,
    /// Text.
    pub text: String,
}

impl ContentPart {
    /// User-role part.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: PartRole::User,
            text: text.into(),
        }
    }

    /// Model-role part.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: PartRole::Model,
            text: text.into(),
        }
    }

    /// Map a stored message: assistant becomes model, everything else user.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        match message.role {
            MessageRole::Assistant => Self::model(message.content.clone()),
            MessageRole::User | MessageRole::MergeReport => Self::user(message.content.clone()),
        }
    }
}

/// Shape the generation client must produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputConstraint {
    /// Free text.
    #[default]
    Text,
    /// A single JSON document.
    Json,
}
