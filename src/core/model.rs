//! Stored records: projects, conversations, messages, selections and edges.
//!
//! Records reference each other only through ids. A conversation points at
//! its parent conversation, the message it was forked from and the selection
//! that anchored the fork; a merge report points back at the conversation it
//! summarizes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, EdgeId, MessageId, ProjectId, SelectionId, UserId};

/// 2D layout hint consumed by the tree view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Position {
    /// Build a position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Lifecycle of a conversation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Accepting messages.
    Open,
    /// Parked by the user; can be reopened.
    Closed,
    /// Folded back into its parent. Terminal.
    Merged,
}

impl ConversationStatus {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    /// Whether no further status change is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged)
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "merged" => Ok(Self::Merged),
            _ => Err(value.to_string()),
        }
    }
}

/// Author role of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// User input.
    User,
    /// Generated response.
    Assistant,
    /// Summary of a merged child conversation.
    MergeReport,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::MergeReport => "merge_report",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "merge_report" => Ok(Self::MergeReport),
            _ => Err(value.to_string()),
        }
    }
}

/// A project owns exactly one conversation tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Owning user.
    pub user_id: UserId,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Build a new project owned by `user_id`.
    #[must_use]
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            user_id,
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One branch of dialogue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Parent conversation, `None` for a project root.
    pub parent_id: Option<ConversationId>,
    /// Message in the parent this conversation was forked from.
    pub source_message_id: Option<MessageId>,
    /// Selection that anchored the fork.
    pub selection_id: Option<SelectionId>,
    /// Display title.
    pub title: String,
    /// Lifecycle status.
    pub status: ConversationStatus,
    /// Running summary captured when the fork was created.
    pub summary: Option<String>,
    /// Layout hint.
    pub position: Position,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Build an open root conversation for a project.
    #[must_use]
    pub fn root(project_id: ProjectId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            project_id,
            parent_id: None,
            source_message_id: None,
            selection_id: None,
            title: title.into(),
            status: ConversationStatus::Open,
            summary: None,
            position: Position::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this conversation was produced by a fork.
    #[must_use]
    pub const fn is_fork(&self) -> bool {
        self.source_message_id.is_some()
    }
}

/// Link from a message to a child conversation forked from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fork {
    /// Child conversation.
    pub conversation_id: ConversationId,
    /// Selected substring.
    pub selected_text: String,
    /// Selection start (inclusive, characters).
    pub range_start: usize,
    /// Selection end (exclusive, characters).
    pub range_end: usize,
}

/// A single message inside a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Message a merge report nests under.
    pub parent_message_id: Option<MessageId>,
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Running summary; a non-empty value makes this message a summary boundary.
    pub summary: Option<String>,
    /// Merged child conversation, set on merge reports.
    pub source_conversation_id: Option<ConversationId>,
    /// Layout hint.
    pub position: Position,
    /// Creation time; the ordering authority within a conversation.
    pub created_at: DateTime<Utc>,
    /// Child conversations forked from this message (read-side join).
    #[serde(default)]
    pub forks: Vec<Fork>,
}

impl Message {
    fn build(conversation_id: ConversationId, role: MessageRole, content: String) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            parent_message_id: None,
            role,
            content,
            summary: None,
            source_conversation_id: None,
            position: Position::default(),
            created_at: Utc::now(),
            forks: Vec::new(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self::build(conversation_id, MessageRole::User, content.into())
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self::build(conversation_id, MessageRole::Assistant, content.into())
    }

    /// Build a merge report for `child` nested under `source_message_id`.
    #[must_use]
    pub fn merge_report(
        conversation_id: ConversationId,
        source_message_id: MessageId,
        child: ConversationId,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::build(conversation_id, MessageRole::MergeReport, content.into());
        message.parent_message_id = Some(source_message_id);
        message.source_conversation_id = Some(child);
        message
    }

    /// Set the layout hint.
    #[must_use]
    pub const fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// The running summary when this message is a summary boundary.
    #[must_use]
    pub fn boundary_summary(&self) -> Option<&str> {
        self.summary.as_deref().filter(|summary| !summary.is_empty())
    }
}

/// Half-open character range `[start, end)` selected inside a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Selection identifier.
    pub id: SelectionId,
    /// Selected substring.
    pub text: String,
    /// Start offset (inclusive).
    pub range_start: usize,
    /// End offset (exclusive).
    pub range_end: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Selection {
    /// Build and validate a selection.
    ///
    /// # Errors
    /// Returns `ValidationFailed` if the text is blank or the range is inverted.
    pub fn new(
        text: impl Into<String>,
        range_start: usize,
        range_end: usize,
    ) -> EngineResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(EngineError::ValidationFailed(
                "selected text is empty".to_string(),
            ));
        }
        if range_start > range_end {
            return Err(EngineError::ValidationFailed(format!(
                "selection range is inverted: [{range_start}, {range_end})"
            )));
        }
        Ok(Self {
            id: SelectionId::new(),
            text,
            range_start,
            range_end,
            created_at: Utc::now(),
        })
    }
}

/// Explicit visualization link between two messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier.
    pub id: EdgeId,
    /// Conversation the edge is stored under.
    pub conversation_id: ConversationId,
    /// Source message.
    pub source_message_id: MessageId,
    /// Target message.
    pub target_message_id: MessageId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Build an edge stored under `conversation_id`.
    #[must_use]
    pub fn new(conversation_id: ConversationId, source: MessageId, target: MessageId) -> Self {
        Self {
            id: EdgeId::new(),
            conversation_id,
            source_message_id: source,
            target_message_id: target,
            created_at: Utc::now(),
        }
    }
}
