//! Context window assembly.
//!
//! A conversation's history is split at its newest summary boundary: the
//! boundary's running summary stands in for everything up to it, and only
//! the tail after it is sent verbatim.

use crate::core::errors::{EngineError, EngineResult};
use crate::core::model::Message;
use crate::generation::parts::ContentPart;

/// Lead-in for the synthetic part carrying a running summary.
pub const SUMMARY_PREFIX: &str = "Summary of the conversation so far:\n";

/// Whether the message at the cutoff itself may act as the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundarySearch {
    /// Only messages strictly before the cutoff.
    Exclusive,
    /// The cutoff message and everything before it.
    Inclusive,
}

/// Boundary and tail of a history, borrowed from the message list.
#[derive(Clone, Copy, Debug)]
pub struct ContextWindow<'a> {
    /// Newest message with a non-empty summary, if any.
    pub boundary: Option<&'a Message>,
    /// Messages strictly after the boundary and strictly before the cutoff.
    pub tail: &'a [Message],
}

impl<'a> ContextWindow<'a> {
    /// Running summary at the boundary.
    #[must_use]
    pub fn summary(&self) -> Option<&'a str> {
        self.boundary.and_then(Message::boundary_summary)
    }

    /// Whether there is neither a summary nor any tail message.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boundary.is_none() && self.tail.is_empty()
    }

    /// Role-tagged parts: the summary part first, then the tail.
    #[must_use]
    pub fn to_parts(&self) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(self.tail.len() + 1);
        if let Some(summary) = self.summary() {
            parts.push(summary_part(summary));
        }
        parts.extend(self.tail.iter().map(ContentPart::from_message));
        parts
    }
}

/// The synthetic "resume from summary" part.
#[must_use]
pub fn summary_part(summary: &str) -> ContentPart {
    ContentPart::user(format!("{SUMMARY_PREFIX}{summary}"))
}

/// Index of the newest summary boundary at or before the cutoff.
///
/// `cutoff` of `None` means the end of the list.
#[must_use]
pub fn find_boundary(
    messages: &[Message],
    cutoff: Option<usize>,
    search: BoundarySearch,
) -> Option<usize> {
    let end = cutoff.map_or(messages.len(), |idx| idx.min(messages.len()));
    let upper = match search {
        BoundarySearch::Exclusive => end,
        BoundarySearch::Inclusive => (end + 1).min(messages.len()),
    };
    messages[..upper]
        .iter()
        .rposition(|message| message.boundary_summary().is_some())
}

/// Split a history into boundary and tail without judging emptiness.
#[must_use]
pub fn slice_window(
    messages: &[Message],
    cutoff: Option<usize>,
    search: BoundarySearch,
) -> ContextWindow<'_> {
    let end = cutoff.map_or(messages.len(), |idx| idx.min(messages.len()));
    let boundary = find_boundary(messages, cutoff, search);
    let start = boundary.map_or(0, |idx| idx + 1).min(end);
    ContextWindow {
        boundary: boundary.map(|idx| &messages[idx]),
        tail: &messages[start..end],
    }
}

/// Build the prompt parts for a generation call.
///
/// # Errors
/// Returns `InvalidState` (empty context) when there is no boundary and no
/// message before the cutoff.
pub fn build_window(
    messages: &[Message],
    cutoff: Option<usize>,
    search: BoundarySearch,
) -> EngineResult<Vec<ContentPart>> {
    let window = slice_window(messages, cutoff, search);
    if window.is_empty() {
        return Err(EngineError::empty_context());
    }
    Ok(window.to_parts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::ConversationId;
    use crate::generation::parts::PartRole;

    fn history(turns: &[(&str, Option<&str>)]) -> Vec<Message> {
        let conversation = ConversationId::new();
        turns
            .iter()
            .map(|(content, summary)| {
                let mut message = if content.starts_with('a') {
                    Message::assistant(conversation, *content)
                } else {
                    Message::user(conversation, *content)
                };
                message.summary = summary.map(str::to_string);
                message
            })
            .collect()
    }

    fn texts(parts: &[ContentPart]) -> Vec<&str> {
        parts.iter().map(|p| p.text.as_str()).collect()
    }

    #[test]
    fn summary_then_tail_at_end() {
        let messages = history(&[("u1", None), ("a1", Some("S1")), ("u2", None)]);
        let parts = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        assert_eq!(
            texts(&parts),
            vec![format!("{SUMMARY_PREFIX}S1").as_str(), "u2"]
        );
        assert_eq!(parts[1].role, PartRole::User);
    }

    #[test]
    fn no_boundary_sends_full_history_with_roles() {
        let messages = history(&[("u1", None), ("a1", None), ("u2", None)]);
        let parts = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        assert_eq!(texts(&parts), vec!["u1", "a1", "u2"]);
        assert_eq!(parts[1].role, PartRole::Model);
    }

    #[test]
    fn empty_summary_is_not_a_boundary() {
        let messages = history(&[("u1", None), ("a1", Some("")), ("u2", None)]);
        let parts = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        assert_eq!(texts(&parts), vec!["u1", "a1", "u2"]);
    }

    #[test]
    fn newest_boundary_wins() {
        let messages = history(&[
            ("u1", None),
            ("a1", Some("S1")),
            ("u2", None),
            ("a2", Some("S2")),
            ("u3", None),
        ]);
        assert_eq!(find_boundary(&messages, None, BoundarySearch::Exclusive), Some(3));
        let parts = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        assert_eq!(texts(&parts), vec![format!("{SUMMARY_PREFIX}S2").as_str(), "u3"]);
    }

    #[test]
    fn boundary_as_last_message_leaves_only_summary() {
        let messages = history(&[("u1", None), ("a1", Some("S1"))]);
        let parts = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn empty_history_is_empty_context() {
        let err = build_window(&[], None, BoundarySearch::Exclusive).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn inclusive_cutoff_may_pick_the_target_itself() {
        let messages = history(&[
            ("u1", None),
            ("a1", Some("S1")),
            ("u2", None),
            ("a2", Some("S2")),
            ("u3", None),
        ]);
        let inclusive = slice_window(&messages, Some(3), BoundarySearch::Inclusive);
        assert_eq!(inclusive.summary(), Some("S2"));
        assert!(inclusive.tail.is_empty());

        let exclusive = slice_window(&messages, Some(3), BoundarySearch::Exclusive);
        assert_eq!(exclusive.summary(), Some("S1"));
        assert_eq!(exclusive.tail.len(), 1);
        assert_eq!(exclusive.tail[0].content, "u2");
    }

    #[test]
    fn cutoff_before_any_boundary_uses_prefix() {
        let messages = history(&[("u1", None), ("a1", None), ("u2", Some("S"))]);
        let window = slice_window(&messages, Some(1), BoundarySearch::Inclusive);
        assert!(window.boundary.is_none());
        assert_eq!(window.tail.len(), 1);
    }

    #[test]
    fn window_is_deterministic() {
        let messages = history(&[("u1", None), ("a1", Some("S1")), ("u2", None)]);
        let first = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        let second = build_window(&messages, None, BoundarySearch::Exclusive).unwrap();
        assert_eq!(first, second);
    }
}
