//! Application state shared across all request handlers.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::core::ids::ConversationId;
use crate::engine::core::ChatEngine;

/// Shared application state.
pub struct AppState {
    /// Engine serving every operation.
    pub engine: ChatEngine,
    generating: Arc<DashMap<ConversationId, ()>>,
}

impl AppState {
    /// Wrap an engine.
    #[must_use]
    pub fn new(engine: ChatEngine) -> Arc<Self> {
        Arc::new(Self {
            engine,
            generating: Arc::new(DashMap::new()),
        })
    }

    /// Mark a conversation as generating. `None` if a generation is already live.
    #[must_use]
    pub fn begin_generation(&self, id: ConversationId) -> Option<GenerationGuard> {
        match self.generating.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(GenerationGuard {
                    generating: Arc::clone(&self.generating),
                    id,
                })
            }
        }
    }

    /// Whether a generation is live for the conversation.
    #[must_use]
    pub fn is_generating(&self, id: ConversationId) -> bool {
        self.generating.contains_key(&id)
    }
}

/// Clears the generating mark when dropped.
pub struct GenerationGuard {
    generating: Arc<DashMap<ConversationId, ()>>,
    id: ConversationId,
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.generating.remove(&self.id);
    }
}
