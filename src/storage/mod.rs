//! Persistent storage for the conversation tree.

pub mod sqlite_store;
pub mod store;
pub mod transaction;

pub use sqlite_store::SqliteConversationStore;
pub use store::{ConversationStore, StoreFuture};
pub use transaction::{Transaction, TransactionCoordinator, WriteOp};
