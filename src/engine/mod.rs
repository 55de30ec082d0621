//! Conversation engine: context windows, forks, merges, streaming and trees.

pub mod context;
pub mod core;
pub mod fork;
pub mod merge;
pub mod project;
pub mod streaming;
pub mod tree;

pub use self::core::{ChatEngine, EngineBackends};
pub use context::{BoundarySearch, ContextWindow, SUMMARY_PREFIX, build_window, slice_window};
pub use fork::{ForkEngine, ForkPreview, ForkRequest, SelectedText};
pub use merge::{MergeEngine, MergeOutcome, MergePreview};
pub use project::{MessageView, ProjectCreated, ProjectService};
pub use streaming::{ChunkSink, ResponseGenerator, StreamEvent};
pub use tree::{BranchTree, TreeBuilder, TreeNode};
