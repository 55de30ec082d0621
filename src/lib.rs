//! Conversation branching engine: fork a conversation at any selected text,
//! keep each branch grounded in a running summary, and merge a branch's
//! conclusion back into its parent.

#![deny(unsafe_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(dead_code)]
#![warn(unused_imports)]
#![warn(unused_variables)]
#![warn(unused_must_use)]
#![warn(nonstandard_style)]
#![deny(overflowing_literals)]
// Clippy discipline
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_in_result)]
#![deny(clippy::shadow_unrelated)]
#![deny(clippy::too_many_arguments)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

/// Configuration, errors, identifiers and domain records.
pub mod core;
/// Context windows, forks, merges, streaming responses and branch trees.
pub mod engine;
/// Completion model clients.
pub mod generation;
/// Durable task queue.
pub mod queue;
/// HTTP server and API routes.
#[allow(clippy::missing_errors_doc)]
pub mod server;
/// Entry helpers to start the server.
pub mod start_forkline;
/// Conversation persistence.
pub mod storage;
/// Background workers.
pub mod worker;
