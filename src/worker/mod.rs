//! Background workers.

pub mod summary_worker;

pub use summary_worker::{SummaryOutcome, SummaryWorker};
