//! Text generation: prompt parts, client trait and the Ollama backend.

pub mod client;
pub mod ollama;
pub mod parts;

pub use client::{ChunkStream, GenFuture, GenerationClient};
pub use ollama::OllamaGenerator;
pub use parts::{ContentPart, OutputConstraint, PartRole};
