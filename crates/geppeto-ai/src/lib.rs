//! geppeto-ai: chat completion endpoint layer
//!
//! Talks to an OpenAI-compatible chat completion endpoint, assembles
//! streamed responses, counts tokens, and knows the prompt budget
//! of each supported model.

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod tokens;
pub mod types;

pub use error::{ApiErrorCode, Error, Result};
pub use providers::CompletionEndpoint;
pub use stream::{AssemblerState, ChunkStream, StreamAssembler, assemble};
pub use tokens::{TokenCounter, count_tokens, counter_for_model};
pub use types::*;
