//! Completion endpoint implementations

pub mod openai;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::stream::ChunkStream;
use crate::{AssembledMessage, CompletionRequest, Error, Result};

/// A chat completion endpoint
#[async_trait]
pub trait CompletionEndpoint: Send + Sync {
    /// Start a streamed completion and return its raw SSE byte chunks.
    ///
    /// A non-2xx response is reported here as an error, before any chunk is
    /// produced. Cancelling `cancel` abandons the request.
    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream>;

    /// Run a non-streaming completion
    async fn complete(&self, request: &CompletionRequest) -> Result<AssembledMessage>;
}

/// Get an API key from the provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(Error::InvalidApiKey)
}
