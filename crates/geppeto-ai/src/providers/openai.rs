//! OpenAI Chat Completions API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    stream::{ChunkStream, parse_completion},
    types::{AssembledMessage, CompletionRequest},
};

use super::{CompletionEndpoint, get_api_key};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(get_api_key(None, API_KEY_ENV)?))
    }

    /// Point the client at a different API root (proxies, local servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List available chat models
    pub async fn list_models(&self) -> Result<Vec<OpenAIModelInfo>> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_response_body(status.as_u16(), &text));
        }

        let list: OpenAIModelList = response.json().await?;

        let mut chat_models: Vec<_> = list
            .data
            .into_iter()
            .filter(|m| is_chat_model(&m.id))
            .collect();
        chat_models.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(chat_models)
    }

    async fn post(&self, request: &CompletionRequest) -> Result<reqwest::Response> {
        if self.api_key.trim().is_empty() {
            return Err(Error::InvalidApiKey);
        }
        request.validate()?;

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "POST {} model={} messages={} stream={}",
            url,
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = Error::from_response_body(status.as_u16(), &body);
            tracing::warn!("Completion request failed: {}", error);
            return Err(error);
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionEndpoint for OpenAIProvider {
    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        let request = request.clone().with_stream(true);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            response = self.post(&request) => response?,
        };

        let mut bytes = response.bytes_stream();

        Ok(Box::pin(stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = bytes.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => yield Ok(chunk.to_vec()),
                    Some(Err(e)) => {
                        yield Err(Error::Http(e));
                        break;
                    }
                    None => break,
                }
            }
        }))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<AssembledMessage> {
        let request = request.clone().with_stream(false);
        let response = self.post(&request).await?;
        let body = response.text().await?;
        parse_completion(&body)
    }
}

/// Filter function to identify chat-capable models
fn is_chat_model(id: &str) -> bool {
    if id.starts_with("gpt-4") || id.starts_with("gpt-3.5-turbo") {
        !id.contains("instruct") && !id.contains("embedding") && !id.contains("vision")
    } else {
        id.starts_with("o1") || id.starts_with("o3")
    }
}

/// Model info returned from the models endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIModelInfo {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIModelList {
    data: Vec<OpenAIModelInfo>,
}
