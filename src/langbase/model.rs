use async_trait::async_trait;

use super::client::LangbaseClient;
use super::types::{Message, PipeRequest};
use crate::error::LangbaseResult;

/// The single language-model boundary the reasoning engine depends on.
///
/// Implementations take a full message history and return the completion text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion over `messages`.
    async fn invoke(&self, messages: Vec<Message>) -> LangbaseResult<String>;
}

/// [`LanguageModel`] backed by a named Langbase pipe.
#[derive(Clone)]
pub struct PipeModel {
    client: LangbaseClient,
    pipe_name: String,
}

impl PipeModel {
    /// Bind a client to one pipe.
    pub fn new(client: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    /// Name of the pipe this model runs.
    #[inline]
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}

#[async_trait]
impl LanguageModel for PipeModel {
    async fn invoke(&self, messages: Vec<Message>) -> LangbaseResult<String> {
        let response = self
            .client
            .call_pipe(PipeRequest::new(&self.pipe_name, messages))
            .await?;
        Ok(response.completion)
    }
}
