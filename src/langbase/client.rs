use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};
use crate::prompts::{QUERY_GENERATION_PROMPT, THINKING_SYSTEM_PROMPT, VALIDATION_SYSTEM_PROMPT};

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Run a pipe, retrying transient failures with exponential backoff.
    ///
    /// Client errors other than 408/429 are returned immediately.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = request.name.clone();
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * 2_u64.pow(attempt - 1),
                );
                warn!(
                    pipe = %pipe_name,
                    retry = attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            debug!(
                pipe = %pipe_name,
                messages = request.messages.len(),
                "Calling Langbase pipe"
            );
            let start = Instant::now();

            match self.post_json::<_, PipeResponse>(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = attempt,
                        "Langbase pipe call failed"
                    );
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    attempt += 1;
                    if attempt > self.request_config.max_retries {
                        return Err(LangbaseError::Unavailable {
                            message: e.to_string(),
                            retries: attempt,
                        });
                    }
                }
            }
        }
    }

    /// Create or upsert a pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);
        info!(pipe = %request.name, "Creating Langbase pipe");

        let response: CreatePipeResponse = self.post_json(&url, &request).await?;
        info!(pipe = %response.name, url = %response.url, "Pipe created successfully");
        Ok(response)
    }

    /// Ensure a pipe exists with the given system prompt. An existing pipe (409) is fine.
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description(description)
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_temperature(0.3)
            .with_max_tokens(2000)
            .with_system_prompt(system_prompt);

        match self.create_pipe(request).await {
            Ok(_) => Ok(()),
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure every configured pipe exists
    pub async fn ensure_pipes(&self, pipes: &PipeConfig) -> LangbaseResult<()> {
        self.ensure_pipe(
            &pipes.reasoning,
            "Iterative reasoning and answer synthesis",
            THINKING_SYSTEM_PROMPT,
        )
        .await?;
        self.ensure_pipe(&pipes.query, "Search query generation", QUERY_GENERATION_PROMPT)
            .await?;
        self.ensure_pipe(
            &pipes.validation,
            "Answer validation against evidence",
            VALIDATION_SYSTEM_PROMPT,
        )
        .await
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> LangbaseResult<R> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

fn is_retryable(error: &LangbaseError) -> bool {
    match error {
        LangbaseError::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
        LangbaseError::InvalidResponse { .. } => false,
        _ => true,
    }
}
