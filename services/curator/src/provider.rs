use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub base_url: String,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid stream payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Transport(e.to_string())
    }
}

/// Sampling parameters forwarded to the provider, plus the combined/split
/// switch for two-field rewrites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub split_field_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub params: GenerationParams,
}

pub type DeltaStream = BoxStream<'static, Result<String, ModelError>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Opens a streaming chat call yielding text deltas. Dropping the stream
    /// aborts the underlying request.
    async fn stream_chat(&self, req: &ChatRequest, cancel: CancellationToken) -> Result<DeltaStream, ModelError>;
    fn info(&self) -> ProviderInfo;
}

/// Drives a streaming call to the end, invoking `on_delta` with the
/// accumulated text after every non-empty delta. Cancellation wins over any
/// pending delta.
pub async fn stream_to_end<F>(
    provider: &dyn ModelProvider,
    req: &ChatRequest,
    cancel: &CancellationToken,
    mut on_delta: F,
) -> Result<String, ModelError>
where
    F: FnMut(&str) + Send,
{
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ModelError::Cancelled),
        s = provider.stream_chat(req, cancel.clone()) => s?,
    };

    let mut acc = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            next = stream.next() => match next {
                Some(Ok(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    acc.push_str(&delta);
                    on_delta(&acc);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
    }
    Ok(acc)
}
