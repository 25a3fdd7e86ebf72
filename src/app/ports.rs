use crate::error::Result;
use crate::pipeline::processing::aggregate::CurrencyAggregate;
use async_trait::async_trait;

// Rate provider

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    /// One GET; transport failures map to `PipelineError::Transport`.
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

// Narrative generator

#[derive(Clone, Debug, PartialEq)]
pub struct NarrativeRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct NarrativeCompletion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[async_trait]
pub trait NarrativePort: Send + Sync {
    async fn complete(&self, request: &NarrativeRequest) -> Result<NarrativeCompletion>;
}

// Relational mirror

#[async_trait]
pub trait MirrorSinkPort: Send + Sync {
    /// Appends the day's rows to `table`; returns the number of rows written.
    async fn append(&self, table: &str, rows: &[CurrencyAggregate]) -> Result<usize>;
}
