//! Chat/completion provider seam

use crate::error::Result;

/// A single prompt sent to the chat model
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON response body
    pub json_output: bool,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        ChatRequest {
            prompt: prompt.into(),
            temperature,
            max_tokens,
            json_output: false,
        }
    }

    pub fn expecting_json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Trait for chat/completion models
///
/// Implementations enforce their own per-call timeout and classify failures
/// into the crate error taxonomy; retries are applied by callers.
#[allow(async_fn_in_trait)]
pub trait ChatProvider {
    /// Return the model's text for `request`
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

impl<T: ChatProvider> ChatProvider for &T {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        (**self).complete(request).await
    }
}
