use crate::config::{GeminiConfig, Timeouts};
use crate::embeddings::{Embedding, EmbeddingProvider};
use crate::error::{Error, Result, ServiceKind};
use crate::llm::{ChatProvider, ChatRequest};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
    chat_timeout: Duration,
    embedding_timeout: Duration,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig, timeouts: &Timeouts) -> Self {
        let client = reqwest::Client::new();
        GeminiClient {
            config,
            client,
            chat_timeout: timeouts.chat,
            embedding_timeout: timeouts.embedding,
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        service: ServiceKind,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R> {
        let url = format!("{}?key={}", url, self.config.api_key);

        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_transport(service, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::from_status(service, status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| Error::from_transport(service, e))
    }
}

impl EmbeddingProvider for GeminiClient {
    /// Embed one batch through `batchEmbedContents`
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        #[derive(Serialize)]
        struct BatchEmbedRequest<'a> {
            requests: Vec<EmbedContentRequest<'a>>,
        }

        #[derive(Serialize)]
        struct EmbedContentRequest<'a> {
            model: &'a str,
            content: EmbeddingContent<'a>,
        }

        #[derive(Serialize)]
        struct EmbeddingContent<'a> {
            parts: Vec<Part<'a>>,
        }

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &self.config.embedding_model,
                    content: EmbeddingContent {
                        parts: vec![Part { text }],
                    },
                })
                .collect(),
        };

        debug!("Requesting {} embeddings", texts.len());
        let response: BatchEmbedResponse = self
            .post(
                ServiceKind::Embedding,
                &self.config.embeddings_url,
                &request,
                self.embedding_timeout,
            )
            .await?;

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

impl ChatProvider for GeminiClient {
    /// Generate text using the configured Gemini model
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content::new_with_role(&request.prompt, "user")],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request.json_output.then_some("application/json"),
            },
        };

        let response: GenerateResponse = self
            .post(
                ServiceKind::Chat,
                &self.config.generate_url,
                &body,
                self.chat_timeout,
            )
            .await?;

        // Extract the generated text from the response
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| Error::ChatService("No response generated".into()))
    }
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'static str,
}

impl<'a> Content<'a> {
    fn new_with_role(text: &'a str, role: &'static str) -> Self {
        Content {
            parts: vec![Part { text }],
            role,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_shape() {
        let body = GenerateRequest {
            contents: vec![Content::new_with_role("route this", "user")],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: 200,
                response_mime_type: Some("application/json"),
            },
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "route this");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 200);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_plain_text_request_omits_mime_type() {
        let config = GenerationConfig {
            temperature: 0.7,
            max_output_tokens: 500,
            response_mime_type: None,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("responseMimeType").is_none());
    }

    #[test]
    fn test_batch_embed_response_parsing() {
        let raw = r#"{"embeddings":[{"values":[0.1,0.2]},{"values":[0.3,0.4]}]}"#;
        let parsed: BatchEmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1].values, vec![0.3, 0.4]);
    }
}
