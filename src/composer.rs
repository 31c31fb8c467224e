//! Final answer composition
//!
//! Only tool output and the user's query reach the composition prompt. Empty
//! searches, unknown locations and "no tool" outcomes are answered from
//! configuration without calling the model. Every answer is held to
//! `max_answer_chars`.

use crate::config::CompositionConfig;
use crate::error::{Error, Result};
use crate::llm::{ChatProvider, ChatRequest};
use crate::prompts::{render, PromptSet};
use crate::retry::RetryPolicy;
use crate::tools::ToolOutcome;
use log::{debug, info};

const ELLIPSIS: &str = "...";

pub struct ResponseComposer {
    config: CompositionConfig,
    retry: RetryPolicy,
}

impl ResponseComposer {
    pub fn new(config: CompositionConfig, retry: RetryPolicy) -> Self {
        ResponseComposer { config, retry }
    }

    /// Canned answer for an empty query
    pub fn no_tool_answer(&self) -> String {
        self.fit(&self.config.no_tool_answer)
    }

    /// Canned answer for unrecovered service failures
    pub fn unavailable_answer(&self) -> String {
        self.fit(&self.config.unavailable_answer)
    }

    /// Turn a tool outcome into the user-facing answer
    pub async fn compose<C: ChatProvider>(
        &self,
        chat: &C,
        prompts: &PromptSet,
        outcome: &ToolOutcome,
        user_query: &str,
    ) -> Result<String> {
        let answer = match outcome {
            ToolOutcome::Weather(report) => {
                let data = report.to_prompt_data();
                self.generate(chat, &prompts.weather_response, user_query, &data)
                    .await?
            }
            ToolOutcome::WeatherNotFound { location } => {
                info!("Answering with the location-not-found message");
                render(
                    &self.config.location_not_found_answer,
                    &[("location", location.as_str())],
                )
            }
            ToolOutcome::Documents(result) if result.is_empty() => {
                info!("No relevant documents, answering with the fallback");
                self.config.no_documents_answer.clone()
            }
            ToolOutcome::Documents(result) => {
                let context = result.context();
                self.generate(chat, &prompts.document_response, user_query, &context)
                    .await?
            }
            ToolOutcome::NoTool {
                free_text: Some(text),
            } => {
                info!("mode=permissive answering with model free text");
                text.clone()
            }
            ToolOutcome::NoTool { free_text: None } => self.config.no_tool_answer.clone(),
        };

        Ok(self.fit(&answer))
    }

    async fn generate<C: ChatProvider>(
        &self,
        chat: &C,
        template: &str,
        user_query: &str,
        tool_data: &str,
    ) -> Result<String> {
        let prompt = render(
            template,
            &[("user_query", user_query), ("tool_data", tool_data)],
        );
        let request = ChatRequest::new(prompt, self.config.temperature, self.config.max_tokens);
        debug!("Composition prompt is {} chars", request.prompt.len());

        let request = &request;
        self.retry
            .run("composition", move || async move {
                let text = chat.complete(request).await?;
                if text.trim().is_empty() {
                    return Err(Error::ChatService("empty completion".into()));
                }
                Ok(text)
            })
            .await
    }

    fn fit(&self, answer: &str) -> String {
        truncate_at_word_boundary(answer, self.config.max_answer_chars)
    }
}

/// Shorten `text` to at most `max_chars` characters, cutting at whitespace.
///
/// A cut answer ends with `...`, counted inside the budget. A single word
/// longer than the budget is cut mid-word.
pub fn truncate_at_word_boundary(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(ELLIPSIS.len());
    if budget == 0 {
        return text.chars().take(max_chars).collect();
    }

    let cut = text
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];
    let head = if text[cut..].starts_with(char::is_whitespace) {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(space) if space > 0 => &head[..space],
            _ => head,
        }
    };

    format!("{}{}", head.trim_end(), ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RetrievedChunk;
    use crate::retrieval::RetrievalResult;
    use crate::test_support::{tokyo_report, ScriptedChat};
    use std::time::Duration;

    fn composer() -> ResponseComposer {
        ResponseComposer::new(CompositionConfig::default(), RetryPolicy::new(2, Duration::ZERO))
    }

    fn documents(texts: &[&str]) -> ToolOutcome {
        ToolOutcome::Documents(RetrievalResult {
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, text)| RetrievedChunk {
                    document_id: "handbook".into(),
                    index: i,
                    text: text.to_string(),
                    score: 1.0 - i as f32 * 0.1,
                })
                .collect(),
        })
    }

    #[tokio::test]
    async fn test_weather_answer_uses_weather_template_only() {
        let chat = ScriptedChat::new().reply("It's 18.4 °C with light rain in Tokyo.");
        let answer = composer()
            .compose(
                &chat,
                &PromptSet::default(),
                &ToolOutcome::Weather(tokyo_report()),
                "What's the weather in Tokyo?",
            )
            .await
            .unwrap();

        assert_eq!(answer, "It's 18.4 °C with light rain in Tokyo.");
        let requests = chat.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("Light Rain"));
        assert!(requests[0].prompt.contains("What's the weather in Tokyo?"));
        assert!(!requests[0].prompt.contains("document_search"));
        assert!(!requests[0].json_output);
        assert_eq!(requests[0].temperature, 0.7);
    }

    #[tokio::test]
    async fn test_document_answer_embeds_context() {
        let chat = ScriptedChat::new().reply("Pro costs $20.");
        let answer = composer()
            .compose(
                &chat,
                &PromptSet::default(),
                &documents(&["Pro plan: $20 per month."]),
                "How much is Pro?",
            )
            .await
            .unwrap();

        assert_eq!(answer, "Pro costs $20.");
        assert!(chat.requests()[0]
            .prompt
            .contains("[Document: handbook]\nPro plan: $20 per month."));
    }

    #[tokio::test]
    async fn test_fallbacks_skip_the_model() {
        let chat = ScriptedChat::new();
        let composer = composer();
        let prompts = PromptSet::default();

        let empty = composer
            .compose(&chat, &prompts, &documents(&[]), "pricing?")
            .await
            .unwrap();
        assert_eq!(empty, CompositionConfig::default().no_documents_answer);

        let none = composer
            .compose(&chat, &prompts, &ToolOutcome::NoTool { free_text: None }, "2+2?")
            .await
            .unwrap();
        assert_eq!(none, CompositionConfig::default().no_tool_answer);

        let missing = composer
            .compose(
                &chat,
                &prompts,
                &ToolOutcome::WeatherNotFound {
                    location: "Atlantis".into(),
                },
                "Weather in Atlantis?",
            )
            .await
            .unwrap();
        assert!(missing.contains("\"Atlantis\""));

        assert_eq!(chat.call_count(), 0);
    }

    #[test]
    fn test_canned_answers_are_budgeted() {
        let composer = ResponseComposer::new(
            CompositionConfig {
                max_answer_chars: 12,
                ..CompositionConfig::default()
            },
            RetryPolicy::new(1, Duration::ZERO),
        );

        assert!(composer.no_tool_answer().chars().count() <= 12);
        assert!(composer.unavailable_answer().chars().count() <= 12);
        assert!(composer.no_tool_answer().ends_with("..."));
    }

    #[tokio::test]
    async fn test_free_text_is_budgeted() {
        let composer = ResponseComposer::new(
            CompositionConfig {
                max_answer_chars: 20,
                ..CompositionConfig::default()
            },
            RetryPolicy::new(1, Duration::ZERO),
        );
        let outcome = ToolOutcome::NoTool {
            free_text: Some("two plus two is four, obviously".into()),
        };

        let answer = composer
            .compose(&ScriptedChat::new(), &PromptSet::default(), &outcome, "2+2?")
            .await
            .unwrap();
        assert_eq!(answer, "two plus two is...");
    }

    #[tokio::test]
    async fn test_composition_failure_propagates_after_retries() {
        let chat = ScriptedChat::new()
            .fail(Error::ChatService("503".into()))
            .reply("   ");
        let result = composer()
            .compose(
                &chat,
                &PromptSet::default(),
                &ToolOutcome::Weather(tokyo_report()),
                "Weather?",
            )
            .await;

        assert!(matches!(result, Err(Error::ChatService(_))));
        assert_eq!(chat.call_count(), 2);
    }

    #[test]
    fn test_truncate_at_word_boundary() {
        assert_eq!(truncate_at_word_boundary("short answer", 50), "short answer");
        assert_eq!(
            truncate_at_word_boundary("the quick brown fox jumps", 15),
            "the quick..."
        );
        assert_eq!(truncate_at_word_boundary("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate_at_word_boundary("abcdef", 2), "ab");
    }

    #[test]
    fn test_truncation_never_exceeds_budget() {
        let text = "Le café était très agréable ce matin à Genève, merci beaucoup.";
        for max in 0..text.chars().count() + 2 {
            let cut = truncate_at_word_boundary(text, max);
            assert!(cut.chars().count() <= max, "{} > {}", cut, max);
        }
    }
}
