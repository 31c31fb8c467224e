//! Tool selection
//!
//! The routing model only ever classifies a query against a fixed catalog of
//! two tools. Its reply is parsed into a closed [`RoutingDecision`]; anything
//! that is not a known tool with valid arguments becomes
//! [`RoutingDecision::None`]. In strict mode the tool name must match the
//! catalog exactly.

use crate::config::RoutingConfig;
use crate::context::{limit_history, render_history, ConversationTurn};
use crate::error::Result;
use crate::llm::{ChatProvider, ChatRequest};
use crate::prompts::{render, PromptSet};
use crate::retry::RetryPolicy;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Bumped whenever a tool's name, purpose or arguments change
pub const CATALOG_VERSION: &str = "tools-v1";

/// One capability the router may select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub purpose: &'static str,
    pub required_args: &'static [&'static str],
}

pub const WEATHER_TOOL: ToolSpec = ToolSpec {
    name: "weather",
    purpose: "Current weather conditions for a city or place",
    required_args: &["location"],
};

pub const DOCUMENT_SEARCH_TOOL: ToolSpec = ToolSpec {
    name: "document_search",
    purpose: "Answer questions from the documents the user has uploaded",
    required_args: &["query"],
};

pub const CATALOG: [ToolSpec; 2] = [WEATHER_TOOL, DOCUMENT_SEARCH_TOOL];

/// Catalog rendered for the routing prompt
pub fn render_catalog() -> String {
    CATALOG
        .iter()
        .map(|tool| {
            format!(
                "- {}: {} (required arguments: {})",
                tool.name,
                tool.purpose,
                tool.required_args.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Weather,
    DocumentSearch,
    None,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Weather => WEATHER_TOOL.name,
            ToolKind::DocumentSearch => DOCUMENT_SEARCH_TOOL.name,
            ToolKind::None => "none",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Strict,
    Permissive,
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMode::Strict => f.write_str("strict"),
            RoutingMode::Permissive => f.write_str("permissive"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    tool: String,
    #[serde(default)]
    arguments: Map<String, Value>,
    #[serde(default)]
    message: Option<String>,
}

/// The model's reply after schema validation, before catalog matching
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedDecision {
    Tool {
        name: String,
        arguments: Map<String, Value>,
        message: Option<String>,
    },
    /// Reply did not match the decision schema; carries the raw reply
    ParseFailure(String),
}

impl ParsedDecision {
    /// Parse a routing reply, tolerating a Markdown code fence around the JSON
    pub fn parse(reply: &str) -> Self {
        let body = strip_code_fence(reply);
        match serde_json::from_str::<RawDecision>(body) {
            Ok(raw) => ParsedDecision::Tool {
                name: raw.tool,
                arguments: raw.arguments,
                message: raw.message,
            },
            Err(_) => ParsedDecision::ParseFailure(reply.to_string()),
        }
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line
    let inner = match inner.find('\n') {
        Some(newline) => &inner[newline + 1..],
        None => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// A catalog tool with its validated arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Weather { location: String },
    DocumentSearch { query: String },
    None,
}

impl RoutingDecision {
    pub fn kind(&self) -> ToolKind {
        match self {
            RoutingDecision::Weather { .. } => ToolKind::Weather,
            RoutingDecision::DocumentSearch { .. } => ToolKind::DocumentSearch,
            RoutingDecision::None => ToolKind::None,
        }
    }
}

/// Router output for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub decision: RoutingDecision,
    /// Model free text; only ever set in permissive mode with no tool
    pub free_text: Option<String>,
}

impl Route {
    fn none() -> Self {
        Route {
            decision: RoutingDecision::None,
            free_text: None,
        }
    }
}

pub struct ToolRouter {
    config: RoutingConfig,
    retry: RetryPolicy,
}

impl ToolRouter {
    pub fn new(config: RoutingConfig, retry: RetryPolicy) -> Self {
        ToolRouter { config, retry }
    }

    pub fn mode(&self) -> RoutingMode {
        if self.config.strict_matching {
            RoutingMode::Strict
        } else {
            RoutingMode::Permissive
        }
    }

    /// Ask the routing model which tool answers `query`.
    ///
    /// A failed model call is returned as an error, never as `None`.
    pub async fn route<C: ChatProvider>(
        &self,
        chat: &C,
        prompts: &PromptSet,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<Route> {
        let history = limit_history(
            history,
            self.config.history_max_tokens,
            self.config.chars_per_token,
        );
        let catalog = render_catalog();
        let transcript = render_history(history);
        let prompt = render(
            &prompts.routing,
            &[
                ("catalog_version", CATALOG_VERSION),
                ("catalog", catalog.as_str()),
                ("history", transcript.as_str()),
                ("user_input", query),
            ],
        );
        let request = ChatRequest::new(prompt, self.config.temperature, self.config.max_tokens)
            .expecting_json();

        let reply = self
            .retry
            .run("routing", || chat.complete(&request))
            .await?;
        debug!("mode={} routing reply: {}", self.mode(), reply);

        let route = self.decide(&reply);
        info!(
            "mode={} prompts={} catalog={} routed to {}",
            self.mode(),
            prompts.version,
            CATALOG_VERSION,
            route.decision.kind()
        );
        Ok(route)
    }

    /// Map a raw routing reply onto the catalog
    pub fn decide(&self, reply: &str) -> Route {
        let mode = self.mode();
        match ParsedDecision::parse(reply) {
            ParsedDecision::Tool {
                name,
                arguments,
                message,
            } => {
                let Some(tool) = self.match_tool(&name) else {
                    if !is_none_name(&name) {
                        warn!("mode={} unknown tool {:?} coerced to none", mode, name);
                    }
                    return self.no_tool(message);
                };
                match build_decision(tool, &arguments) {
                    Some(decision) => Route {
                        decision,
                        free_text: None,
                    },
                    None => {
                        warn!(
                            "mode={} tool {} is missing required arguments, coerced to none",
                            mode, tool.name
                        );
                        Route::none()
                    }
                }
            }
            ParsedDecision::ParseFailure(raw) => {
                warn!("mode={} unparseable routing reply coerced to none", mode);
                let looks_structured = strip_code_fence(&raw).starts_with('{');
                if looks_structured {
                    Route::none()
                } else {
                    self.no_tool(Some(raw))
                }
            }
        }
    }

    fn match_tool(&self, name: &str) -> Option<ToolSpec> {
        match self.mode() {
            RoutingMode::Strict => CATALOG.iter().find(|tool| tool.name == name).copied(),
            RoutingMode::Permissive => {
                let name = name.trim().to_lowercase();
                let name = match name.as_str() {
                    "weather_query" => WEATHER_TOOL.name,
                    "rag_search" => DOCUMENT_SEARCH_TOOL.name,
                    other => other,
                };
                CATALOG.iter().find(|tool| tool.name == name).copied()
            }
        }
    }

    fn no_tool(&self, free_text: Option<String>) -> Route {
        let free_text = match self.mode() {
            RoutingMode::Strict => None,
            RoutingMode::Permissive => free_text
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
        };
        if free_text.is_some() {
            info!("mode=permissive surfacing model free text");
        }
        Route {
            decision: RoutingDecision::None,
            free_text,
        }
    }
}

fn is_none_name(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case("none")
}

fn required_arg(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn build_decision(tool: ToolSpec, arguments: &Map<String, Value>) -> Option<RoutingDecision> {
    if tool == WEATHER_TOOL {
        required_arg(arguments, "location").map(|location| RoutingDecision::Weather { location })
    } else if tool == DOCUMENT_SEARCH_TOOL {
        required_arg(arguments, "query").map(|query| RoutingDecision::DocumentSearch { query })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_support::ScriptedChat;
    use std::time::Duration;

    fn router(strict: bool) -> ToolRouter {
        ToolRouter::new(
            RoutingConfig {
                strict_matching: strict,
                ..RoutingConfig::default()
            },
            RetryPolicy::new(2, Duration::ZERO),
        )
    }

    #[test]
    fn test_weather_decision() {
        let route =
            router(true).decide(r#"{"tool": "weather", "arguments": {"location": " Tokyo "}}"#);
        assert_eq!(
            route.decision,
            RoutingDecision::Weather {
                location: "Tokyo".to_string()
            }
        );
    }

    #[test]
    fn test_code_fenced_decision() {
        let reply = "```json\n{\"tool\": \"document_search\", \"arguments\": {\"query\": \"pricing\"}}\n```";
        assert_eq!(
            router(true).decide(reply).decision,
            RoutingDecision::DocumentSearch {
                query: "pricing".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_tool_is_none_regardless_of_arguments() {
        let reply = r#"{"tool": "calculator", "arguments": {"expression": "2+2", "location": "Paris"}}"#;
        for strict in [true, false] {
            assert_eq!(router(strict).decide(reply).decision, RoutingDecision::None);
        }
    }

    #[test]
    fn test_strict_mode_is_case_sensitive() {
        for name in ["Weather", "WEATHER", " weather", "weather_query"] {
            let reply = format!(
                r#"{{"tool": "{}", "arguments": {{"location": "Oslo"}}}}"#,
                name
            );
            assert_eq!(
                router(true).decide(&reply).decision,
                RoutingDecision::None,
                "{:?} must not match in strict mode",
                name
            );
        }
    }

    #[test]
    fn test_permissive_mode_accepts_variants() {
        for name in ["Weather", " WEATHER ", "weather_query"] {
            let reply = format!(
                r#"{{"tool": "{}", "arguments": {{"location": "Oslo"}}}}"#,
                name
            );
            assert_eq!(router(false).decide(&reply).decision.kind(), ToolKind::Weather);
        }
    }

    #[test]
    fn test_malformed_replies_are_none() {
        let replies = [
            "",
            "weather",
            "{not json",
            r#"{"tool": 42}"#,
            r#"{"arguments": {"location": "Paris"}}"#,
            r#"{"tool": "weather", "arguments": null}"#,
            r#"["weather"]"#,
        ];
        for reply in replies {
            let route = router(true).decide(reply);
            assert_eq!(route.decision, RoutingDecision::None, "reply {:?}", reply);
            assert_eq!(route.free_text, None);
        }
    }

    #[test]
    fn test_missing_or_blank_arguments_are_none() {
        let replies = [
            r#"{"tool": "weather", "arguments": {}}"#,
            r#"{"tool": "weather", "arguments": {"location": "   "}}"#,
            r#"{"tool": "weather", "arguments": {"location": 12}}"#,
            r#"{"tool": "document_search", "arguments": {"location": "Paris"}}"#,
        ];
        for strict in [true, false] {
            for reply in replies {
                assert_eq!(router(strict).decide(reply).decision, RoutingDecision::None);
            }
        }
    }

    #[test]
    fn test_free_text_only_in_permissive_mode() {
        let reply = r#"{"tool": "none", "arguments": {}, "message": "2 + 2 = 4"}"#;
        assert_eq!(router(true).decide(reply).free_text, None);
        assert_eq!(
            router(false).decide(reply).free_text.as_deref(),
            Some("2 + 2 = 4")
        );

        let prose = router(false).decide("The answer is 4.");
        assert_eq!(prose.decision, RoutingDecision::None);
        assert_eq!(prose.free_text.as_deref(), Some("The answer is 4."));

        assert_eq!(router(false).decide("{broken json").free_text, None);
    }

    #[test]
    fn test_catalog_lists_both_tools() {
        let catalog = render_catalog();
        assert!(catalog.contains("- weather:"));
        assert!(catalog.contains("- document_search:"));
        assert_eq!(catalog.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_route_sends_catalog_and_json_request() {
        let chat = ScriptedChat::new()
            .reply(r#"{"tool": "weather", "arguments": {"location": "Tokyo"}}"#);
        let history = vec![ConversationTurn::new("Hi", "Hello!")];

        let route = router(true)
            .route(&chat, &PromptSet::default(), "What's the weather in Tokyo?", &history)
            .await
            .unwrap();

        assert_eq!(route.decision.kind(), ToolKind::Weather);
        let requests = chat.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].json_output);
        assert_eq!(requests[0].temperature, 0.0);
        assert!(requests[0].prompt.contains(CATALOG_VERSION));
        assert!(requests[0].prompt.contains("document_search"));
        assert!(requests[0].prompt.contains("User: Hi"));
        assert!(requests[0].prompt.contains("What's the weather in Tokyo?"));
    }

    #[tokio::test]
    async fn test_routing_failure_propagates() {
        let chat = ScriptedChat::new()
            .fail(Error::ChatService("timeout".into()))
            .fail(Error::ChatService("timeout".into()));

        let result = router(true)
            .route(&chat, &PromptSet::default(), "What is 2+2?", &[])
            .await;

        assert!(matches!(result, Err(Error::ChatService(_))));
        assert_eq!(chat.call_count(), 2);
    }

    #[tokio::test]
    async fn test_routing_auth_failure_is_not_retried() {
        let chat = ScriptedChat::new().fail(Error::Auth {
            service: crate::error::ServiceKind::Chat,
            message: "bad key".into(),
        });

        let result = router(true)
            .route(&chat, &PromptSet::default(), "hello", &[])
            .await;

        assert!(matches!(result, Err(Error::Auth { .. })));
        assert_eq!(chat.call_count(), 1);
    }
}
