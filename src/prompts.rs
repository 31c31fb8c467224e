//! Versioned prompt templates
//!
//! Templates are loaded once at startup, either from a `[section]` text file
//! or from the built-in defaults, and passed explicitly to the router and the
//! composer. Placeholders use `{name}` syntax; any other braces are literal.

use crate::error::{Error, Result};
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_VERSION: &str = "builtin-1";

const DEFAULT_ROUTING: &str = r#"You are a tool selector. Decide which single tool, if any, can answer the user's question.
You never answer the question yourself.

Available tools (catalog {catalog_version}):
{catalog}

Conversation so far:
{history}

User question: "{user_input}"

Reply with ONLY a JSON object of the form
{"tool": "<tool name>", "arguments": {"<argument>": "<value>"}}
Use {"tool": "none", "arguments": {}} when no tool applies."#;

const DEFAULT_WEATHER_RESPONSE: &str = r#"The user asked about the weather: "{user_query}"

Weather data:
{tool_data}

Answer the user in a short, friendly way using ONLY the weather data above.
Mention the temperature and the conditions."#;

const DEFAULT_DOCUMENT_RESPONSE: &str = r#"The user asked: "{user_query}"

Excerpts from the user's documents:
{tool_data}

Answer the question using ONLY the excerpts above. If they do not contain the
answer, say so clearly. Keep the answer concise."#;

/// Immutable set of templates used for one process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub version: String,
    pub routing: String,
    pub weather_response: String,
    pub document_response: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        PromptSet {
            version: DEFAULT_VERSION.to_string(),
            routing: DEFAULT_ROUTING.to_string(),
            weather_response: DEFAULT_WEATHER_RESPONSE.to_string(),
            document_response: DEFAULT_DOCUMENT_RESPONSE.to_string(),
        }
    }
}

impl PromptSet {
    /// Load templates from a file, or the built-in defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let prompts = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!(
                        "cannot read prompts file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::parse(&content)?
            }
            None => Self::default(),
        };
        info!("Loaded prompt templates version {}", prompts.version);
        Ok(prompts)
    }

    /// Parse the `[section]` format; `#` and `===` lines are ignored
    pub fn parse(content: &str) -> Result<Self> {
        let mut sections: HashMap<String, Vec<&str>> = HashMap::new();
        let mut current: Option<String> = None;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() > 2 {
                let key = trimmed[1..trimmed.len() - 1].trim().to_string();
                sections.entry(key.clone()).or_default();
                current = Some(key);
            } else if trimmed.starts_with('#') || trimmed.starts_with("===") {
                continue;
            } else if let Some(key) = &current {
                sections.entry(key.clone()).or_default().push(line);
            }
        }

        let mut take = |key: &str| -> Result<String> {
            let text = sections
                .remove(key)
                .map(|lines| lines.join("\n").trim().to_string())
                .unwrap_or_default();
            if text.is_empty() {
                return Err(Error::Configuration(format!(
                    "prompts file is missing the [{}] section",
                    key
                )));
            }
            Ok(text)
        };

        let prompts = PromptSet {
            version: take("version")?,
            routing: take("routing")?,
            weather_response: take("weather_response")?,
            document_response: take("document_response")?,
        };
        prompts.validate()?;
        Ok(prompts)
    }

    /// Every template must carry the placeholders its caller fills in
    pub fn validate(&self) -> Result<()> {
        let response_placeholders: &[&str] = &["{user_query}", "{tool_data}"];
        let required: [(&str, &str, &[&str]); 3] = [
            ("routing", self.routing.as_str(), &["{user_input}", "{catalog}"][..]),
            ("weather_response", self.weather_response.as_str(), response_placeholders),
            ("document_response", self.document_response.as_str(), response_placeholders),
        ];
        for (name, template, placeholders) in required {
            for placeholder in placeholders {
                if !template.contains(placeholder) {
                    return Err(Error::Configuration(format!(
                        "prompt [{}] must contain {}",
                        name, placeholder
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Substitute `{name}` placeholders in a single pass; unknown names are left as-is
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replacement {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
