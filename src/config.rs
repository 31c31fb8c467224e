use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Read an environment variable, falling back to `default` when unset
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Configuration(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::Configuration(format!(
                "{} must be true or false, got {}",
                key, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}

fn env_required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| Error::Configuration(format!("{} not set", key)))
}

/// Chunk window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            size: 500,
            overlap: 50,
        }
    }
}

/// Embedding batching and fan-out
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingConfig {
    /// Used when the upload has more chunks than `batch_threshold`
    pub batch_size_small: usize,
    /// Used for uploads at or under `batch_threshold`
    pub batch_size_large: usize,
    pub batch_threshold: usize,
    /// Maximum embedding batches in flight for one upload
    pub concurrency: usize,
}

impl EmbeddingConfig {
    /// Batch size for an upload of `total` texts
    pub fn batch_size_for(&self, total: usize) -> usize {
        if total > self.batch_threshold {
            self.batch_size_small
        } else {
            self.batch_size_large
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            batch_size_small: 5,
            batch_size_large: 10,
            batch_threshold: 50,
            concurrency: 2,
        }
    }
}

/// Retrieval budget
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub max_context_chunks: usize,
    pub max_context_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            max_context_chunks: 5,
            max_context_length: 2000,
        }
    }
}

/// Per-call-class timeouts
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub chat: Duration,
    pub embedding: Duration,
    pub weather: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            chat: Duration::from_secs(60),
            embedding: Duration::from_secs(120),
            weather: Duration::from_secs(30),
        }
    }
}

/// Tool routing behaviour
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Exact tool-name matching; unknown decisions collapse to no tool
    pub strict_matching: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history_max_tokens: usize,
    pub chars_per_token: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            strict_matching: true,
            temperature: 0.0,
            max_tokens: 200,
            history_max_tokens: 1000,
            chars_per_token: 4,
        }
    }
}

/// Answer composition and the canned answers that bypass the model
#[derive(Debug, Clone)]
pub struct CompositionConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_answer_chars: usize,
    pub no_tool_answer: String,
    pub no_documents_answer: String,
    pub unavailable_answer: String,
    /// `{location}` is replaced with the requested location
    pub location_not_found_answer: String,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        CompositionConfig {
            temperature: 0.7,
            max_tokens: 500,
            max_answer_chars: 2000,
            no_tool_answer: "I don't know. I can only answer questions about the weather \
                             or about the documents you have uploaded."
                .to_string(),
            no_documents_answer:
                "I couldn't find any relevant information in your documents to answer this question."
                    .to_string(),
            unavailable_answer:
                "The assistant is temporarily unavailable. Please try again in a moment."
                    .to_string(),
            location_not_found_answer:
                "I couldn't find weather information for \"{location}\". Please check the location name."
                    .to_string(),
        }
    }
}

/// Everything the core reads from its configuration surface
#[derive(Debug, Clone)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub timeouts: Timeouts,
    pub routing: RoutingConfig,
    pub composition: CompositionConfig,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub max_upload_bytes: u64,
    pub prompts_file: Option<PathBuf>,
}

impl Settings {
    /// Create the settings from environment variables, using defaults for unset keys
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::with_defaults();
        let composition = CompositionConfig {
            temperature: env_or("COMPOSITION_TEMPERATURE", defaults.composition.temperature)?,
            max_tokens: env_or("COMPOSITION_MAX_TOKENS", defaults.composition.max_tokens)?,
            max_answer_chars: env_or("MAX_ANSWER_CHARS", defaults.composition.max_answer_chars)?,
            no_tool_answer: env_or("FALLBACK_NO_TOOL", defaults.composition.no_tool_answer)?,
            no_documents_answer: env_or(
                "FALLBACK_NO_DOCUMENTS",
                defaults.composition.no_documents_answer,
            )?,
            unavailable_answer: env_or(
                "FALLBACK_UNAVAILABLE",
                defaults.composition.unavailable_answer,
            )?,
            location_not_found_answer: defaults.composition.location_not_found_answer,
        };

        let settings = Settings {
            chunking: ChunkingConfig {
                size: env_or("RAG_CHUNK_SIZE", defaults.chunking.size)?,
                overlap: env_or("RAG_CHUNK_OVERLAP", defaults.chunking.overlap)?,
            },
            embedding: EmbeddingConfig {
                batch_size_small: env_or(
                    "EMBEDDING_BATCH_SIZE_SMALL",
                    defaults.embedding.batch_size_small,
                )?,
                batch_size_large: env_or(
                    "EMBEDDING_BATCH_SIZE_LARGE",
                    defaults.embedding.batch_size_large,
                )?,
                batch_threshold: env_or(
                    "EMBEDDING_BATCH_THRESHOLD",
                    defaults.embedding.batch_threshold,
                )?,
                concurrency: env_or("EMBEDDING_CONCURRENCY", defaults.embedding.concurrency)?,
            },
            retrieval: RetrievalConfig {
                max_context_chunks: env_or(
                    "RAG_MAX_CONTEXT_CHUNKS",
                    defaults.retrieval.max_context_chunks,
                )?,
                max_context_length: env_or(
                    "RAG_MAX_CONTEXT_LENGTH",
                    defaults.retrieval.max_context_length,
                )?,
            },
            timeouts: Timeouts {
                chat: Duration::from_secs(env_or("CHAT_TIMEOUT_SECS", 60u64)?),
                embedding: Duration::from_secs(env_or("EMBEDDING_TIMEOUT_SECS", 120u64)?),
                weather: Duration::from_secs(env_or("WEATHER_TIMEOUT_SECS", 30u64)?),
            },
            routing: RoutingConfig {
                strict_matching: env_bool("STRICT_TOOL_MATCHING", true)?,
                temperature: env_or("ROUTING_TEMPERATURE", defaults.routing.temperature)?,
                max_tokens: env_or("ROUTING_MAX_TOKENS", defaults.routing.max_tokens)?,
                history_max_tokens: env_or(
                    "HISTORY_MAX_TOKENS",
                    defaults.routing.history_max_tokens,
                )?,
                chars_per_token: env_or("CHARS_PER_TOKEN", defaults.routing.chars_per_token)?,
            },
            composition,
            max_retries: env_or("MAX_RETRIES", defaults.max_retries)?,
            retry_delay: Duration::from_millis(env_or("RETRY_DELAY_MS", 250u64)?),
            max_upload_bytes: env_or("MAX_UPLOAD_SIZE_MB", 10u64)? * 1024 * 1024,
            prompts_file: env::var("PROMPTS_FILE").ok().map(PathBuf::from),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Built-in defaults, without reading the environment
    pub fn with_defaults() -> Self {
        Settings {
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            timeouts: Timeouts::default(),
            routing: RoutingConfig::default(),
            composition: CompositionConfig::default(),
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            max_upload_bytes: 10 * 1024 * 1024,
            prompts_file: None,
        }
    }

    /// Reject parameter combinations the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.size == 0 {
            return Err(Error::Configuration("chunk size must be positive".into()));
        }
        if self.chunking.overlap >= self.chunking.size {
            return Err(Error::Configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunking.overlap, self.chunking.size
            )));
        }
        if self.embedding.batch_size_small == 0 || self.embedding.batch_size_large == 0 {
            return Err(Error::Configuration("embedding batch sizes must be positive".into()));
        }
        if self.embedding.concurrency == 0 {
            return Err(Error::Configuration("embedding concurrency must be positive".into()));
        }
        if self.retrieval.max_context_chunks == 0 {
            return Err(Error::Configuration("max context chunks must be positive".into()));
        }
        if self.routing.chars_per_token == 0 {
            return Err(Error::Configuration("chars per token must be positive".into()));
        }
        if self.timeouts.chat.is_zero() || self.timeouts.embedding.is_zero() {
            return Err(Error::Configuration("timeouts must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Configuration("max retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }
}

/// Configuration for the Gemini API
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Full URL of the `batchEmbedContents` endpoint
    pub embeddings_url: String,
    /// Full URL of the `generateContent` endpoint
    pub generate_url: String,
    pub embedding_model: String,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env_required("GEMINI_API_KEY")?;
        let embeddings_url = env_or(
            "GEMINI_EMBEDDINGS_URL",
            "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:batchEmbedContents"
                .to_string(),
        )?;
        let generate_url = env_or(
            "GEMINI_GENERATE_URL",
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
                .to_string(),
        )?;
        let embedding_model =
            env_or("GEMINI_EMBEDDING_MODEL", "models/text-embedding-004".to_string())?;

        Ok(GeminiConfig {
            api_key,
            embeddings_url,
            generate_url,
            embedding_model,
        })
    }
}

/// Configuration for the OpenWeatherMap current-weather endpoint
#[derive(Clone)]
pub struct WeatherConfig {
    pub api_key: String,
    pub url: String,
}

impl WeatherConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env_required("OPENWEATHER_API_KEY")?;
        let url = env_or(
            "OPENWEATHER_API_URL",
            "https://api.openweathermap.org/data/2.5/weather".to_string(),
        )?;
        Ok(WeatherConfig { api_key, url })
    }
}

/// Configuration for Qdrant
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env_required("QDRANT_URL")?;
        let api_key = env::var("QDRANT_API_KEY").ok();

        Ok(QdrantConfig { url, api_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::with_defaults();
        settings.validate().unwrap();
        assert_eq!(settings.chunking, ChunkingConfig { size: 500, overlap: 50 });
        assert!(settings.routing.strict_matching);
        assert!(settings.timeouts.embedding > settings.timeouts.chat);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut settings = Settings::with_defaults();
        settings.chunking.overlap = settings.chunking.size;
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_batch_size_switches_at_threshold() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.batch_size_for(10), 10);
        assert_eq!(config.batch_size_for(50), 10);
        assert_eq!(config.batch_size_for(51), 5);
    }
}
