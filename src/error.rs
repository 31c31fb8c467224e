//! Error taxonomy for the retrieval and routing core

use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// External service a failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Embedding,
    Chat,
    Weather,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Embedding => "embedding",
            ServiceKind::Chat => "chat",
            ServiceKind::Weather => "weather",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Chat service error: {0}")]
    ChatService(String),

    #[error("Weather service error: {0}")]
    WeatherService(String),

    #[error("{service} service rejected credentials: {message}")]
    Auth {
        service: ServiceKind,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const INVALID_KEY_MARKERS: [&str; 2] = ["API_KEY_INVALID", "API key not valid"];

fn is_invalid_key(body: &str) -> bool {
    INVALID_KEY_MARKERS.iter().any(|marker| body.contains(marker))
}

impl Error {
    /// Transient provider failure for the given service
    pub fn service(service: ServiceKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match service {
            ServiceKind::Embedding => Error::EmbeddingService(message),
            ServiceKind::Chat => Error::ChatService(message),
            ServiceKind::Weather => Error::WeatherService(message),
        }
    }

    /// Map a non-success HTTP status to the taxonomy
    pub fn from_status(service: ServiceKind, status: StatusCode, body: &str) -> Self {
        let message = format!("{} {}", status, body.trim());
        match status.as_u16() {
            401 | 403 => Error::Auth { service, message },
            // Gemini rejects a bad key with 400 rather than 401
            400 if is_invalid_key(body) => Error::Auth { service, message },
            404 => Error::NotFound(message),
            429 => Error::service(service, message),
            s if (400..500).contains(&s) => Error::Validation(message),
            _ => Error::service(service, message),
        }
    }

    /// Map a transport failure (timeout, connect, decode) to the taxonomy
    pub fn from_transport(service: ServiceKind, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::service(service, format!("request timed out: {}", err))
        } else if err.is_decode() {
            Error::service(service, format!("invalid response body: {}", err))
        } else {
            Error::service(service, format!("request failed: {}", err))
        }
    }

    /// Whether the failure may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingService(_)
                | Error::ChatService(_)
                | Error::WeatherService(_)
                | Error::VectorStore(_)
        )
    }
}
