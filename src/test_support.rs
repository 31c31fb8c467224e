//! In-crate doubles for the outbound providers; every call is recorded

use crate::embeddings::{Embedding, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::llm::{ChatProvider, ChatRequest};
use crate::weather::{WeatherProvider, WeatherReport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic bag-of-words embedder
pub struct HashEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    failures: Mutex<VecDeque<Error>>,
    staggered: bool,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        HashEmbedder {
            dimensions,
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            staggered: false,
        }
    }

    /// Make earlier batches finish later than later ones
    pub fn with_latency_by_batch(mut self) -> Self {
        self.staggered = true;
        self
    }

    pub fn fail_next(&self, error: Error) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn vector_for(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            // FNV-1a keeps buckets stable across runs
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if self.staggered {
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(call as u64 * 3))).await;
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Chat model that replays queued replies and records every request
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, error: Error) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ChatProvider for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::ChatService("no scripted reply left".into())))
    }
}

/// Weather provider returning canned reports
pub struct StubWeather {
    calls: Mutex<Vec<String>>,
    outcomes: Mutex<VecDeque<Result<WeatherReport>>>,
}

impl StubWeather {
    pub fn new() -> Self {
        StubWeather {
            calls: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn report(self, report: WeatherReport) -> Self {
        self.outcomes.lock().unwrap().push_back(Ok(report));
        self
    }

    pub fn fail(self, error: Error) -> Self {
        self.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn locations(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl WeatherProvider for StubWeather {
    async fn current_weather(&self, location: &str) -> Result<WeatherReport> {
        self.calls.lock().unwrap().push(location.to_string());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::WeatherService("no stubbed report left".into())))
    }
}

pub fn tokyo_report() -> WeatherReport {
    WeatherReport {
        location: "Tokyo".to_string(),
        country: Some("JP".to_string()),
        conditions: "Light Rain".to_string(),
        temperature_c: 18.4,
        feels_like_c: 17.9,
        humidity: 82,
        wind_speed_kmh: 12.6,
    }
}
