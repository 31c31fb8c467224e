use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};

/// Representation of a vector embedding
pub type Embedding = Vec<f32>;

/// Trait for remote embedding services
///
/// One call embeds one batch; implementations enforce the embedding timeout.
#[allow(async_fn_in_trait)]
pub trait EmbeddingProvider {
    /// Embed `texts`, returning one vector per input in the same order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

impl<T: EmbeddingProvider> EmbeddingProvider for &T {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        (**self).embed_batch(texts).await
    }
}

/// Batching, retrying front end over an [`EmbeddingProvider`]
pub struct Embedder<P> {
    provider: P,
    config: EmbeddingConfig,
    retry: RetryPolicy,
}

impl<P: EmbeddingProvider> Embedder<P> {
    pub fn new(provider: P, config: EmbeddingConfig, retry: RetryPolicy) -> Self {
        Embedder {
            provider,
            config,
            retry,
        }
    }

    /// Embed every text, preserving input order.
    ///
    /// Batches run concurrently up to the configured ceiling. The first batch
    /// that still fails after its retries aborts the whole call and every
    /// vector produced so far is dropped.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.config.batch_size_for(texts.len()).max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        info!(
            "Embedding {} texts in {} batches of up to {}",
            texts.len(),
            total_batches,
            batch_size
        );

        let batches: Vec<Vec<Embedding>> = stream::iter(texts.chunks(batch_size).enumerate())
            .map(|(number, batch)| self.embed_with_retry(number + 1, total_batches, batch))
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        let embeddings: Vec<Embedding> = batches.into_iter().flatten().collect();
        info!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }

    /// Embed a single query string
    pub async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let batch = [text.to_string()];
        self.embed_with_retry(1, 1, &batch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingService("no embedding returned for query".into()))
    }

    async fn embed_with_retry(
        &self,
        number: usize,
        total: usize,
        batch: &[String],
    ) -> Result<Vec<Embedding>> {
        let label = format!("embedding batch {}/{}", number, total);
        let result = self
            .retry
            .run(&label, || async {
                debug!("Sending {} ({} texts)", label, batch.len());
                let vectors = self.provider.embed_batch(batch).await?;
                if vectors.len() != batch.len() {
                    return Err(Error::EmbeddingService(format!(
                        "{} returned {} vectors for {} inputs",
                        label,
                        vectors.len(),
                        batch.len()
                    )));
                }
                Ok(vectors)
            })
            .await;

        match result {
            Err(err) if err.is_retryable() => Err(Error::EmbeddingService(format!(
                "{} failed after {} attempts: {}",
                label, self.retry.max_attempts, err
            ))),
            other => other,
        }
    }
}
