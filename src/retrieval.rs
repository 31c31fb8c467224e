use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::index::{RetrievedChunk, VectorIndex};
use log::{debug, info};

/// Ranked chunks selected for one query, already within budget
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Total characters of the selected chunk texts
    pub fn total_chars(&self) -> usize {
        self.chunks.iter().map(|c| c.text.chars().count()).sum()
    }

    /// Render the chunks as labelled context blocks
    pub fn context(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| format!("[Document: {}]\n{}", chunk.document_id, chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Applies the count and length budgets on top of a [`VectorIndex`] search
#[derive(Debug, Clone, Copy)]
pub struct RetrievalEngine {
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(config: RetrievalConfig) -> Self {
        RetrievalEngine { config }
    }

    pub async fn search<I: VectorIndex>(
        &self,
        index: &I,
        user_id: &str,
        query_vector: &[f32],
    ) -> Result<RetrievalResult> {
        let candidates = index
            .nearest(user_id, query_vector, self.config.max_context_chunks)
            .await?;
        let result = self.select(candidates);
        info!(
            "Retrieved {} chunks ({} chars) for user {}",
            result.len(),
            result.total_chars(),
            user_id
        );
        Ok(result)
    }

    /// Keep ranked candidates until either budget would be exceeded.
    ///
    /// The top candidate is always kept, even when it alone exceeds the
    /// length budget.
    pub fn select(&self, mut candidates: Vec<RetrievedChunk>) -> RetrievalResult {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut chunks = Vec::new();
        let mut total = 0;
        for candidate in candidates {
            if chunks.len() >= self.config.max_context_chunks {
                break;
            }
            let length = candidate.text.chars().count();
            if !chunks.is_empty() && total + length > self.config.max_context_length {
                debug!(
                    "Context budget reached at {} chars, skipping remaining candidates",
                    total
                );
                break;
            }
            total += length;
            chunks.push(candidate);
        }

        RetrievalResult { chunks }
    }
}
