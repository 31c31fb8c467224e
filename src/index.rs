use crate::database::QdrantIndex;
use crate::error::{Error, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An embedded chunk owned by its user's index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub user_id: String,
    pub document_id: String,
    /// Position of the chunk within its document
    pub index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub score: f32,
}

/// Per-user vector storage
#[allow(async_fn_in_trait)]
pub trait VectorIndex {
    /// Replace every chunk of `document_id` with `chunks` as one unit
    async fn upsert(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<()>;

    /// Remove the chunks of one document, returning how many were removed
    async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize>;

    /// Up to `k` chunks by descending cosine similarity; ties keep chunk order
    async fn nearest(&self, user_id: &str, query: &[f32], k: usize)
        -> Result<Vec<RetrievedChunk>>;

    async fn chunk_count(&self, user_id: &str) -> Result<usize>;
}

impl<T: VectorIndex> VectorIndex for &T {
    async fn upsert(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<()> {
        (**self).upsert(user_id, document_id, chunks).await
    }

    async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize> {
        (**self).delete(user_id, document_id).await
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        (**self).nearest(user_id, query, k).await
    }

    async fn chunk_count(&self, user_id: &str) -> Result<usize> {
        (**self).chunk_count(user_id).await
    }
}

/// Cosine similarity; zero-length vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Check that every vector in `chunks` has the same length, returning it
fn batch_dimension(chunks: &[IndexedChunk]) -> Result<Option<usize>> {
    let mut dimension = None;
    for chunk in chunks {
        match dimension {
            None => dimension = Some(chunk.vector.len()),
            Some(expected) if expected != chunk.vector.len() => {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: chunk.vector.len(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(dimension)
}

#[derive(Default)]
struct UserIndex {
    /// Insertion order doubles as the tie-break order
    chunks: Vec<IndexedChunk>,
}

impl UserIndex {
    fn dimension(&self) -> Option<usize> {
        self.chunks.first().map(|c| c.vector.len())
    }
}

/// In-process index: one entry per user, each behind its own lock
#[derive(Default)]
pub struct InMemoryIndex {
    users: RwLock<HashMap<String, Arc<RwLock<UserIndex>>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, user_id: &str) -> Option<Arc<RwLock<UserIndex>>> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn entry_or_create(&self, user_id: &str) -> Arc<RwLock<UserIndex>> {
        if let Some(entry) = self.entry(user_id).await {
            return entry;
        }
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!("Creating index entry for user {}", user_id);
                Arc::new(RwLock::new(UserIndex::default()))
            })
            .clone()
    }

    /// Drop the user's entry if it is empty and nobody else holds it
    async fn evict_if_empty(&self, user_id: &str) {
        let mut users = self.users.write().await;
        let Some(entry) = users.get(user_id) else {
            return;
        };
        // Callers clone the Arc under the map lock, so a count of one means
        // no upload for this user is in flight
        if Arc::strong_count(entry) > 1 {
            return;
        }
        let empty = entry
            .try_read()
            .map(|index| index.chunks.is_empty())
            .unwrap_or(false);
        if empty {
            users.remove(user_id);
            debug!("Evicted empty index entry for user {}", user_id);
        }
    }
}

impl VectorIndex for InMemoryIndex {
    async fn upsert(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<()> {
        let incoming = batch_dimension(&chunks)?;
        let entry = self.entry_or_create(user_id).await;

        let result = {
            let mut index = entry.write().await;
            let retained_dimension = index
                .chunks
                .iter()
                .find(|c| c.document_id != document_id)
                .map(|c| c.vector.len());
            match (retained_dimension, incoming) {
                (Some(expected), Some(actual)) if expected != actual => {
                    Err(Error::DimensionMismatch { expected, actual })
                }
                _ => {
                    let before = index.chunks.len();
                    index.chunks.retain(|c| c.document_id != document_id);
                    let replaced = before - index.chunks.len();
                    let added = chunks.len();
                    index.chunks.extend(chunks);

                    info!(
                        "Indexed {} chunks of document {} for user {} (replaced {}, dimension {:?})",
                        added,
                        document_id,
                        user_id,
                        replaced,
                        index.dimension()
                    );
                    Ok(())
                }
            }
        };

        drop(entry);
        self.evict_if_empty(user_id).await;
        result
    }

    async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize> {
        let Some(entry) = self.entry(user_id).await else {
            return Ok(0);
        };

        let removed = {
            let mut index = entry.write().await;
            let before = index.chunks.len();
            index.chunks.retain(|c| c.document_id != document_id);
            before - index.chunks.len()
        };
        info!(
            "Removed {} chunks of document {} for user {}",
            removed, document_id, user_id
        );

        drop(entry);
        self.evict_if_empty(user_id).await;
        Ok(removed)
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let Some(entry) = self.entry(user_id).await else {
            return Ok(Vec::new());
        };
        let index = entry.read().await;

        if let Some(expected) = index.dimension() {
            if expected != query.len() {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &IndexedChunk)> = index
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(query, &chunk.vector), chunk))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| RetrievedChunk {
                document_id: chunk.document_id.clone(),
                index: chunk.index,
                text: chunk.text.clone(),
                score,
            })
            .collect())
    }

    async fn chunk_count(&self, user_id: &str) -> Result<usize> {
        match self.entry(user_id).await {
            Some(entry) => Ok(entry.read().await.chunks.len()),
            None => Ok(0),
        }
    }
}

/// Index backend chosen at startup
pub enum AnyIndex {
    Memory(InMemoryIndex),
    Qdrant(QdrantIndex),
}

impl VectorIndex for AnyIndex {
    async fn upsert(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<()> {
        match self {
            AnyIndex::Memory(index) => index.upsert(user_id, document_id, chunks).await,
            AnyIndex::Qdrant(index) => index.upsert(user_id, document_id, chunks).await,
        }
    }

    async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize> {
        match self {
            AnyIndex::Memory(index) => index.delete(user_id, document_id).await,
            AnyIndex::Qdrant(index) => index.delete(user_id, document_id).await,
        }
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        match self {
            AnyIndex::Memory(index) => index.nearest(user_id, query, k).await,
            AnyIndex::Qdrant(index) => index.nearest(user_id, query, k).await,
        }
    }

    async fn chunk_count(&self, user_id: &str) -> Result<usize> {
        match self {
            AnyIndex::Memory(index) => index.chunk_count(user_id).await,
            AnyIndex::Qdrant(index) => index.chunk_count(user_id).await,
        }
    }
}
