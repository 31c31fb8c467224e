use crate::chunking::chunk_document;
use crate::config::ChunkingConfig;
use crate::embeddings::{Embedder, EmbeddingProvider};
use crate::error::Result;
use crate::index::{IndexedChunk, VectorIndex};
use crate::retrieval::{RetrievalEngine, RetrievalResult};
use log::info;

/// A document upload
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub user_id: String,
    pub document_id: String,
    pub raw_text: String,
}

/// RAG (Retrieval-Augmented Generation) engine: ingestion and document search
pub struct RagEngine<E, I> {
    embedder: Embedder<E>,
    index: I,
    retrieval: RetrievalEngine,
    chunking: ChunkingConfig,
}

impl<E: EmbeddingProvider, I: VectorIndex> RagEngine<E, I> {
    /// Create a new RAG engine
    pub fn new(
        embedder: Embedder<E>,
        index: I,
        retrieval: RetrievalEngine,
        chunking: ChunkingConfig,
    ) -> Self {
        RagEngine {
            embedder,
            index,
            retrieval,
            chunking,
        }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Process a document: chunk it, generate embeddings, and store them.
    ///
    /// Nothing is written unless every chunk was embedded. Re-ingesting a
    /// document id replaces its previous chunks. Returns the number of chunks
    /// indexed.
    pub async fn ingest(&self, request: IngestRequest) -> Result<usize> {
        let IngestRequest {
            user_id,
            document_id,
            raw_text,
        } = request;

        // Split content into chunks
        let chunks = chunk_document(&raw_text, &self.chunking)?;
        info!(
            "Split document {} for user {} into {} chunks",
            document_id,
            user_id,
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk {
                user_id: user_id.clone(),
                document_id: document_id.clone(),
                index: chunk.index,
                text: chunk.text,
                vector,
            })
            .collect();
        let count = indexed.len();

        self.index.upsert(&user_id, &document_id, indexed).await?;
        Ok(count)
    }

    /// Remove a document's chunks
    pub async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize> {
        self.index.delete(user_id, document_id).await
    }

    /// Embed `query` and retrieve the budgeted context for it
    pub async fn search(&self, user_id: &str, query: &str) -> Result<RetrievalResult> {
        let query_vector = self.embedder.embed_query(query).await?;
        self.retrieval
            .search(&self.index, user_id, &query_vector)
            .await
    }
}
