use crate::config::QdrantConfig;
use crate::error::{Error, Result};
use crate::index::{IndexedChunk, RetrievedChunk, VectorIndex};
use log::{debug, info};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, PointStruct, Range, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Qdrant-backed index with one collection per user.
///
/// Writes to one collection are serialized in-process, and point ids are
/// derived from (user, document, chunk index), so re-ingesting a document
/// overwrites its points instead of adding a second copy.
pub struct QdrantIndex {
    client: Qdrant,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QdrantIndex {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build().map_err(store_error)?;

        Ok(QdrantIndex {
            client,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Lock guarding writes to one collection
    async fn write_lock(&self, collection_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks.entry(collection_name.to_string()).or_default().clone()
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool> {
        self.client
            .collection_exists(collection_name)
            .await
            .map_err(store_error)
    }

    /// Create the user's collection sized for `dimension`-long vectors
    async fn ensure_collection(&self, collection_name: &str, dimension: usize) -> Result<()> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        info!(
            "Creating collection {} ({} dimensions)",
            collection_name, dimension
        );
        let create_collection = CreateCollectionBuilder::new(collection_name)
            .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine));

        if let Err(err) = self.client.create_collection(create_collection).await {
            // Another process may have created it between the check and the call
            if !self.collection_exists(collection_name).await? {
                return Err(store_error(err));
            }
            debug!("Collection {} was created concurrently", collection_name);
        }

        Ok(())
    }
}

fn document_filter(document_id: &str) -> Filter {
    Filter::must([Condition::matches("document_id", document_id.to_string())])
}

/// Chunks of `document_id` at or beyond `first_index`
fn stale_chunks_filter(document_id: &str, first_index: usize) -> Filter {
    Filter::must([
        Condition::matches("document_id", document_id.to_string()),
        Condition::range(
            "chunk_index",
            Range {
                gte: Some(first_index as f64),
                ..Default::default()
            },
        ),
    ])
}

/// Stable point id for one chunk of one user's document
fn point_id(user_id: &str, document_id: &str, chunk_index: usize) -> String {
    let name = format!("{}/{}/{}", user_id, document_id, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<()> {
        let collection_name = get_collection_name(user_id);
        let lock = self.write_lock(&collection_name).await;
        let _guard = lock.lock().await;

        let Some(dimension) = chunks.first().map(|c| c.vector.len()) else {
            if self.collection_exists(&collection_name).await? {
                self.client
                    .delete_points(
                        DeletePointsBuilder::new(&collection_name)
                            .points(document_filter(document_id))
                            .wait(true),
                    )
                    .await
                    .map_err(store_error)?;
            }
            return Ok(());
        };
        self.ensure_collection(&collection_name, dimension).await?;

        let points = chunks
            .into_iter()
            .map(|chunk| {
                let id = point_id(user_id, document_id, chunk.index);
                let payload = Payload::try_from(json!({
                    "text": chunk.text,
                    "document_id": chunk.document_id,
                    "chunk_index": chunk.index,
                }))
                .map_err(store_error)?;

                Ok(PointStruct::new(id, chunk.vector, payload))
            })
            .collect::<Result<Vec<_>>>()?;
        let added = points.len();

        // New points overwrite old ones by id; a failed write leaves the
        // previous version in place
        self.client
            .upsert_points(UpsertPointsBuilder::new(&collection_name, points).wait(true))
            .await
            .map_err(store_error)?;

        // Drop the tail left over from a longer previous version
        self.client
            .delete_points(
                DeletePointsBuilder::new(&collection_name)
                    .points(stale_chunks_filter(document_id, added))
                    .wait(true),
            )
            .await
            .map_err(store_error)?;

        info!(
            "Stored {} chunks of document {} in {}",
            added, document_id, collection_name
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize> {
        let collection_name = get_collection_name(user_id);
        let lock = self.write_lock(&collection_name).await;
        let _guard = lock.lock().await;
        if !self.collection_exists(&collection_name).await? {
            return Ok(0);
        }

        let count = self
            .client
            .count(
                CountPointsBuilder::new(&collection_name)
                    .filter(document_filter(document_id))
                    .exact(true),
            )
            .await
            .map_err(store_error)?
            .result
            .map(|r| r.count as usize)
            .unwrap_or(0);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&collection_name)
                    .points(document_filter(document_id))
                    .wait(true),
            )
            .await
            .map_err(store_error)?;

        info!(
            "Removed {} chunks of document {} from {}",
            count, document_id, collection_name
        );
        Ok(count)
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let collection_name = get_collection_name(user_id);
        if k == 0 || !self.collection_exists(&collection_name).await? {
            return Ok(Vec::new());
        }

        let search_response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&collection_name, query.to_vec(), k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(store_error)?;

        // Convert search results back to chunks
        let mut hits: Vec<RetrievedChunk> = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let payload = scored_point.payload;
                let text = payload.get("text")?.as_str()?.to_string();
                let document_id = payload.get("document_id")?.as_str()?.to_string();
                let index = payload
                    .get("chunk_index")
                    .and_then(|v| v.as_integer())
                    .map(|v| v as usize)
                    .unwrap_or(0);

                Some(RetrievedChunk {
                    document_id,
                    index,
                    text,
                    score: scored_point.score,
                })
            })
            .collect();

        // Qdrant gives no ordering guarantee among equal scores
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.index.cmp(&b.index))
        });
        debug!("Qdrant returned {} hits from {}", hits.len(), collection_name);

        Ok(hits)
    }

    async fn chunk_count(&self, user_id: &str) -> Result<usize> {
        let collection_name = get_collection_name(user_id);
        if !self.collection_exists(&collection_name).await? {
            return Ok(0);
        }

        Ok(self
            .client
            .count(CountPointsBuilder::new(&collection_name).exact(true))
            .await
            .map_err(store_error)?
            .result
            .map(|r| r.count as usize)
            .unwrap_or(0))
    }
}

fn store_error(err: QdrantError) -> Error {
    if let QdrantError::ResponseError { status } = &err {
        if status.code() == tonic::Code::InvalidArgument {
            return Error::Validation(format!("Qdrant rejected request: {}", status.message()));
        }
    }
    Error::VectorStore(err.to_string())
}

/// Generate a collection name from a user id
fn get_collection_name(user_id: &str) -> String {
    // Replace non-alphanumeric characters with underscores and convert to lowercase
    let name = user_id
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    format!("rag_user_{}", name)
}
