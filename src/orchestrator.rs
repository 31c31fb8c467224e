//! Query pipeline: route, run the tool, compose the answer

use crate::composer::ResponseComposer;
use crate::config::Settings;
use crate::context::ConversationTurn;
use crate::embeddings::{Embedder, EmbeddingProvider};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::llm::ChatProvider;
use crate::prompts::PromptSet;
use crate::rag::{IngestRequest, RagEngine};
use crate::retrieval::RetrievalEngine;
use crate::router::{RoutingMode, ToolKind, ToolRouter};
use crate::tools::{ToolOutcome, Tools};
use crate::weather::WeatherProvider;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Inbound question
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_id: String,
    pub user_input: String,
    /// Earlier turns, oldest first
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
}

impl QueryRequest {
    pub fn new(user_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        QueryRequest {
            user_id: user_id.into(),
            user_input: user_input.into(),
            conversation: Vec::new(),
        }
    }

    pub fn with_conversation(mut self, conversation: Vec<ConversationTurn>) -> Self {
        self.conversation = conversation;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Answered,
    /// A provider failed after retries; the answer is the canned outage message
    Unavailable,
}

/// Document chunk an answer was grounded on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub final_answer: String,
    /// `None` when the query failed before a routing decision was made
    pub tool_used: Option<ToolKind>,
    pub routing_mode: RoutingMode,
    pub status: ResponseStatus,
    /// Retrieved chunks, best first; empty unless documents were searched
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

fn sources(outcome: &ToolOutcome) -> Vec<SourceRef> {
    match outcome {
        ToolOutcome::Documents(result) => result
            .chunks
            .iter()
            .map(|chunk| SourceRef {
                document_id: chunk.document_id.clone(),
                index: chunk.index,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub struct Orchestrator<C, W, E, I> {
    chat: C,
    prompts: PromptSet,
    router: ToolRouter,
    tools: Tools<W, E, I>,
    composer: ResponseComposer,
}

impl<C, W, E, I> Orchestrator<C, W, E, I>
where
    C: ChatProvider,
    W: WeatherProvider,
    E: EmbeddingProvider,
    I: VectorIndex,
{
    pub fn new(
        chat: C,
        prompts: PromptSet,
        router: ToolRouter,
        tools: Tools<W, E, I>,
        composer: ResponseComposer,
    ) -> Self {
        Orchestrator {
            chat,
            prompts,
            router,
            tools,
            composer,
        }
    }

    /// Wire every component from one configuration snapshot
    pub fn from_settings(
        settings: &Settings,
        prompts: PromptSet,
        chat: C,
        weather: W,
        embeddings: E,
        index: I,
    ) -> Self {
        let retry = settings.retry_policy();
        let rag = RagEngine::new(
            Embedder::new(embeddings, settings.embedding, retry),
            index,
            RetrievalEngine::new(settings.retrieval),
            settings.chunking,
        );

        Orchestrator::new(
            chat,
            prompts,
            ToolRouter::new(settings.routing.clone(), retry),
            Tools::new(weather, rag, retry),
            ResponseComposer::new(settings.composition.clone(), retry),
        )
    }

    pub fn rag(&self) -> &RagEngine<E, I> {
        self.tools.rag()
    }

    pub fn routing_mode(&self) -> RoutingMode {
        self.router.mode()
    }

    /// Answer one query, returning provider failures to the caller
    pub async fn handle_query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let session_id = Uuid::new_v4().simple().to_string();
        let session = &session_id[..8];
        let mode = self.router.mode();
        let query = request.user_input.trim();

        if query.is_empty() {
            info!("[{}] mode={} empty query", session, mode);
            return Ok(QueryResponse {
                final_answer: self.composer.no_tool_answer(),
                tool_used: Some(ToolKind::None),
                routing_mode: mode,
                status: ResponseStatus::Answered,
                sources: Vec::new(),
            });
        }

        info!(
            "[{}] mode={} processing query from {}: {:.100}",
            session, mode, request.user_id, query
        );

        let route = self
            .router
            .route(&self.chat, &self.prompts, query, &request.conversation)
            .await?;
        let tool = route.decision.kind();

        let outcome = self.tools.execute(&request.user_id, route).await?;
        let final_answer = self
            .composer
            .compose(&self.chat, &self.prompts, &outcome, query)
            .await?;

        let sources = sources(&outcome);

        info!(
            "[{}] mode={} answered with tool={} and {} sources in {:?}",
            session,
            mode,
            tool,
            sources.len(),
            started.elapsed()
        );

        Ok(QueryResponse {
            final_answer,
            tool_used: Some(tool),
            routing_mode: mode,
            status: ResponseStatus::Answered,
            sources,
        })
    }

    /// Like [`handle_query`](Self::handle_query), but unrecovered failures
    /// become the "temporarily unavailable" answer
    pub async fn respond(&self, request: &QueryRequest) -> QueryResponse {
        match self.handle_query(request).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    "mode={} query from {} failed: {}",
                    self.router.mode(),
                    request.user_id,
                    err
                );
                QueryResponse {
                    final_answer: self.composer.unavailable_answer(),
                    tool_used: None,
                    routing_mode: self.router.mode(),
                    status: ResponseStatus::Unavailable,
                    sources: Vec::new(),
                }
            }
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<usize> {
        self.rag().ingest(request).await
    }

    pub async fn delete(&self, user_id: &str, document_id: &str) -> Result<usize> {
        self.rag().delete(user_id, document_id).await
    }
}
