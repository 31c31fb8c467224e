pub mod chunking;
pub mod composer;
pub mod config;
pub mod context;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod index;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod rag;
pub mod retrieval;
pub mod retry;
pub mod router;
pub mod tools;
pub mod weather;

#[cfg(test)]
mod test_support;
