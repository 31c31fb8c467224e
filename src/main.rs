use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use log::{error, info, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rag_router::config::{GeminiConfig, QdrantConfig, Settings, WeatherConfig};
use rag_router::context::ConversationTurn;
use rag_router::database::QdrantIndex;
use rag_router::document::Document;
use rag_router::embeddings::EmbeddingProvider;
use rag_router::gemini::GeminiClient;
use rag_router::index::{AnyIndex, InMemoryIndex, VectorIndex};
use rag_router::llm::ChatProvider;
use rag_router::orchestrator::{Orchestrator, QueryRequest, QueryResponse, ResponseStatus};
use rag_router::prompts::PromptSet;
use rag_router::weather::{OpenWeatherClient, WeatherProvider};

/// Chat assistant that answers weather questions and questions about your documents
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Where document chunks are stored
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// Process-local index, lost on exit
    Memory,
    /// Qdrant server from QDRANT_URL
    Qdrant,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload documents, then ask questions interactively
    Chat {
        #[arg(long)]
        user: String,
        /// Text, CSV, Word or PDF file to upload first; may be repeated
        #[arg(long = "document")]
        documents: Vec<PathBuf>,
    },
    /// Ask a single question
    Ask {
        #[arg(long)]
        user: String,
        question: String,
    },
    /// Upload a text, CSV, Word or PDF file (requires --backend qdrant)
    Ingest {
        #[arg(long)]
        user: String,
        path: PathBuf,
    },
    /// Remove an uploaded document (requires --backend qdrant)
    Delete {
        #[arg(long)]
        user: String,
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    check_backend(args.backend, &args.command)?;

    // Load configuration from environment
    let settings = Settings::from_env().context("Invalid configuration")?;
    let prompts = PromptSet::load(settings.prompts_file.as_deref())
        .context("Failed to load prompt templates")?;
    let gemini_config = GeminiConfig::from_env().context("Missing GEMINI_API_KEY")?;
    let weather_config = WeatherConfig::from_env().context("Missing OPENWEATHER_API_KEY")?;

    let gemini = GeminiClient::new(gemini_config, &settings.timeouts);
    let weather = OpenWeatherClient::new(weather_config, settings.timeouts.weather);
    let index = match args.backend {
        Backend::Memory => AnyIndex::Memory(InMemoryIndex::new()),
        Backend::Qdrant => {
            let qdrant_config = QdrantConfig::from_env().context("Missing QDRANT_URL")?;
            AnyIndex::Qdrant(
                QdrantIndex::new(qdrant_config).context("Failed to initialize Qdrant client")?,
            )
        }
    };
    info!("Using {:?} index backend", args.backend);
    if let (Backend::Memory, Command::Ask { .. }) = (args.backend, &args.command) {
        warn!("The memory backend starts empty; document questions will find nothing");
    }

    let orchestrator =
        Orchestrator::from_settings(&settings, prompts, &gemini, weather, &gemini, index);
    info!("Tool routing mode: {}", orchestrator.routing_mode());

    match args.command {
        Command::Chat { user, documents } => {
            for path in &documents {
                upload(&orchestrator, &settings, &user, path).await?;
            }
            run_chat_loop(&orchestrator, &user).await?;
        }
        Command::Ask { user, question } => {
            let response = orchestrator.respond(&QueryRequest::new(user, question)).await;
            print_answer(&response);
            if response.status == ResponseStatus::Unavailable {
                anyhow::bail!("the assistant could not answer");
            }
        }
        Command::Ingest { user, path } => {
            upload(&orchestrator, &settings, &user, &path).await?;
        }
        Command::Delete { user, document_id } => {
            let removed = orchestrator
                .delete(&user, &document_id)
                .await
                .with_context(|| format!("Failed to delete {}", document_id))?;
            println!("Removed {} chunks of {}", removed, document_id);
        }
    }

    Ok(())
}

/// Standalone `ingest` and `delete` only make sense against a persistent index
fn check_backend(backend: Backend, command: &Command) -> Result<()> {
    let name = match command {
        Command::Ingest { .. } => "ingest",
        Command::Delete { .. } => "delete",
        Command::Chat { .. } | Command::Ask { .. } => return Ok(()),
    };
    if backend == Backend::Memory {
        anyhow::bail!(
            "`{}` has no lasting effect with the memory backend; rerun with --backend qdrant, \
             or pass --document to `chat`",
            name
        );
    }
    Ok(())
}

fn print_answer(response: &QueryResponse) {
    println!("{}", response.final_answer);
    if !response.sources.is_empty() {
        let sources: Vec<String> = response
            .sources
            .iter()
            .map(|source| format!("{}#{}", source.document_id, source.index))
            .collect();
        println!("Sources: {}", sources.join(", "));
    }
}

async fn upload<C, W, E, I>(
    orchestrator: &Orchestrator<C, W, E, I>,
    settings: &Settings,
    user: &str,
    path: &Path,
) -> Result<()>
where
    C: ChatProvider,
    W: WeatherProvider,
    E: EmbeddingProvider,
    I: VectorIndex,
{
    let document = Document::from_file(path, settings.max_upload_bytes)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let document_id = document.document_id.clone();
    info!("Document type: {}", document.mime_type);

    let count = orchestrator
        .ingest(document.into_ingest_request(user))
        .await
        .with_context(|| format!("Failed to index {}", document_id))?;
    println!("Indexed {} chunks from {}", count, document_id);
    Ok(())
}

/// Interactive question loop; `exit` quits
async fn run_chat_loop<C, W, E, I>(orchestrator: &Orchestrator<C, W, E, I>, user: &str) -> Result<()>
where
    C: ChatProvider,
    W: WeatherProvider,
    E: EmbeddingProvider,
    I: VectorIndex,
{
    println!("Ask about the weather or your documents. Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();
    let mut conversation: Vec<ConversationTurn> = Vec::new();

    loop {
        print!("\nYou: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        let request =
            QueryRequest::new(user, question).with_conversation(conversation.clone());
        let response = orchestrator.respond(&request).await;
        if response.status == ResponseStatus::Unavailable {
            error!("Query failed, see the log above for the cause");
        }

        println!();
        print_answer(&response);
        conversation.push(ConversationTurn::new(question, response.final_answer));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_writes_require_qdrant() {
        let ingest = Command::Ingest {
            user: "alice".into(),
            path: PathBuf::from("notes.txt"),
        };
        let delete = Command::Delete {
            user: "alice".into(),
            document_id: "notes.txt".into(),
        };

        assert!(check_backend(Backend::Memory, &ingest).is_err());
        assert!(check_backend(Backend::Memory, &delete).is_err());
        assert!(check_backend(Backend::Qdrant, &ingest).is_ok());
        assert!(check_backend(Backend::Qdrant, &delete).is_ok());
    }

    #[test]
    fn test_chat_and_ask_run_on_memory() {
        let chat = Command::Chat {
            user: "alice".into(),
            documents: vec![PathBuf::from("notes.txt")],
        };
        let ask = Command::Ask {
            user: "alice".into(),
            question: "Weather in Oslo?".into(),
        };

        assert!(check_backend(Backend::Memory, &chat).is_ok());
        assert!(check_backend(Backend::Memory, &ask).is_ok());
    }

    #[test]
    fn test_arguments_parse() {
        let args = Args::try_parse_from([
            "rag-router",
            "--backend",
            "qdrant",
            "delete",
            "--user",
            "alice",
            "notes.txt",
        ])
        .unwrap();
        assert_eq!(args.backend, Backend::Qdrant);
        assert!(matches!(args.command, Command::Delete { .. }));
    }
}
