use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::rag::RagEngine;
use crate::retrieval::RetrievalResult;
use crate::retry::RetryPolicy;
use crate::router::{Route, RoutingDecision, ToolKind};
use crate::weather::{WeatherProvider, WeatherReport};
use log::{info, warn};

/// Raw result of running the selected tool, before composition
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Weather(WeatherReport),
    WeatherNotFound { location: String },
    Documents(RetrievalResult),
    NoTool { free_text: Option<String> },
}

impl ToolOutcome {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolOutcome::Weather(_) | ToolOutcome::WeatherNotFound { .. } => ToolKind::Weather,
            ToolOutcome::Documents(_) => ToolKind::DocumentSearch,
            ToolOutcome::NoTool { .. } => ToolKind::None,
        }
    }
}

/// The two capability handlers; neither calls a chat model
pub struct Tools<W, E, I> {
    weather: W,
    rag: RagEngine<E, I>,
    retry: RetryPolicy,
}

impl<W, E, I> Tools<W, E, I>
where
    W: WeatherProvider,
    E: EmbeddingProvider,
    I: VectorIndex,
{
    pub fn new(weather: W, rag: RagEngine<E, I>, retry: RetryPolicy) -> Self {
        Tools {
            weather,
            rag,
            retry,
        }
    }

    pub fn rag(&self) -> &RagEngine<E, I> {
        &self.rag
    }

    /// Run the tool named by `route` for `user_id`
    pub async fn execute(&self, user_id: &str, route: Route) -> Result<ToolOutcome> {
        match route.decision {
            RoutingDecision::Weather { location } => self.lookup_weather(&location).await,
            RoutingDecision::DocumentSearch { query } => {
                self.search_documents(user_id, &query).await
            }
            RoutingDecision::None => Ok(ToolOutcome::NoTool {
                free_text: route.free_text,
            }),
        }
    }

    /// Unknown locations become [`ToolOutcome::WeatherNotFound`]; outages are errors
    pub async fn lookup_weather(&self, location: &str) -> Result<ToolOutcome> {
        let result = self
            .retry
            .run("weather lookup", || self.weather.current_weather(location))
            .await;

        match result {
            Ok(report) => {
                info!(
                    "Weather for {}: {}, {:.1} °C",
                    report.location, report.conditions, report.temperature_c
                );
                Ok(ToolOutcome::Weather(report))
            }
            Err(Error::NotFound(message)) => {
                warn!("Weather lookup found nothing: {}", message);
                Ok(ToolOutcome::WeatherNotFound {
                    location: location.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Possibly-empty retrieval result for `query`
    pub async fn search_documents(&self, user_id: &str, query: &str) -> Result<ToolOutcome> {
        let result = self.rag.search(user_id, query).await?;
        Ok(ToolOutcome::Documents(result))
    }
}
