use crate::config::WeatherConfig;
use crate::error::{Error, Result, ServiceKind};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current conditions for one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    pub country: Option<String>,
    pub conditions: String,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity: u8,
    pub wind_speed_kmh: f64,
}

impl WeatherReport {
    pub fn temperature_f(&self) -> f64 {
        round1(self.temperature_c * 9.0 / 5.0 + 32.0)
    }

    /// Structured rendering embedded in the composition prompt
    pub fn to_prompt_data(&self) -> String {
        let place = match &self.country {
            Some(country) => format!("{}, {}", self.location, country),
            None => self.location.clone(),
        };
        format!(
            "location: {}\nconditions: {}\ntemperature: {:.1} °C ({:.1} °F)\nfeels like: {:.1} °C\nhumidity: {}%\nwind: {:.1} km/h",
            place,
            self.conditions,
            self.temperature_c,
            self.temperature_f(),
            self.feels_like_c,
            self.humidity,
            self.wind_speed_kmh
        )
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Trait for weather data sources
#[allow(async_fn_in_trait)]
pub trait WeatherProvider {
    /// Current weather for `location`; unknown places fail with `Error::NotFound`
    async fn current_weather(&self, location: &str) -> Result<WeatherReport>;
}

impl<T: WeatherProvider> WeatherProvider for &T {
    async fn current_weather(&self, location: &str) -> Result<WeatherReport> {
        (**self).current_weather(location).await
    }
}

/// Client for the OpenWeatherMap current-weather API
#[derive(Clone)]
pub struct OpenWeatherClient {
    config: WeatherConfig,
    client: reqwest::Client,
    timeout: Duration,
}

impl OpenWeatherClient {
    pub fn new(config: WeatherConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::new();
        OpenWeatherClient {
            config,
            client,
            timeout,
        }
    }
}

impl WeatherProvider for OpenWeatherClient {
    async fn current_weather(&self, location: &str) -> Result<WeatherReport> {
        #[derive(Deserialize, Debug)]
        struct CurrentWeather {
            name: String,
            sys: Option<Sys>,
            main: Main,
            weather: Vec<Condition>,
            #[serde(default)]
            wind: Option<Wind>,
        }

        #[derive(Deserialize, Debug)]
        struct Sys {
            country: Option<String>,
        }

        #[derive(Deserialize, Debug)]
        struct Main {
            temp: f64,
            feels_like: f64,
            humidity: u8,
        }

        #[derive(Deserialize, Debug)]
        struct Condition {
            description: String,
        }

        #[derive(Deserialize, Debug)]
        struct Wind {
            speed: f64,
        }

        info!("Fetching weather for {}", location);

        let response = self
            .client
            .get(&self.config.url)
            .query(&[
                ("q", location),
                ("appid", self.config.api_key.as_str()),
                ("units", "metric"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::from_transport(ServiceKind::Weather, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return match Error::from_status(ServiceKind::Weather, status, &error_text) {
                Error::NotFound(_) => Err(Error::NotFound(format!(
                    "location '{}' not found",
                    location
                ))),
                other => Err(other),
            };
        }

        let data: CurrentWeather = response
            .json()
            .await
            .map_err(|e| Error::from_transport(ServiceKind::Weather, e))?;
        debug!("Weather payload for {}: {:?}", location, data);

        let conditions = data
            .weather
            .first()
            .map(|c| title_case(&c.description))
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(WeatherReport {
            location: data.name,
            country: data.sys.and_then(|s| s.country),
            conditions,
            temperature_c: round1(data.main.temp),
            feels_like_c: round1(data.main.feels_like),
            humidity: data.main.humidity,
            wind_speed_kmh: round1(data.wind.map(|w| w.speed).unwrap_or(0.0) * 3.6),
        })
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
