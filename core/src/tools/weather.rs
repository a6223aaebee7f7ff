use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::{ToolError, ToolResult};
use super::traits::{ToolExecutionRequest, ToolExecutor, ToolMessage};
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::ToolCall;

pub const WEATHER_TOOL_NAME: &str = "get_weather";

/// Configuration for the weather executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// API endpoint (default: Open-Meteo)
    pub api_endpoint: String,
    /// Geocoding API endpoint
    pub geocoding_endpoint: String,
    /// Language for geocoding results
    pub language: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.open-meteo.com/v1/forecast".to_string(),
            geocoding_endpoint: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            language: "ja".to_string(),
        }
    }
}

/// Geocoding response from Open-Meteo
#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    results: Option<Vec<GeoLocation>>,
}

#[derive(Debug, Deserialize)]
struct GeoLocation {
    name: String,
    latitude: f64,
    longitude: f64,
}

/// Weather response from Open-Meteo
#[derive(Debug, Deserialize)]
struct WeatherResponse {
    current: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: i32,
    wind_speed_10m: f64,
    weather_code: i32,
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    location: String,
}

/// Executes `get_weather(location)` calls against Open-Meteo
#[derive(Debug, Clone, Default)]
pub struct WeatherToolExecutor {
    config: WeatherConfig,
}

impl WeatherToolExecutor {
    pub fn new() -> Self {
        Self::with_config(WeatherConfig::default())
    }

    pub fn with_config(config: WeatherConfig) -> Self {
        Self { config }
    }

    async fn get_coordinates(
        &self,
        transport: &dyn HttpTransport,
        location: &str,
    ) -> ToolResult<(f64, f64, String)> {
        let url = reqwest::Url::parse_with_params(
            &self.config.geocoding_endpoint,
            &[
                ("name", location),
                ("count", "1"),
                ("language", self.config.language.as_str()),
            ],
        )
        .map_err(|e| ToolError::Upstream(format!("Bad geocoding endpoint: {e}")))?;

        let data: GeocodingResponse = get_json(transport, url.as_str(), "Geocoding").await?;

        data.results
            .and_then(|r| r.into_iter().next())
            .map(|first| (first.latitude, first.longitude, first.name))
            .ok_or_else(|| ToolError::NotFound(format!("Location not found: {location}")))
    }

    async fn get_weather(
        &self,
        transport: &dyn HttpTransport,
        lat: f64,
        lon: f64,
    ) -> ToolResult<CurrentWeather> {
        let url = format!(
            "{}?latitude={}&longitude={}&current=temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code",
            self.config.api_endpoint, lat, lon
        );
        let data: WeatherResponse = get_json(transport, &url, "Weather").await?;
        Ok(data.current)
    }

    async fn run_one(&self, transport: &dyn HttpTransport, call: &ToolCall) -> ToolResult<Value> {
        if call.name() != WEATHER_TOOL_NAME {
            return Err(ToolError::UnknownTool(call.name().to_string()));
        }
        let args: WeatherArgs = serde_json::from_str(&call.function.arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("Missing 'location': {e}")))?;
        let location = args.location.trim();
        if location.is_empty() {
            return Err(ToolError::InvalidArguments("Empty 'location'".to_string()));
        }

        debug!(target: "weather_tool", location = %location, "Fetching weather");

        let (lat, lon, name) = self.get_coordinates(transport, location).await?;
        let weather = self.get_weather(transport, lat, lon).await?;

        Ok(json!({
            "ok": true,
            "result": {
                "location": name,
                "temperature_c": weather.temperature_2m,
                "conditions": interpret_weather_code(weather.weather_code),
                "humidity": weather.relative_humidity_2m,
                "wind_speed": weather.wind_speed_10m,
            }
        }))
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    transport: &dyn HttpTransport,
    url: &str,
    what: &str,
) -> ToolResult<T> {
    let resp = transport
        .send(HttpRequest::get(url))
        .await
        .map_err(|e| ToolError::Upstream(format!("{what} request failed: {e}")))?;
    if !resp.ok() {
        return Err(ToolError::Upstream(format!(
            "{what} API error: {}",
            resp.status
        )));
    }
    let value = resp
        .json()
        .await
        .map_err(|e| ToolError::Upstream(format!("Failed to parse {what} response: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| ToolError::Upstream(format!("Unexpected {what} response: {e}")))
}

fn interpret_weather_code(code: i32) -> &'static str {
    match code {
        0 => "快晴",
        1..=3 => "晴れ時々くもり",
        45 | 48 => "霧",
        51 | 53 | 55 | 56 | 57 => "霧雨",
        61 | 63 | 65 | 66 | 67 => "雨",
        71 | 73 | 75 | 77 => "雪",
        80..=82 => "にわか雨",
        85 | 86 => "にわか雪",
        95 | 96 | 99 => "雷雨",
        _ => "不明",
    }
}

#[async_trait]
impl ToolExecutor for WeatherToolExecutor {
    async fn execute(&self, request: ToolExecutionRequest) -> ToolResult<Vec<ToolMessage>> {
        let mut messages = Vec::with_capacity(request.tool_calls.len());
        for call in &request.tool_calls {
            let outcome =
                match tokio::time::timeout(request.timeout, self.run_one(request.transport.as_ref(), call))
                    .await
                {
                    Ok(res) => res,
                    Err(_) => Err(ToolError::Timeout),
                };
            let content = match outcome {
                Ok(v) => v,
                Err(e) => {
                    warn!(target: "weather_tool", tool = %call.name(), error = %e, "Tool call failed");
                    e.to_result_json()
                }
            };
            messages.push(ToolMessage::new(call.id.clone(), content.to_string()));
        }
        Ok(messages)
    }
}
