//! Weather feed client (OpenWeatherMap).
//!
//! One of the gateway's unreliable external integrations; fetches run
//! through the shared retry wrapper with the transient-HTTP predicate and a
//! short cache so the mesh never hammers the API. Stale cache (up to two
//! hours) is served when the feed is down.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::config::WeatherConfig;
use crate::retry::{is_transient_http, with_retry, RetryPolicy};

/// OpenWeatherMap API response structures
#[derive(Debug, Deserialize)]
pub struct WeatherResponse {
    pub name: String,
    pub sys: WeatherSys,
    pub main: WeatherMain,
    pub weather: Vec<WeatherCondition>,
    pub wind: Option<WeatherWind>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherSys {
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct WeatherMain {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: i32,
    pub pressure: i32,
}

#[derive(Debug, Deserialize)]
pub struct WeatherCondition {
    pub main: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct WeatherWind {
    pub speed: f64,
    pub deg: Option<i32>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    data: String,
    location: String,
}

pub struct WeatherService {
    config: WeatherConfig,
    cache: Option<CacheEntry>,
    client: reqwest::Client,
}

impl WeatherService {
    pub fn new(config: WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1) as u64))
            .build()
            .unwrap_or_default();
        Self {
            config,
            cache: None,
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.api_key.is_empty()
    }

    /// Fetch current weather for the configured default location.
    pub async fn current_conditions(&mut self) -> Result<String> {
        let location = self.config.default_location.clone();
        self.conditions_for(&location).await
    }

    /// Fetch weather for a specific location, serving cache when fresh and
    /// stale cache when the feed is unavailable.
    pub async fn conditions_for(&mut self, location: &str) -> Result<String> {
        if !self.is_configured() {
            return Err(anyhow!("weather feed not configured"));
        }

        if let Some(ref cache) = self.cache {
            if cache.location == location {
                let ttl = Duration::from_secs(self.config.cache_ttl_minutes as u64 * 60);
                if cache.fetched_at.elapsed() < ttl {
                    debug!(
                        "Serving cached weather for {} (age {:.1}min)",
                        location,
                        cache.fetched_at.elapsed().as_secs_f64() / 60.0
                    );
                    return Ok(cache.data.clone());
                }
            }
        }

        let url = self.build_api_url(location)?;
        let client = self.client.clone();
        let fetched = with_retry(
            "weather",
            RetryPolicy::default(),
            is_transient_http,
            || {
                let client = client.clone();
                let url = url.clone();
                async move {
                    let response = client.get(&url).send().await?;
                    let response = response.error_for_status()?;
                    response.json::<WeatherResponse>().await
                }
            },
        )
        .await;

        match fetched {
            Ok(response) => {
                let formatted = format_conditions(&response);
                self.cache = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    data: formatted.clone(),
                    location: location.to_string(),
                });
                Ok(formatted)
            }
            Err(e) => {
                warn!("Weather fetch failed for {}: {}", location, e);
                // Serve stale cache up to 2 hours old rather than nothing
                if let Some(ref cache) = self.cache {
                    if cache.location == location
                        && cache.fetched_at.elapsed() < Duration::from_secs(2 * 60 * 60)
                    {
                        return Ok(format!("{} (cached)", cache.data));
                    }
                }
                Err(anyhow!("weather feed unavailable: {}", e))
            }
        }
    }

    /// Build the API URL based on location type
    pub fn build_api_url(&self, location: &str) -> Result<String> {
        let base_url = "https://api.openweathermap.org/data/2.5/weather";
        let api_key = &self.config.api_key;

        match self.config.location_type.as_str() {
            "city" => {
                let query = if let Some(country) = &self.config.country_code {
                    format!("{},{}", location, country)
                } else {
                    location.to_string()
                };
                Ok(format!(
                    "{}?q={}&appid={}&units=imperial",
                    base_url,
                    urlencoding::encode(&query),
                    api_key
                ))
            }
            "zipcode" => {
                let query = if let Some(country) = &self.config.country_code {
                    format!("{},{}", location, country)
                } else {
                    location.to_string()
                };
                Ok(format!(
                    "{}?zip={}&appid={}&units=imperial",
                    base_url,
                    urlencoding::encode(&query),
                    api_key
                ))
            }
            "city_id" => Ok(format!(
                "{}?id={}&appid={}&units=imperial",
                base_url, location, api_key
            )),
            _ => Err(anyhow!(
                "Invalid location_type: {}",
                self.config.location_type
            )),
        }
    }
}

fn format_conditions(response: &WeatherResponse) -> String {
    let location = format!("{}, {}", response.name, response.sys.country);
    let temp = format!("{:.0}°F", response.main.temp);
    let condition = response
        .weather
        .first()
        .map(|c| c.description.as_str())
        .unwrap_or("unknown");

    // Capitalize first letter of each word in the condition
    let formatted_condition = condition
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    format!("Weather: {}: {} {}", location, formatted_condition, temp)
}
