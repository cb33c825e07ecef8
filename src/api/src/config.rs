//! Configuration for the RaceDB API.

use serde::{Deserialize, Serialize};

use crate::prediction::{ConfidencePolicy, PredictionOptions, Weights};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/racedb.sqlite".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Prediction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default)]
    pub confidence: ConfidencePolicy,
    #[serde(default = "default_top_recommendations")]
    pub top_recommendations: usize,
    /// Weights used when a request supplies none
    #[serde(default)]
    pub weights: Weights,
}

fn default_top_recommendations() -> usize {
    3
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            confidence: ConfidencePolicy::default(),
            top_recommendations: default_top_recommendations(),
            weights: Weights::default(),
        }
    }
}

impl PredictionConfig {
    pub fn options(&self) -> PredictionOptions {
        PredictionOptions {
            confidence: self.confidence,
            top_recommendations: self.top_recommendations,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("racedb").required(false))
            // RACEDB_SERVER__PORT, RACEDB_PREDICTION__TOP_RECOMMENDATIONS, ...
            .add_source(
                config::Environment::with_prefix("RACEDB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
