//! Error taxonomy for the trading engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid strategy name, feature type, granularity or streaming target. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Broker connection failure, timeout or unexpected response shape
    #[error("upstream API error: {0}")]
    UpstreamApi(String),

    /// Order rejected by the broker or failed while being placed
    #[error("order placement failed: {0}")]
    OrderPlacement(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Errors the loop may skip over when running in tolerant mode
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamApi(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamApi(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
