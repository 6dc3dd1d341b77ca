//! Error types for akash-nav

use thiserror::Error;

/// Planner error type
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stale input: cloud is {age_ms} ms old")]
    StaleInput { age_ms: u64 },

    #[error("Missing transform for cloud frame '{0}'")]
    MissingTransform(String),

    #[error("No fresh point cloud for {since_last_cloud_ms} ms")]
    Timeout { since_last_cloud_ms: u64 },
}

impl From<toml::de::Error> for PlannerError {
    fn from(e: toml::de::Error) -> Self {
        PlannerError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
