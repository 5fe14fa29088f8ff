//! Error types for the smoke harness

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmokeError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server did not announce readiness within {0:?}")]
    ServerStartTimeout(Duration),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Node.js not found. Install Node and run: npm install playwright")]
    DriverNotFound,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Browser driver did not answer {method} within {limit:?}")]
    DriverTimeout { method: String, limit: Duration },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Teardown failed: {0}")]
    Teardown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SmokeResult<T> = Result<T, SmokeError>;
