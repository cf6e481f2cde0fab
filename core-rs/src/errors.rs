//! Error types for the grapher

use thiserror::Error;

use crate::graph::SinkError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum GrapherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported shape: {0}")]
    UnsupportedShape(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Graph sink write failed: {0}")]
    SinkWrite(#[from] SinkError),

    #[error("SCC usage resolution failed: {0}")]
    SccUsage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GrapherError>;
