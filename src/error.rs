//! Error types for DrishtiServo

use thiserror::Error;

/// DrishtiServo error type
#[derive(Error, Debug)]
pub enum VisionError {
    /// Conflicting or missing configuration. Fatal when entering a state.
    #[error("Configuration error: {0}")]
    Config(String),

    /// External observation channel unavailable. Never fatal: the feed
    /// degrades to "all markers not visible".
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Lookup of a marker (or frame) that was never registered.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Wire format error: {0}")]
    Wire(String),

    #[error("Datastore error: {0}")]
    Datastore(String),
}

impl From<serde_json::Error> for VisionError {
    fn from(e: serde_json::Error) -> Self {
        VisionError::Wire(e.to_string())
    }
}

impl From<toml::de::Error> for VisionError {
    fn from(e: toml::de::Error) -> Self {
        VisionError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;
