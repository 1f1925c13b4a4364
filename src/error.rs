//! Error types for sdrpick.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PickerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to fetch server list: {0}")]
    Fetch(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Preset error: {0}")]
    Preset(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Command not found: {0}")]
    BinaryNotFound(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),
}
