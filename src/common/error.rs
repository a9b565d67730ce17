//! Error types for the application.

use thiserror::Error;

use crate::common::messages::Platform;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Malformed channel mapping: {message}")]
    MalformedMapping { message: String },
}

/// Pier (platform connection) errors.
#[derive(Debug, Error)]
pub enum PierError {
    #[error("{platform} pier failed to connect: {message}")]
    ConnectFailed { platform: Platform, message: String },

    #[error("{platform} pier is not connected")]
    NotConnected { platform: Platform },

    #[error("{platform} pier failed to send to '{channel}': {message}")]
    SendFailed {
        platform: Platform,
        channel: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serenity error: {0}")]
    Serenity(#[from] serenity::Error),
}

/// Raised by a mutator that could not process a message.
///
/// The pipeline treats this exactly like a drop.
#[derive(Debug, Error)]
#[error("{mutator}: {message}")]
pub struct MutatorError {
    pub mutator: &'static str,
    pub message: String,
}

impl MutatorError {
    pub fn new(mutator: &'static str, message: impl Into<String>) -> Self {
        Self {
            mutator,
            message: message.into(),
        }
    }
}

/// Command dispatch errors. Always reported back to the chat, never fatal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {name}")]
    Unknown { name: String },

    #[error("No command given")]
    Missing,

    #[error("Command '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

/// Statistics persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to access statistics file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed statistics file '{path}': {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Bridge lifecycle errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge '{name}' failed to start: {source}")]
    StartFailed {
        name: String,
        #[source]
        source: PierError,
    },

    #[error("Bridge '{name}' cannot start from state {state}")]
    InvalidState { name: String, state: String },

    #[error("Bridge '{name}' is missing its {platform} pier")]
    MissingPier { name: String, platform: Platform },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
