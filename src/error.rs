//! Error types for the dispatcher
//!
//! Display strings are user-facing: they are copied verbatim into the
//! `error` field of the response sent back to the originating channel.

use thiserror::Error;

/// Errors raised while accepting or executing a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Request queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("Dispatcher is not running")]
    Closed,

    #[error("Request has no payload")]
    EmptyPayload,

    #[error("Unrecognized request type: {0}")]
    UnknownRequestType(i32),

    #[error("Unrecognized metric: {0}")]
    UnknownMetric(String),

    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("Unrecognized chain: {0}")]
    UnknownChain(String),

    #[error("Missing property: {0}")]
    MissingProperty(&'static str),

    /// Failure reported by the motor subsystem, surfaced verbatim
    #[error("{0}")]
    Motor(String),
}

/// Errors raised while loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
