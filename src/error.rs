//! Error types for the battguard daemon.
//!
//! This module defines custom error enums for each component of the daemon,
//! providing descriptive error messages with context information.

use thiserror::Error;

/// Errors related to reading or writing the sysfs threshold files.
#[derive(Error, Debug)]
pub enum ThresholdError {
    #[error("Failed to read threshold file '{path}': {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Threshold file '{path}' contains invalid value '{value}'")]
    InvalidValue { path: String, value: String },

    #[error("Failed to write threshold file '{path}': {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors related to the persisted schedule record.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to read schedule record '{path}': {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Schedule record '{path}' is not valid JSON: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist schedule record '{path}': {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize schedule record: {0}")]
    SerializeFailed(#[from] serde_json::Error),
}

/// Errors related to AC presence detection and the uevent subscription.
#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Failed to read AC presence file '{path}': {source}")]
    PresenceReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("AC presence file '{path}' contains invalid value '{value}', expected 0 or 1")]
    InvalidPresence { path: String, value: String },

    #[error("Failed to open netlink uevent socket: {0}")]
    SocketFailed(std::io::Error),

    #[error("Failed to receive uevent: {0}")]
    RecvFailed(std::io::Error),

    #[error("Uevent subscription closed unexpectedly")]
    SubscriptionClosed,
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),
}

/// Top-level engine errors. Every variant is fatal to the run loop:
/// the engine never retries internally, the supervisor owns restart policy.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Power source error: {0}")]
    Power(#[from] PowerError),

    #[error("Threshold error: {0}")]
    Threshold(#[from] ThresholdError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}
