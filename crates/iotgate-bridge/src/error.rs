//! Error types for the iotgate bridge

use thiserror::Error;

/// Errors that can occur during bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// MQTT client error
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// MQTT connection error
    #[error("MQTT connection error: {0}")]
    Connection(String),

    /// Spool I/O error
    #[error("Spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error while forwarding an event
    #[error("Event forwarding error: {0}")]
    Http(#[from] reqwest::Error),

    /// Business event payload that cannot be forwarded
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// The events sink rejected a forwarded event
    #[error("Events sink rejected event with status {status}")]
    EventRejected { status: u16 },
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
