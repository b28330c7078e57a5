//! Error types for the bridge pipeline
use thiserror::Error;

/// Bridge pipeline errors
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Schema or invariant failure in the local configuration
    #[error("configuration error: {0}")]
    Config(#[from] hueflow_core::ConfigError),

    /// Configured channel-id set differs from the hub's entertainment configuration
    #[error("channel set mismatch: missing {missing:?}, extra {extra:?}")]
    ConfigMismatch {
        /// Channels the hub reports that the mapping lacks
        missing: Vec<u8>,
        /// Channels the mapping has that the hub does not report
        extra: Vec<u8>,
    },

    /// Non-2xx response from the hub's REST control plane
    #[error("{method} {path} failed: HTTP {status}: {body}")]
    Http {
        /// HTTP method of the failed request
        method: &'static str,
        /// Request path
        path: String,
        /// Response status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// HTTPS certificate validation failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// DTLS client handshake failed or timed out
    #[error("DTLS handshake failed: {0}")]
    DtlsHandshake(String),

    /// Open DTLS session lost to a peer close or I/O error
    #[error("transport lost: {0}")]
    TransportLoss(String),

    /// Startup interrupted by shutdown
    #[error("shutdown in progress")]
    Shutdown,

    /// Network-level HTTPS failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Standard IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
