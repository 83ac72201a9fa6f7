//! PhiGuard error types

use thiserror::Error;

/// PhiGuard error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plugin lifecycle error (discovery, load, enable, unload)
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// A plugin hook exceeded its deadline
    #[error("Plugin '{plugin}' hook '{hook}' timed out after {timeout_ms}ms")]
    PluginTimeout {
        plugin: String,
        hook: String,
        timeout_ms: u64,
    },

    /// A plugin hook returned an error
    #[error("Plugin '{plugin}' hook '{hook}' failed: {message}")]
    PluginExecution {
        plugin: String,
        hook: String,
        message: String,
    },

    /// Call rejected because the circuit breaker is open
    #[error("Circuit open, retry in {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// Supervised child error
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for PhiGuard operations
pub type Result<T> = std::result::Result<T, Error>;
