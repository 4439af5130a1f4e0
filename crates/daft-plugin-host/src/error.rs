//! Error types for the plugin host.
//!
//! Caller-facing failures (`UnknownInstance`, `PresetNotFound`,
//! `PermissionDenied`) surface directly from the triggering operation.
//! Crash-path and persistence failures are logged and never reach callers.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by an [`ExecutionBackend`](crate::backend::ExecutionBackend)
/// implementation.
///
/// The manager treats this as opaque; it never assumes the backend rolled back
/// any state when a call fails.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct BackendError {
    /// Backend operation that failed (e.g. `instantiate`).
    pub operation: String,
    /// Human-readable failure description.
    pub message: String,
}

impl BackendError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Main error type for the plugin host.
#[derive(Debug, Error)]
pub enum PluginHostError {
    // Caller errors
    #[error("Unknown plugin instance: {instance_id}")]
    UnknownInstance { instance_id: String },

    #[error("Preset {preset_id} not found for plugin {identifier}")]
    PresetNotFound {
        identifier: String,
        preset_id: String,
    },

    #[error("Storage permission denied for {identifier}: {reason}")]
    PermissionDenied { identifier: String, reason: String },

    #[error("Invalid preset {preset_id}: {message}")]
    InvalidPreset { preset_id: String, message: String },

    // Backend errors
    #[error("No plugin execution backend available on {platform}")]
    BackendUnavailable { platform: String },

    #[error("Backend call failed: {0}")]
    BackendCallFailed(#[from] BackendError),

    // Persistence errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for plugin host operations.
pub type Result<T> = std::result::Result<T, PluginHostError>;

impl From<std::io::Error> for PluginHostError {
    fn from(err: std::io::Error) -> Self {
        PluginHostError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PluginHostError {
    fn from(err: serde_json::Error) -> Self {
        PluginHostError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PluginHostError {
    pub fn unknown_instance(instance_id: impl Into<String>) -> Self {
        PluginHostError::UnknownInstance {
            instance_id: instance_id.into(),
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PluginHostError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Stable snake_case code for structured logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            PluginHostError::UnknownInstance { .. } => "unknown_instance",
            PluginHostError::PresetNotFound { .. } => "preset_not_found",
            PluginHostError::PermissionDenied { .. } => "permission_denied",
            PluginHostError::InvalidPreset { .. } => "invalid_preset",
            PluginHostError::BackendUnavailable { .. } => "backend_unavailable",
            PluginHostError::BackendCallFailed(_) => "backend_call_failed",
            PluginHostError::Storage { .. } => "storage",
            PluginHostError::Io { .. } => "io",
            PluginHostError::Json { .. } => "json",
            PluginHostError::Config { .. } => "config",
        }
    }

    /// True for errors caused by the caller's request rather than the
    /// backend or the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PluginHostError::UnknownInstance { .. }
                | PluginHostError::PresetNotFound { .. }
                | PluginHostError::PermissionDenied { .. }
                | PluginHostError::InvalidPreset { .. }
        )
    }
}
