//! Unified error handling for the dex optimization workspace
//!
//! Every crate reports failures through [`DexOptError`]. The outer enum names
//! the stage that failed; the inner `source` enum says what went wrong in that
//! stage. Errors are `Clone` so a worker can hand the same value to a callback
//! and still return it to the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Unified error type for all optimization components
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum DexOptError {
    #[error("Input error: {message}")]
    Input { source: InputError, message: String },

    #[error("Compiler error: {message}")]
    Compiler {
        source: CompilerError,
        message: String,
    },

    #[error("Service error: {message}")]
    Service {
        source: ServiceError,
        message: String,
    },

    #[error("Artifact error: {message}")]
    Artifact {
        source: ArtifactError,
        message: String,
    },

    #[error("Loader error: {message}")]
    Loader { message: String },

    #[error("Configuration error: {message}")]
    Configuration {
        source: ConfigError,
        message: String,
    },

    #[error("I/O error: {message}")]
    Io { message: String },

    /// 协作者在优化过程中 panic
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Problems with a compilation unit handed in by the caller
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputError {
    #[error("dex file {0} is not exist!")]
    NotFound(String),

    #[error("dex file {0} is empty")]
    Empty(String),

    #[error("dex file {0} is not readable: {1}")]
    Unreadable(String, String),
}

/// External AOT compiler failures
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilerError {
    #[error("failed to spawn {0}: {1}")]
    SpawnFailed(String, String),

    #[error("compiler works unsuccessfully, exit code: {0}")]
    NonZeroExit(i32),

    #[error("compiler is interrupted, msg: {0}")]
    Interrupted(String),

    #[error("failed to lock {0}: {1}")]
    LockFailed(String, String),
}

/// Compilation service lookup and transaction failures
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
    #[error("service {0} not found: {1}")]
    LookupFailed(String, String),

    #[error("service {0} is dead")]
    DeadObject(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("remote exception {0}: {1}")]
    RemoteException(i32, String),

    #[error("malformed parcel: {0}")]
    MalformedParcel(String),
}

/// Artifacts produced outside our control that never showed up
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactError {
    #[error("{0} was not generated after {1} attempts")]
    Timeout(String, u32),
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0} = {1}")]
    InvalidValue(String, String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Configuration parsing error: {0}")]
    ParseError(String),

    #[error("Configuration file access error: {0}")]
    FileAccessError(String),
}

/// Result type alias for convenience
pub type DexOptResult<T> = Result<T, DexOptError>;

impl From<std::io::Error> for DexOptError {
    fn from(err: std::io::Error) -> Self {
        DexOptError::Io {
            message: err.to_string(),
        }
    }
}

impl DexOptError {
    pub fn input_not_found(path: &Path) -> Self {
        let path = path.display().to_string();
        DexOptError::Input {
            message: format!("dex file {path} is not exist!"),
            source: InputError::NotFound(path),
        }
    }

    pub fn input_empty(path: &Path) -> Self {
        let path = path.display().to_string();
        DexOptError::Input {
            message: format!("dex file {path} is empty"),
            source: InputError::Empty(path),
        }
    }

    pub fn input_unreadable(path: &Path, reason: impl fmt::Display) -> Self {
        let path = path.display().to_string();
        let reason = reason.to_string();
        DexOptError::Input {
            message: format!("dex file {path} cannot be opened"),
            source: InputError::Unreadable(path, reason),
        }
    }

    pub fn compiler(source: CompilerError) -> Self {
        DexOptError::Compiler {
            message: source.to_string(),
            source,
        }
    }

    pub fn service(source: ServiceError) -> Self {
        DexOptError::Service {
            message: source.to_string(),
            source,
        }
    }

    pub fn artifact_timeout(path: &Path, attempts: u32) -> Self {
        DexOptError::Artifact {
            message: format!("triggered, but no {} was generated", path.display()),
            source: ArtifactError::Timeout(path.display().to_string(), attempts),
        }
    }

    pub fn loader(message: impl Into<String>) -> Self {
        DexOptError::Loader {
            message: message.into(),
        }
    }

    /// 由 panic 载荷构造
    pub fn internal(message: impl Into<String>) -> Self {
        DexOptError::Internal {
            message: message.into(),
        }
    }

    pub fn config(source: ConfigError) -> Self {
        DexOptError::Configuration {
            message: source.to_string(),
            source,
        }
    }

    /// Exit code reported by the compiler, if this is a non-zero exit failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            DexOptError::Compiler {
                source: CompilerError::NonZeroExit(code),
                ..
            } => Some(*code),
            _ => None,
        }
    }

    /// Short stage name, used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            DexOptError::Input { .. } => "input",
            DexOptError::Compiler { .. } => "compiler",
            DexOptError::Service { .. } => "service",
            DexOptError::Artifact { .. } => "artifact",
            DexOptError::Loader { .. } => "loader",
            DexOptError::Configuration { .. } => "config",
            DexOptError::Io { .. } => "io",
            DexOptError::Internal { .. } => "internal",
        }
    }
}

/// Utility functions for error handling
pub mod utils {
    use super::*;

    /// Get error severity level
    pub fn error_severity(error: &DexOptError) -> ErrorSeverity {
        match error {
            DexOptError::Service { .. } => ErrorSeverity::Warning,
            DexOptError::Configuration { .. } | DexOptError::Internal { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Log error together with the unit it belongs to
    pub fn log_error(error: &DexOptError, unit: &Path) {
        tracing::error!(
            unit = %unit.display(),
            category = error.category(),
            severity = %error_severity(error),
            "{}",
            error
        );
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Debug => write!(f, "DEBUG"),
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
