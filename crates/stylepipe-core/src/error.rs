use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout stylepipe-core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable error codes. All codes are SCREAMING_SNAKE_CASE and stable across versions.
pub mod codes {
    /// Specifier could not be mapped to an existing file.
    pub const RESOLUTION_NOT_FOUND: &str = "RESOLUTION_NOT_FOUND";
    /// Stylesheet extension outside the supported dialects.
    pub const UNSUPPORTED_FORMAT: &str = "UNSUPPORTED_FORMAT";
    /// Preprocessor or post-processor rejected the input.
    pub const TRANSFORM_FAILURE: &str = "TRANSFORM_FAILURE";
    /// Filesystem error outside of resolution.
    pub const IO_ERROR: &str = "IO_ERROR";
    /// Config file missing, unreadable or malformed.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    /// No loader is registered for a module's extension.
    pub const LOADER_MISSING: &str = "LOADER_MISSING";
    /// Anything else.
    pub const INTERNAL: &str = "INTERNAL";
}

/// Core error type for stylepipe operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot resolve '{specifier}' from {}", from.display())]
    ResolutionNotFound {
        specifier: String,
        from: PathBuf,
        /// Where the file was expected; creating it fixes the error.
        candidate: Option<PathBuf>,
    },

    #[error("Unsupported stylesheet format '.{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Failed to transform {}: {message}", path.display())]
    TransformFailure { path: PathBuf, message: String },

    #[error("No loader configured for '{}'", path.display())]
    LoaderMissing { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    #[must_use]
    pub fn transform(path: &Path, message: impl std::fmt::Display) -> Self {
        Self::TransformFailure {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Stable code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResolutionNotFound { .. } => codes::RESOLUTION_NOT_FOUND,
            Self::UnsupportedFormat { .. } => codes::UNSUPPORTED_FORMAT,
            Self::TransformFailure { .. } => codes::TRANSFORM_FAILURE,
            Self::LoaderMissing { .. } => codes::LOADER_MISSING,
            Self::Io(_) => codes::IO_ERROR,
            Self::ConfigRead { .. } | Self::ConfigParse { .. } => codes::CONFIG_INVALID,
            Self::Other(_) => codes::INTERNAL,
        }
    }

    /// The file this error is about, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::UnsupportedFormat { path, .. }
            | Self::TransformFailure { path, .. }
            | Self::LoaderMissing { path }
            | Self::ConfigRead { path, .. }
            | Self::ConfigParse { path, .. } => Some(path),
            Self::ResolutionNotFound { candidate, .. } => candidate.as_deref(),
            _ => None,
        }
    }
}
