//! Error types and result alias for the analysis engine.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type alias for results that may contain an EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error types that can occur while decoding, caching, or transforming audio.
///
/// Invariant violations (negative event durations, event counts past `i32`,
/// a decode cache initialised without a source rate) are programmer errors
/// and panic instead of appearing here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A file could not be opened, read, or created.
    #[error("File operation failed on {path}: {details}")]
    FileOperationFailed { path: PathBuf, details: String },

    /// A cache write stored fewer bytes than requested.
    #[error("Insufficient disc space writing cache data under {0}")]
    InsufficientDiscSpace(PathBuf),

    /// An FFT plan or working buffer could not be allocated.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// The codec reported an unrecoverable error.
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// No factory could produce a plugin for the given key.
    #[error("No plugin available for key \"{0}\"")]
    PluginUnavailable(String),

    /// The plugin rejected initialisation, or its outputs could not be
    /// matched to the requested transforms.
    #[error("Failed to initialise plugin \"{key}\": {details}")]
    PluginInitFailed { key: String, details: String },

    /// The plugin loaded, but is not the version the transform declared.
    #[error("Plugin \"{key}\" is version {actual}, but the transform was configured for version {expected}")]
    PluginVersionMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Rejected configuration, e.g. dissimilar transforms grouped together.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl EngineError {
    /// Create a file-operation error.
    pub fn file_operation(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::FileOperationFailed {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(details: impl Into<String>) -> Self {
        Self::DecodeFailed(details.into())
    }

    /// Create a plugin initialisation error.
    pub fn plugin_init(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::PluginInitFailed {
            key: key.into(),
            details: details.into(),
        }
    }

    /// True for errors a decode loop may log and continue past.
    ///
    /// Codec errors are recoverable: decoding resumes at the next frame.
    /// A version mismatch is a warning attached to otherwise usable output.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DecodeFailed(_) | Self::PluginVersionMismatch { .. }
        )
    }

    /// True for errors that must terminate the operation that raised them.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}
