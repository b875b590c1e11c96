//! Error types for hashmatch.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for hashmatch operations.
pub type DetectResult<T> = std::result::Result<T, DetectError>;

/// Errors that can occur while training or running the detector.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Invalid or missing configuration values. Fatal at startup.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Which constraint was violated.
        reason: String,
    },
    /// A template list, scene file or persisted result could not be accessed.
    #[error("i/o failure on {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Structurally invalid input data for one template, group or scene.
    #[error("invalid data in {context}: {reason}")]
    Data {
        /// Object id, template id or stage the data belongs to.
        context: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A persisted record could not be encoded or decoded.
    #[error("malformed record at {path}: {source}")]
    Persist {
        /// The file holding the record.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// The requested map dimensions are invalid.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: usize,
        /// Requested height.
        height: usize,
    },
    /// The provided buffer does not hold enough elements.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall {
        /// Number of elements required.
        needed: usize,
        /// Number of elements provided.
        got: usize,
    },
    /// Image decoding failed.
    #[cfg(feature = "image-io")]
    #[error("image i/o failed: {reason}")]
    ImageIo {
        /// Decoder error description.
        reason: String,
    },
}

impl DetectError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub(crate) fn data(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Data {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
