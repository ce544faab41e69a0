//! Error types for entitlement metadata and the per-file sync protocol.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiError;
use crate::integrity::IntegrityError;

/// Errors that can occur while resolving or syncing one entitlement.
#[derive(Debug, Error)]
pub enum GameError {
    /// The API returned a record missing required identifying fields or one
    /// that could not be decoded at all.
    #[error("remote metadata error for {context}: {reason}")]
    RemoteMetadata {
        /// What was being parsed when the error occurred.
        context: String,
        /// Why the record was rejected.
        reason: String,
    },

    /// The download endpoint returned something that is not a file (no
    /// content-length and no content-disposition, e.g. an HTML error page).
    ///
    /// Recovered: the file is logged and skipped, the sync continues.
    #[error("response is not a downloadable file: {url}")]
    NoDownload {
        /// The request URL.
        url: String,
    },

    /// The download request returned an HTTP error status.
    ///
    /// Recovered: the file is logged and skipped, the sync continues.
    #[error("HTTP {status} downloading {url}")]
    Transport {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Canonical reason phrase for the status, when known.
        reason: String,
    },

    /// File system error while preparing or archiving files.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An API request below the download layer failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Hashing or stream transfer failed.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl GameError {
    /// Creates a remote-metadata error with parse context.
    pub fn remote_metadata(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteMetadata {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-a-file error for a download URL.
    pub fn no_download(url: impl Into<String>) -> Self {
        Self::NoDownload { url: url.into() }
    }

    /// Creates a transport error from a response status.
    pub fn transport(url: impl Into<String>, status: reqwest::StatusCode) -> Self {
        Self::Transport {
            url: url.into(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_download_display() {
        let error = GameError::no_download("https://api.itch.io/uploads/1/download");
        assert!(error.to_string().contains("not a downloadable file"));
    }

    #[test]
    fn test_transport_display_includes_status() {
        let error = GameError::transport(
            "https://api.itch.io/uploads/1/download",
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        );
        let msg = error.to_string();
        assert!(msg.contains("500"), "expected status in: {msg}");
    }

    #[test]
    fn test_remote_metadata_display() {
        let error = GameError::remote_metadata("entitlement record", "missing title");
        let msg = error.to_string();
        assert!(msg.contains("entitlement record"));
        assert!(msg.contains("missing title"));
    }
}
