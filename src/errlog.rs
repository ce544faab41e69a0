//! Append-only error log for skipped downloads.
//!
//! Each diagnostic is composed in memory and written with a single buffered
//! append, so concurrent workers can log without interleaving. The log is
//! never truncated; it accumulates across runs.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Separator line closing each diagnostic block.
const BLOCK_SEPARATOR: &str = "---------------------------------------------------------";

/// Errors produced when appending to the error log.
#[derive(Debug, Error)]
pub enum ErrorLogError {
    /// I/O error opening or appending to the log file.
    #[error("IO error appending to {path}: {source}")]
    Io {
        /// The log file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// One structured diagnostic describing a file that had to be skipped.
#[derive(Debug)]
pub struct FailureDiagnostic<'a> {
    /// Slug of the entitlement the file belongs to.
    pub game_slug: &'a str,
    /// Slug of the entitlement's publisher.
    pub publisher_slug: &'a str,
    /// Destination directory the file would have been written to.
    pub path: &'a Path,
    /// The on-disk filename of the skipped file.
    pub filename: &'a str,
    /// The request URL that failed.
    pub url: &'a str,
    /// HTTP status code and canonical reason, when the failure was an HTTP
    /// error response rather than a missing-header rejection.
    pub status: Option<(u16, &'a str)>,
    /// One-line explanation of why the file was skipped.
    pub note: &'a str,
}

/// Handle to the append-only error log file.
///
/// Cloning is cheap; each append opens its own handle, writes one block, and
/// closes, so clones may log concurrently.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Creates a handle for the log at `path`. The file is created lazily on
    /// first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one diagnostic block to the log.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorLogError::Io`] if the file cannot be opened or written.
    pub fn append(&self, diagnostic: &FailureDiagnostic<'_>) -> Result<(), ErrorLogError> {
        let mut block = String::new();
        let _ = writeln!(
            block,
            "cannot download game/asset: {}",
            diagnostic.game_slug
        );
        let _ = writeln!(block, "  publisher: {}", diagnostic.publisher_slug);
        let _ = writeln!(block, "  path: {}", diagnostic.path.display());
        let _ = writeln!(block, "  file: {}", diagnostic.filename);
        let _ = writeln!(block, "  request url: {}", diagnostic.url);
        if let Some((code, reason)) = diagnostic.status {
            let _ = writeln!(block, "  response status: {code} {reason}");
        }
        let _ = writeln!(block, "  {}", diagnostic.note);
        let _ = writeln!(block, "  this file was skipped, please download manually");
        let _ = writeln!(block, "{BLOCK_SEPARATOR}");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ErrorLogError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        file.write_all(block.as_bytes())
            .map_err(|e| ErrorLogError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        debug!(path = %self.path.display(), game = diagnostic.game_slug, "error log appended");
        Ok(())
    }
}
