//! Content hashing, filename sanitization, and the stream-to-disk transfer
//! primitive used by every download.
//!
//! Hashing and transfer both operate on bounded-size chunks so memory use is
//! O(1) in file size.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use md5::{Digest, Md5};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::debug;

/// Chunk size for streaming hash and transfer operations (64 KiB).
const CHUNK_SIZE: usize = 64 * 1024;

/// Extension appended to an asset path to form its checksum sidecar.
const SIDECAR_EXTENSION: &str = "md5";

/// Errors produced by hashing, transfer, and sidecar operations.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// File system error while reading or writing.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The response byte stream failed mid-transfer.
    #[error("stream interrupted while writing {path}: {source}")]
    Stream {
        /// Destination path of the interrupted transfer.
        path: PathBuf,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },
}

impl IntegrityError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a stream-interruption error with path context.
    pub fn stream(path: impl Into<PathBuf>, source: reqwest::Error) -> Self {
        Self::Stream {
            path: path.into(),
            source,
        }
    }
}

/// Computes the MD5 digest of a file, streaming it in fixed-size chunks.
///
/// Returns the digest as lowercase hex, matching the format the storefront
/// publishes for uploads.
///
/// # Errors
///
/// Returns [`IntegrityError::Io`] if the file cannot be opened or read.
pub async fn hash_file(path: &Path) -> Result<String, IntegrityError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| IntegrityError::io(path, e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| IntegrityError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Replaces characters illegal in filesystem paths with `-`.
///
/// Also rewrites a trailing run of two or more identical punctuation
/// characters (a name ending in `...`, for example) into the placeholder,
/// since such names are rejected or mishandled by common filesystems.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '|' | '?' | '*' | '"' | '/' | '\\' => '-',
            c => c,
        })
        .collect();

    loop {
        let Some(last) = out.chars().next_back() else {
            break;
        };
        if !last.is_ascii_punctuation() {
            break;
        }
        let run = out.chars().rev().take_while(|c| *c == last).count();
        if run < 2 {
            break;
        }
        out.truncate(out.len() - run * last.len_utf8());
        out.push('-');
    }

    out
}

/// Streams a response body to `path` in bounded chunks.
///
/// The destination handle is scoped to this function and flushed before it
/// closes; on any failure the partial file is removed so an interrupted
/// transfer never leaves incomplete data behind.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns [`IntegrityError::Io`] on file system failure and
/// [`IntegrityError::Stream`] if the body stream fails mid-transfer.
pub async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
) -> Result<u64, IntegrityError> {
    let file = File::create(path)
        .await
        .map_err(|e| IntegrityError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    let result: Result<(), IntegrityError> = async {
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| IntegrityError::stream(path, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| IntegrityError::io(path, e))?;
            bytes_written += chunk.len() as u64;
        }
        // Ensure all data is flushed to disk before the handle closes
        writer.flush().await.map_err(|e| IntegrityError::io(path, e))
    }
    .await;

    if let Err(e) = result {
        debug!(path = %path.display(), "cleaning up partial file after failed transfer");
        drop(writer);
        let _ = tokio::fs::remove_file(path).await;
        return Err(e);
    }

    Ok(bytes_written)
}

/// Derives the checksum sidecar path for an asset: `file.zip` → `file.zip.md5`.
#[must_use]
pub fn sidecar_path(asset: &Path) -> PathBuf {
    let mut name = OsString::from(asset.as_os_str());
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

/// Reads the checksum stored in the sidecar beside `asset`, if one exists.
///
/// # Errors
///
/// Returns [`IntegrityError::Io`] on read failure other than the sidecar
/// being absent.
pub async fn read_sidecar(asset: &Path) -> Result<Option<String>, IntegrityError> {
    let path = sidecar_path(asset);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IntegrityError::io(path, e)),
    }
}

/// Writes `checksum` to the sidecar beside `asset`, overwriting any prior one.
///
/// # Errors
///
/// Returns [`IntegrityError::Io`] on write failure.
pub async fn write_sidecar(asset: &Path, checksum: &str) -> Result<(), IntegrityError> {
    let path = sidecar_path(asset);
    tokio::fs::write(&path, checksum)
        .await
        .map_err(|e| IntegrityError::io(path, e))
}
