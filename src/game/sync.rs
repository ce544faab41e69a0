//! The per-file download-verify-archive protocol.
//!
//! Every upload runs the same sequence: existence/sidecar check, archive of
//! stale copies, one-time download session, streaming transfer, checksum
//! verification, sidecar write. The protocol is idempotent: re-running it
//! over an unchanged library performs no downloads.

use std::path::{Path, PathBuf};

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::SyncConfig;
use crate::integrity::{hash_file, read_sidecar, sanitize_name, stream_to_file, write_sidecar};

use super::{DownloadSession, Game, GameError, GamePaths, Upload};

/// Subdirectory stale copies are archived into.
const ARCHIVE_DIR: &str = "old";

/// Terminal state of one upload after the protocol ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Freshly downloaded and verified against the declared checksum.
    Downloaded,
    /// Freshly downloaded but not verifiable (no declared checksum, or
    /// verification disabled). No sidecar is written.
    Unverifiable,
    /// An up-to-date copy already existed; no network call was made.
    SkippedUpToDate,
    /// A copy existed but there is no declared checksum to verify against;
    /// the file was kept as-is.
    SkippedUnverifiable,
    /// The downloaded bytes did not match the declared checksum. The file is
    /// left in place for inspection and no sidecar is written.
    Mismatched,
}

#[derive(Debug, PartialEq, Eq)]
enum Existing {
    UpToDate,
    Unverifiable,
    Stale,
}

fn checksum_matches(actual: &str, declared: &str) -> bool {
    actual.eq_ignore_ascii_case(declared)
}

/// Runs the download-verify-archive protocol for one upload.
///
/// `NoDownload` and `Transport` errors are returned for the caller to
/// recover (log and continue); everything else aborts the entitlement.
pub(crate) async fn sync_upload(
    game: &Game,
    paths: &GamePaths,
    upload: &Upload,
    api: &ApiClient,
    config: &SyncConfig,
) -> Result<FileOutcome, GameError> {
    let file_name = upload.disk_name();
    let dest = paths.dir.join(&file_name);
    let declared = upload.md5_hash.as_deref();

    if tokio::fs::try_exists(&dest)
        .await
        .map_err(|e| GameError::io(dest.clone(), e))?
    {
        debug!(file = %dest.display(), "destination already exists");
        match check_existing(&dest, declared, config.verify).await? {
            Existing::UpToDate => {
                info!(game = %game.title, file = %file_name, "already up to date");
                return Ok(FileOutcome::SkippedUpToDate);
            }
            Existing::Unverifiable => {
                info!(
                    game = %game.title,
                    file = %file_name,
                    "existing file has no declared checksum, keeping as-is"
                );
                return Ok(FileOutcome::SkippedUnverifiable);
            }
            Existing::Stale => {
                let archived = archive_existing(&paths.dir, &file_name).await?;
                info!(
                    game = %game.title,
                    file = %file_name,
                    archived = %archived.display(),
                    "archived stale copy before re-download"
                );
            }
        }
    }

    // One-time session ticket required by the signed download URL.
    let session: DownloadSession = api
        .post_json(&format!("games/{}/download-sessions", game.product_id))
        .await?;
    let url = api.download_url(upload.id, game.download_key_id, &session.uuid)?;

    let response = api.get_download(&url).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(GameError::transport(url.as_str(), status));
    }

    let has_length = response.headers().contains_key(CONTENT_LENGTH);
    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    if !has_length && disposition.is_none() {
        // The server answered with something that is not a file, e.g. an
        // HTML error page.
        return Err(GameError::no_download(url.as_str()));
    }

    // The server's Content-Disposition filename wins over the upload record.
    let final_name = disposition
        .as_deref()
        .and_then(parse_content_disposition)
        .map(|n| sanitize_name(&n))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| file_name.clone());
    let final_path = paths.dir.join(&final_name);

    info!(game = %game.title, file = %final_name, "downloading");
    let bytes = stream_to_file(response, &final_path).await?;
    debug!(file = %final_name, bytes, "transfer complete");

    match (declared, config.verify) {
        (Some(want), true) => {
            let actual = hash_file(&final_path).await?;
            if !checksum_matches(&actual, want) {
                warn!(
                    game = %game.title,
                    file = %final_path.display(),
                    expected = want,
                    actual = %actual,
                    "checksum mismatch, file left in place for inspection"
                );
                return Ok(FileOutcome::Mismatched);
            }
            write_sidecar(&final_path, want).await?;
            Ok(FileOutcome::Downloaded)
        }
        (None, true) => {
            info!(
                game = %game.title,
                file = %final_name,
                "no declared checksum, downloaded file could not be verified"
            );
            Ok(FileOutcome::Unverifiable)
        }
        (_, false) => Ok(FileOutcome::Unverifiable),
    }
}

/// Classifies an existing destination file against the declared checksum.
///
/// With verification disabled the file is trusted as-is. Otherwise the
/// sidecar is consulted first; only when no sidecar exists is the file
/// hashed, and a passing hash writes the sidecar so the next run skips the
/// hash too.
async fn check_existing(
    dest: &Path,
    declared: Option<&str>,
    verify: bool,
) -> Result<Existing, GameError> {
    if !verify {
        return Ok(Existing::UpToDate);
    }

    if let Some(stored) = read_sidecar(dest).await? {
        return Ok(match declared {
            Some(want) if checksum_matches(&stored, want) => Existing::UpToDate,
            None => Existing::Unverifiable,
            Some(_) => Existing::Stale,
        });
    }

    let Some(want) = declared else {
        return Ok(Existing::Unverifiable);
    };
    let actual = hash_file(dest).await?;
    if checksum_matches(&actual, want) {
        write_sidecar(dest, want).await?;
        Ok(Existing::UpToDate)
    } else {
        Ok(Existing::Stale)
    }
}

/// Moves `dir/file_name` into `dir/old/` with a `YYYY-MM-DD-` prefix,
/// appending a numeric suffix rather than clobbering a prior same-day
/// archive. Returns the archived path.
async fn archive_existing(dir: &Path, file_name: &str) -> Result<PathBuf, GameError> {
    let old_dir = dir.join(ARCHIVE_DIR);
    tokio::fs::create_dir_all(&old_dir)
        .await
        .map_err(|e| GameError::io(old_dir.clone(), e))?;

    let date = chrono::Local::now().format("%Y-%m-%d");
    let base = format!("{date}-{file_name}");
    let mut target = old_dir.join(&base);
    let mut suffix = 2u32;
    while tokio::fs::try_exists(&target)
        .await
        .map_err(|e| GameError::io(target.clone(), e))?
    {
        target = old_dir.join(format!("{base}-{suffix}"));
        suffix += 1;
    }

    let source = dir.join(file_name);
    tokio::fs::rename(&source, &target)
        .await
        .map_err(|e| GameError::io(source, e))?;
    Ok(target)
}

/// Parses a Content-Disposition header to extract the filename.
///
/// Handles `filename="example.zip"`, bare `filename=example.zip`, and the
/// RFC 5987 `filename*=UTF-8''example.zip` form.
fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();
        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}
