//! Entitlement ("game") metadata and asset resolution.
//!
//! A [`Game`] is constructed fresh from one API record on every run; the only
//! identity that survives across runs is the ownership-key cache and the
//! files on disk. [`Game::sync`] resolves the game's uploads and runs the
//! per-file download-verify-archive protocol over each of them.

mod error;
mod sync;

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::{FolderNaming, Platform, SyncConfig};
use crate::errlog::{ErrorLog, FailureDiagnostic};
use crate::integrity::sanitize_name;
use crate::scrape::compile_static_regex;

pub use error::GameError;
pub use sync::FileOutcome;

/// Extracts publisher and title slugs from a canonical game link
/// (`https://<publisher>.<storefront>/<title>`).
static GAME_LINK_SLUGS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^https?://([^./]+)\.[^/]+/([^/?#]+)"));

/// One downloadable file belonging to an entitlement.
#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    /// Remote upload id.
    pub id: u64,
    /// Server-side filename, when present.
    #[serde(default)]
    pub filename: Option<String>,
    /// Human-facing display name, when present.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Byte size as reported by the API.
    #[serde(default)]
    pub size: Option<u64>,
    /// Platform trait tags (`p_windows`, ...). Empty means universal.
    #[serde(default)]
    pub traits: Vec<String>,
    /// Declared MD5 checksum. Absent means the file cannot be verified,
    /// which is not a failure.
    #[serde(default)]
    pub md5_hash: Option<String>,
}

impl Upload {
    /// Byte size, defaulting to 0 when the API omitted it.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    /// The sanitized on-disk filename: filename, falling back to display
    /// name, falling back to the upload id.
    #[must_use]
    pub fn disk_name(&self) -> String {
        let raw = self
            .filename
            .as_deref()
            .or(self.display_name.as_deref())
            .map_or_else(|| self.id.to_string(), ToString::to_string);
        sanitize_name(&raw)
    }

    /// Whether this upload should be downloaded under the given platform
    /// filter. Untagged uploads are universal; with no filter set, every
    /// upload matches.
    #[must_use]
    pub fn matches_platform(&self, platform: Option<Platform>) -> bool {
        match platform {
            None => true,
            Some(p) => {
                self.traits.is_empty() || self.traits.iter().any(|t| t == p.trait_tag())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordWrapper {
    id: Option<u64>,
    game_id: Option<u64>,
    game: Option<GameRecord>,
}

#[derive(Debug, Deserialize)]
struct GameRecord {
    id: Option<u64>,
    title: Option<String>,
    url: Option<String>,
    user: Option<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadsResponse {
    #[serde(default)]
    uploads: Vec<Upload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadSession {
    pub(crate) uuid: String,
}

#[derive(Debug, Serialize)]
struct MetadataSnapshot<'a> {
    title: &'a str,
    publisher: &'a str,
    link: &'a str,
    download_key_id: Option<u64>,
    product_id: u64,
    source: &'a serde_json::Value,
}

/// Destination paths for one entitlement, derived once from its metadata.
#[derive(Debug, Clone)]
pub struct GamePaths {
    /// Directory the entitlement's files are mirrored into.
    pub dir: PathBuf,
    /// Sibling JSON file recording the entitlement's metadata snapshot.
    pub snapshot: PathBuf,
}

/// Counts from syncing one entitlement's uploads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GameSyncReport {
    /// Files freshly downloaded (verified or unverifiable).
    pub downloaded: usize,
    /// Files skipped: already up to date, unverifiable on disk, or filtered
    /// out by platform.
    pub skipped: usize,
    /// Files that failed: transport/no-download errors or checksum mismatch.
    pub failed: usize,
}

impl GameSyncReport {
    /// True when no file in the entitlement failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// One owned or ownable entitlement.
#[derive(Debug, Clone)]
pub struct Game {
    /// Display title.
    pub title: String,
    /// Publisher display name.
    pub publisher: String,
    /// Canonical web link to the game page.
    pub link: String,
    /// Download-key id proving a purchase; absent for free or unverified
    /// entitlements.
    pub download_key_id: Option<u64>,
    /// Product id used by the API.
    pub product_id: u64,
    /// Publisher slug parsed from the link.
    pub publisher_slug: String,
    /// Title slug parsed from the link.
    pub title_slug: String,
    /// Uploads, populated lazily by [`Game::resolve_uploads`].
    pub uploads: Vec<Upload>,
    /// The raw API record this game was built from.
    raw: serde_json::Value,
}

impl Game {
    /// Builds a game from one API record.
    ///
    /// Accepts both record shapes the API produces: an owned-key record
    /// (`{"id": <key>, "game_id": <product>, "game": {...}}`) and a bare
    /// wrapper (`{"game": {...}}`) where the product id comes from the game
    /// object and no download key exists.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::RemoteMetadata`] when the record cannot be
    /// decoded or is missing title, url, or id.
    pub fn from_record(record: serde_json::Value) -> Result<Self, GameError> {
        let wrapper: RecordWrapper = serde_json::from_value(record.clone())
            .map_err(|e| GameError::remote_metadata("entitlement record", e.to_string()))?;

        let game = wrapper
            .game
            .ok_or_else(|| GameError::remote_metadata("entitlement record", "missing game object"))?;
        let title = game
            .title
            .ok_or_else(|| GameError::remote_metadata("entitlement record", "missing title"))?;
        let link = game
            .url
            .ok_or_else(|| GameError::remote_metadata("entitlement record", "missing url"))?;

        let (download_key_id, product_id) = match (wrapper.id, wrapper.game_id) {
            (Some(key), Some(product)) => (Some(key), product),
            _ => {
                let product = game.id.ok_or_else(|| {
                    GameError::remote_metadata("entitlement record", "missing game id")
                })?;
                (None, product)
            }
        };

        let captures = GAME_LINK_SLUGS_RE.captures(&link).ok_or_else(|| {
            GameError::remote_metadata("entitlement record", format!("unrecognized link: {link}"))
        })?;
        let publisher_slug = captures[1].to_string();
        let title_slug = captures[2].to_string();

        let publisher = game
            .user
            .and_then(|u| u.username)
            .unwrap_or_else(|| publisher_slug.clone());

        Ok(Self {
            title,
            publisher,
            link,
            download_key_id,
            product_id,
            publisher_slug,
            title_slug,
            uploads: Vec::new(),
            raw: record,
        })
    }

    /// Derives the destination paths for this entitlement under the
    /// configured output root and naming scheme.
    ///
    /// This is a pure function of the game's metadata: the same metadata
    /// always yields the same paths.
    #[must_use]
    pub fn paths(&self, config: &SyncConfig) -> GamePaths {
        let (publisher, title) = match config.naming {
            FolderNaming::Slug => (
                sanitize_name(&self.publisher_slug),
                sanitize_name(&self.title_slug),
            ),
            FolderNaming::Human => (sanitize_name(&self.publisher), sanitize_name(&self.title)),
        };
        let publisher_dir = config.output_dir.join(publisher);
        let dir = publisher_dir.join(&title);
        let snapshot = publisher_dir.join(format!("{title}.json"));
        GamePaths { dir, snapshot }
    }

    /// Fetches the list of uploads for this game, replacing any previously
    /// resolved list.
    ///
    /// The ownership-aware endpoint variant is used when the game carries a
    /// download key. A response that omits the uploads field entirely is a
    /// legitimate zero-upload game, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::RemoteMetadata`] when the response is not
    /// decodable JSON, or [`GameError::Api`] on transport/status failure.
    pub async fn resolve_uploads(&mut self, api: &ApiClient) -> Result<&[Upload], GameError> {
        let path = match self.download_key_id {
            Some(key) => format!(
                "games/{}/uploads?download_key_id={key}",
                self.product_id
            ),
            None => format!("games/{}/uploads", self.product_id),
        };

        let response: UploadsResponse = api.get_json(&path).await.map_err(|e| match e {
            crate::api::ApiError::Decode { url, source } => {
                GameError::remote_metadata(format!("uploads listing at {url}"), source.to_string())
            }
            other => GameError::Api(other),
        })?;

        debug!(game = %self.title, uploads = response.uploads.len(), "uploads resolved");
        self.uploads = response.uploads;
        Ok(&self.uploads)
    }

    /// Syncs every upload of this entitlement into its destination directory,
    /// then overwrites the metadata snapshot.
    ///
    /// Per-file transport and no-download failures are recovered: they are
    /// appended to the error log, counted, and the remaining uploads still
    /// run. Only metadata, IO, and network-level errors abort the
    /// entitlement.
    ///
    /// # Errors
    ///
    /// Returns [`GameError`] for entitlement-level failures; see above for
    /// what is recovered instead.
    pub async fn sync(
        &mut self,
        api: &ApiClient,
        config: &SyncConfig,
        log: &ErrorLog,
    ) -> Result<GameSyncReport, GameError> {
        info!(game = %self.title, publisher = %self.publisher_slug, "syncing game");
        self.resolve_uploads(api).await?;

        let paths = self.paths(config);
        tokio::fs::create_dir_all(&paths.dir)
            .await
            .map_err(|e| GameError::io(paths.dir.clone(), e))?;

        let mut report = GameSyncReport::default();
        let uploads = self.uploads.clone();
        for upload in &uploads {
            if !upload.matches_platform(config.platform) {
                debug!(
                    game = %self.title,
                    file = %upload.disk_name(),
                    traits = ?upload.traits,
                    "skipping upload for other platform"
                );
                report.skipped += 1;
                continue;
            }

            match sync::sync_upload(self, &paths, upload, api, config).await {
                Ok(outcome) => {
                    debug!(game = %self.title, file = %upload.disk_name(), ?outcome, "upload finished");
                    match outcome {
                        FileOutcome::Downloaded | FileOutcome::Unverifiable => {
                            report.downloaded += 1;
                        }
                        FileOutcome::SkippedUpToDate | FileOutcome::SkippedUnverifiable => {
                            report.skipped += 1;
                        }
                        FileOutcome::Mismatched => report.failed += 1,
                    }
                }
                Err(GameError::NoDownload { url }) => {
                    warn!(game = %self.title, file = %upload.disk_name(), "response is not a download, skipping");
                    self.log_failure(log, &paths, upload, &url, None, "response was missing download headers");
                    report.failed += 1;
                }
                Err(GameError::Transport { url, status, reason }) => {
                    warn!(
                        game = %self.title,
                        file = %upload.disk_name(),
                        status,
                        "download failed with HTTP error, skipping"
                    );
                    self.log_failure(
                        log,
                        &paths,
                        upload,
                        &url,
                        Some((status, reason.as_str())),
                        "the download request failed with an HTTP error",
                    );
                    report.failed += 1;
                }
                Err(other) => return Err(other),
            }
        }

        self.write_snapshot(&paths)?;
        Ok(report)
    }

    fn log_failure(
        &self,
        log: &ErrorLog,
        paths: &GamePaths,
        upload: &Upload,
        url: &str,
        status: Option<(u16, &str)>,
        note: &str,
    ) {
        let filename = upload.disk_name();
        let diagnostic = FailureDiagnostic {
            game_slug: &self.title_slug,
            publisher_slug: &self.publisher_slug,
            path: &paths.dir,
            filename: &filename,
            url,
            status,
            note,
        };
        if let Err(e) = log.append(&diagnostic) {
            warn!(error = %e, "failed to append to error log");
        }
    }

    /// Writes the metadata snapshot, overwriting unconditionally. The
    /// snapshot is the durable record that this entitlement's assets were
    /// processed as of this run.
    fn write_snapshot(&self, paths: &GamePaths) -> Result<(), GameError> {
        let snapshot = MetadataSnapshot {
            title: &self.title,
            publisher: &self.publisher,
            link: &self.link,
            download_key_id: self.download_key_id,
            product_id: self.product_id,
            source: &self.raw,
        };

        let file = std::fs::File::create(&paths.snapshot)
            .map_err(|e| GameError::io(paths.snapshot.clone(), e))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &snapshot).map_err(|e| {
            GameError::io(
                paths.snapshot.clone(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        debug!(path = %paths.snapshot.display(), "metadata snapshot written");
        Ok(())
    }
}
