//! Library inventory loading and the concurrent sync engine.
//!
//! Inventory loading is strictly sequential: ownership pages must be
//! requested in order so the empty-page stop condition (and the duplicate
//! short-circuit during key loading) can be detected. Downloading is the
//! concurrent part, coordinated by a semaphore-bounded pool of tasks.

mod keys;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::config::SyncConfig;
use crate::errlog::ErrorLog;
use crate::game::{Game, GameError};
use crate::scrape::extract_game_ids;

pub use keys::KeyCache;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 16;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Consecutive already-known product ids after which key loading assumes the
/// remainder of the inventory is unchanged. A heuristic, not
/// correctness-critical: with no cache file present the walk is complete.
const DUPLICATE_KEY_THRESHOLD: u32 = 9;

/// Error type for library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The on-disk key cache is not valid JSON.
    #[error("key cache {path} is not valid JSON: {source}")]
    CacheFormat {
        /// The cache file path.
        path: PathBuf,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// File system error reading or writing library state.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An API request failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// An entitlement record could not be used.
    #[error(transparent)]
    Metadata(#[from] GameError),
}

impl LibraryError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Shared counters for a sync run.
///
/// Contract: each worker increments exactly one of the two counters exactly
/// once per entitlement it processes, after that entitlement reaches a
/// terminal state. Used for progress reporting only.
#[derive(Debug, Default)]
pub struct SyncStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl SyncStats {
    /// Creates a stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entitlements synced with no failed files.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Entitlements that failed or had failed files.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Total entitlements processed so far.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.failed()
    }

    fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Final counts from a [`Library::sync_all`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibrarySummary {
    /// Entitlements synced cleanly.
    pub succeeded: usize,
    /// Entitlements that failed or had failed files.
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct OwnedKeysPage {
    #[serde(default)]
    owned_keys: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GamePageData {
    id: u64,
}

/// A user's library: the in-memory inventory of entitlements to sync.
#[derive(Debug, Default)]
pub struct Library {
    /// Loaded entitlements. Drained by [`Library::sync_all`].
    pub games: Vec<Game>,
}

impl Library {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_owned_page(
        &self,
        api: &ApiClient,
        page: u32,
    ) -> Result<Vec<serde_json::Value>, LibraryError> {
        debug!(page, "loading ownership page");
        let response: OwnedKeysPage = api
            .get_json(&format!("profile/owned-keys?page={page}"))
            .await?;
        Ok(response.owned_keys)
    }

    /// Loads every owned entitlement by walking ownership pages in order.
    ///
    /// Stops at the first page that returns zero records; that is the
    /// terminal condition, not an error. Records that cannot be used are
    /// logged and skipped. Returns the number of entitlements loaded.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Api`] if a page request fails.
    pub async fn load_owned_games(&mut self, api: &ApiClient) -> Result<usize, LibraryError> {
        let mut page = 1u32;
        let mut loaded = 0usize;

        loop {
            let records = self.fetch_owned_page(api, page).await?;
            if records.is_empty() {
                break;
            }
            for record in records {
                match Game::from_record(record) {
                    Ok(game) => {
                        self.games.push(game);
                        loaded += 1;
                    }
                    Err(e) => warn!(page, error = %e, "skipping unusable entitlement record"),
                }
            }
            page += 1;
        }

        info!(games = loaded, pages = page, "library inventory loaded");
        Ok(loaded)
    }

    /// Loads ownership-key pairs, merging them into the on-disk cache at
    /// `cache_path`, and returns the merged cache.
    ///
    /// Walks the same ownership pages as
    /// [`load_owned_games`](Self::load_owned_games), but extracts only
    /// `(product id, key id)` pairs. Once more than [`DUPLICATE_KEY_THRESHOLD`] consecutive
    /// already-known ids are observed the remainder is assumed unchanged and
    /// the walk stops early; a newly discovered id resets the run. Duplicate
    /// keys legitimately occur when bundles share items.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError`] if a page request fails or the cache file
    /// cannot be read or written.
    pub async fn load_owned_keys(
        &mut self,
        api: &ApiClient,
        cache_path: &Path,
    ) -> Result<KeyCache, LibraryError> {
        let mut cache = KeyCache::load(cache_path)?;
        let mut consecutive_known = 0u32;
        let mut page = 1u32;

        'pages: loop {
            let records = self.fetch_owned_page(api, page).await?;
            if records.is_empty() {
                break;
            }
            for record in &records {
                let product_id = record.get("game_id").and_then(serde_json::Value::as_u64);
                let key_id = record.get("id").and_then(serde_json::Value::as_u64);
                let (Some(product_id), Some(key_id)) = (product_id, key_id) else {
                    debug!(page, "ownership record without id pair, ignoring");
                    continue;
                };

                if cache.insert_new(product_id, key_id) {
                    consecutive_known = 0;
                } else {
                    consecutive_known += 1;
                    if consecutive_known > DUPLICATE_KEY_THRESHOLD {
                        info!(page, "assuming the owned keys have not changed");
                        break 'pages;
                    }
                }
            }
            page += 1;
        }

        cache.save(cache_path)?;
        info!(entries = cache.len(), "ownership keys loaded");
        Ok(cache)
    }

    /// Loads a single game by publisher and title slugs.
    ///
    /// The ownership-key cache determines whether the user owns a paid copy;
    /// a product absent from the cache is treated as free or unverified
    /// ownership (no download key).
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError`] if any request fails or the game record is
    /// unusable.
    pub async fn load_game(
        &mut self,
        api: &ApiClient,
        publisher: &str,
        title: &str,
        cache_path: &Path,
    ) -> Result<(), LibraryError> {
        let cache = self.load_owned_keys(api, cache_path).await?;

        let data_url = api.game_data_url(publisher, title)?;
        let data: GamePageData = api.get_json_url(&data_url).await?;

        let record: serde_json::Value = api.get_json(&format!("games/{}", data.id)).await?;
        let mut game = Game::from_record(record)?;
        game.download_key_id = cache.get(data.id);

        info!(
            game = %game.title,
            owned = game.download_key_id.is_some(),
            "single game loaded"
        );
        self.games.push(game);
        Ok(())
    }

    /// Loads every game on a publisher's storefront page, without ownership
    /// keys. Returns the number of entitlements loaded.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError`] if the page or a game record request fails.
    pub async fn load_publisher_catalog(
        &mut self,
        api: &ApiClient,
        publisher: &str,
    ) -> Result<usize, LibraryError> {
        let url = api.publisher_page_url(publisher)?;
        let html = api.get_text(&url).await?;
        let ids = extract_game_ids(&html);
        info!(publisher, games = ids.len(), "publisher storefront scraped");

        let mut loaded = 0usize;
        for id in ids {
            let record: serde_json::Value = api.get_json(&format!("games/{id}")).await?;
            match Game::from_record(record) {
                Ok(game) => {
                    self.games.push(game);
                    loaded += 1;
                }
                Err(e) => warn!(product_id = id, error = %e, "skipping unusable game record"),
            }
        }
        Ok(loaded)
    }

    /// Syncs every loaded entitlement with a bounded pool of concurrent
    /// tasks, draining the inventory.
    ///
    /// Each entitlement runs in its own task; a semaphore permit is acquired
    /// before the task starts and released by RAII when it finishes. A
    /// failure in one task never aborts its siblings: every failure is
    /// converted into a counted, logged outcome and the pool drains to
    /// completion. `stats` is incremented exactly once per entitlement and
    /// may be polled concurrently for progress display.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvalidConcurrency`] if `concurrency` is
    /// outside `1..=16`. Individual sync failures do NOT cause this method
    /// to error; they are counted in the summary.
    pub async fn sync_all(
        &mut self,
        api: &ApiClient,
        config: &SyncConfig,
        log: &ErrorLog,
        concurrency: usize,
        stats: Arc<SyncStats>,
    ) -> Result<LibrarySummary, LibraryError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(LibraryError::InvalidConcurrency { value: concurrency });
        }

        let total = self.games.len();
        info!(games = total, concurrency, "starting library sync");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(total);

        for mut game in self.games.drain(..) {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                // The semaphore is never closed; treat this as a drained pool.
                break;
            };

            let api = api.clone();
            let config = config.clone();
            let log = log.clone();
            let stats = Arc::clone(&stats);

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;

                let title = game.title.clone();
                let clean = match game.sync(&api, &config, &log).await {
                    Ok(report) if report.is_clean() => {
                        debug!(
                            game = %title,
                            downloaded = report.downloaded,
                            skipped = report.skipped,
                            "game synced"
                        );
                        true
                    }
                    Ok(report) => {
                        warn!(
                            game = %title,
                            failed_files = report.failed,
                            "game synced with failed files"
                        );
                        false
                    }
                    Err(e) => {
                        warn!(game = %title, error = %e, "game sync failed");
                        false
                    }
                };

                if clean {
                    stats.record_success();
                } else {
                    stats.record_failure();
                }
                let done = stats.total();
                info!(game = %title, "{done} of {total} processed");
            }));
        }

        // Wait for the pool to drain completely
        for handle in handles {
            // Task panics are logged but don't fail the batch
            if let Err(e) = handle.await {
                warn!(error = %e, "sync task panicked");
            }
        }

        let summary = LibrarySummary {
            succeeded: stats.succeeded(),
            failed: stats.failed(),
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            total = summary.succeeded + summary.failed,
            "library sync complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_stats_default_is_zero() {
        let stats = SyncStats::new();
        assert_eq!(stats.succeeded(), 0);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_sync_stats_increment() {
        let stats = SyncStats::new();
        stats.record_success();
        stats.record_success();
        stats.record_failure();
        assert_eq!(stats.succeeded(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_sync_stats_thread_safe() {
        use std::thread;

        let stats = Arc::new(SyncStats::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.record_success();
                    stats.record_failure();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.succeeded(), 800);
        assert_eq!(stats.failed(), 800);
        assert_eq!(stats.total(), 1600);
    }

    #[tokio::test]
    async fn test_sync_all_rejects_invalid_concurrency() {
        let mut library = Library::new();
        let api = ApiClient::new("tok");
        let config = SyncConfig::default();
        let log = ErrorLog::new("errors.txt");

        for value in [0usize, 17] {
            let result = library
                .sync_all(&api, &config, &log, value, Arc::new(SyncStats::new()))
                .await;
            assert!(matches!(
                result,
                Err(LibraryError::InvalidConcurrency { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_sync_all_empty_library_returns_zero_summary() {
        let mut library = Library::new();
        let api = ApiClient::new("tok");
        let config = SyncConfig::default();
        let log = ErrorLog::new("errors.txt");

        let summary = library
            .sync_all(&api, &config, &log, DEFAULT_CONCURRENCY, Arc::new(SyncStats::new()))
            .await
            .unwrap();
        assert_eq!(
            summary,
            LibrarySummary {
                succeeded: 0,
                failed: 0
            }
        );
    }
}
