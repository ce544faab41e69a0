//! Persisted ownership-key cache: product id → download-key id.
//!
//! The cache is append-only for the duration of a pass: once a product id is
//! present its key is never overwritten. On disk it is a JSON object keyed by
//! product id, merged (union) on every save.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use super::LibraryError;

/// In-memory ownership-key cache, loadable from and persistable to a JSON
/// side file.
#[derive(Debug, Default, Clone)]
pub struct KeyCache {
    entries: BTreeMap<String, u64>,
}

impl KeyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the cache from `path`. A missing file is an empty cache, not an
    /// error; re-running without the file present rebuilds it from a full
    /// walk.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Io`] on read failure and
    /// [`LibraryError::CacheFormat`] if the file is not a JSON object of the
    /// expected shape.
    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no key cache on disk, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(LibraryError::io(path, e)),
        };

        let entries: BTreeMap<String, u64> =
            serde_json::from_str(&contents).map_err(|source| LibraryError::CacheFormat {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), entries = entries.len(), "key cache loaded");
        Ok(Self { entries })
    }

    /// Writes the cache to `path`, replacing the file with the union of old
    /// and newly discovered pairs.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Io`] on write failure.
    pub fn save(&self, path: &Path) -> Result<(), LibraryError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .unwrap_or_else(|_| "{}".to_string());
        std::fs::write(path, json).map_err(|e| LibraryError::io(path, e))?;
        debug!(path = %path.display(), entries = self.entries.len(), "key cache saved");
        Ok(())
    }

    /// Returns the download-key id for a product, if known.
    #[must_use]
    pub fn get(&self, product_id: u64) -> Option<u64> {
        self.entries.get(&product_id.to_string()).copied()
    }

    /// Records a newly discovered pair. Returns `true` if the product id was
    /// new; an already-known id is left untouched (append-only) and `false`
    /// is returned.
    pub fn insert_new(&mut self, product_id: u64, key_id: u64) -> bool {
        let key = product_id.to_string();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, key_id);
        true
    }

    /// Number of known pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no pairs are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::load(&dir.path().join("key_pairs.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_new_is_append_only() {
        let mut cache = KeyCache::new();
        assert!(cache.insert_new(42, 100));
        // A second discovery for the same product never overwrites.
        assert!(!cache.insert_new(42, 999));
        assert_eq!(cache.get(42), Some(100));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key_pairs.json");

        let mut cache = KeyCache::new();
        cache.insert_new(42, 100);
        cache.insert_new(7, 200);
        cache.save(&path).unwrap();

        let loaded = KeyCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(42), Some(100));
        assert_eq!(loaded.get(7), Some(200));
        assert_eq!(loaded.get(1), None);
    }

    #[test]
    fn test_load_rejects_malformed_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key_pairs.json");
        std::fs::write(&path, "not json").unwrap();

        let error = KeyCache::load(&path).unwrap_err();
        assert!(matches!(error, LibraryError::CacheFormat { .. }));
    }
}
