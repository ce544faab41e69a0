//! Run configuration passed down from the entry point.
//!
//! All behavior that used to be ambient (platform filter, folder naming,
//! verification) travels in one [`SyncConfig`] value so no component reads
//! process-wide state.

use std::path::PathBuf;

/// Platform a download can be filtered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Windows builds (`p_windows` trait).
    Windows,
    /// Linux builds (`p_linux` trait).
    Linux,
    /// macOS builds (`p_osx` trait).
    Osx,
    /// Android builds (`p_android` trait).
    Android,
}

impl Platform {
    /// The trait tag the uploads API uses for this platform.
    #[must_use]
    pub fn trait_tag(self) -> &'static str {
        match self {
            Self::Windows => "p_windows",
            Self::Linux => "p_linux",
            Self::Osx => "p_osx",
            Self::Android => "p_android",
        }
    }
}

/// How destination folders are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FolderNaming {
    /// Use the publisher and title slugs from the game's URL.
    #[default]
    Slug,
    /// Use the human-readable publisher and title, sanitized.
    Human,
}

/// Configuration for a sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root directory the library is mirrored into.
    pub output_dir: PathBuf,
    /// When set, uploads tagged for other platforms are skipped.
    /// Untagged (universal) uploads are always downloaded.
    pub platform: Option<Platform>,
    /// When false, existing files are trusted without hashing and fresh
    /// downloads are not verified (no sidecars are written).
    pub verify: bool,
    /// Destination folder naming scheme.
    pub naming: FolderNaming,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            platform: None,
            verify: true,
            naming: FolderNaming::Slug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_verifies_into_cwd() {
        let config = SyncConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert!(config.verify);
        assert_eq!(config.platform, None);
        assert_eq!(config.naming, FolderNaming::Slug);
    }

    #[test]
    fn test_platform_trait_tags() {
        assert_eq!(Platform::Windows.trait_tag(), "p_windows");
        assert_eq!(Platform::Linux.trait_tag(), "p_linux");
        assert_eq!(Platform::Osx.trait_tag(), "p_osx");
        assert_eq!(Platform::Android.trait_tag(), "p_android");
    }
}
