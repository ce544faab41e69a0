//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use itch_mirror::{DEFAULT_CONCURRENCY, Platform};

/// Mirror your itch.io library to local storage.
///
/// With no target flags the whole owned library is synced. A single game or
/// a publisher's full catalog can be targeted instead, and `--claim-bundle`
/// claims every unowned item in a bundle into the library.
#[derive(Parser, Debug)]
#[command(name = "itch-mirror")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// API key to use instead of interactive username/password login
    #[arg(short = 'k', long)]
    pub api_key: Option<String>,

    /// Only download uploads tagged for this platform (untagged uploads are
    /// always downloaded)
    #[arg(short = 'p', long, value_enum)]
    pub platform: Option<PlatformArg>,

    /// Maximum concurrent game syncs (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: u8,

    /// Sync only this publisher's catalog (their slug, e.g. `cool-dev`)
    #[arg(long)]
    pub publisher: Option<String>,

    /// Sync only this game (its slug); requires --publisher
    #[arg(long, requires = "publisher")]
    pub game: Option<String>,

    /// Trust existing files and skip checksum verification entirely
    #[arg(long)]
    pub no_verify: bool,

    /// Name destination folders after publisher/title instead of slugs
    #[arg(long)]
    pub human_folders: bool,

    /// Directory the library is mirrored into
    #[arg(short = 'o', long, default_value = ".")]
    pub output: PathBuf,

    /// Claim every unowned item in this bundle URL, then exit
    #[arg(long, value_name = "URL")]
    pub claim_bundle: Option<String>,
}

/// Platform filter choices.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PlatformArg {
    /// Windows builds.
    Windows,
    /// Linux builds.
    Linux,
    /// macOS builds.
    Osx,
    /// Android builds.
    Android,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Windows => Platform::Windows,
            PlatformArg::Linux => Platform::Linux,
            PlatformArg::Osx => Platform::Osx,
            PlatformArg::Android => Platform::Android,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["itch-mirror"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.concurrency, 4); // DEFAULT_CONCURRENCY
        assert!(args.api_key.is_none());
        assert!(!args.no_verify);
        assert_eq!(args.output, PathBuf::from("."));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["itch-mirror", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_api_key_flag() {
        let args = Args::try_parse_from(["itch-mirror", "-k", "secret"]).unwrap();
        assert_eq!(args.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_cli_platform_flag() {
        let args = Args::try_parse_from(["itch-mirror", "--platform", "linux"]).unwrap();
        assert!(matches!(args.platform, Some(PlatformArg::Linux)));
        assert_eq!(Platform::from(args.platform.unwrap()), Platform::Linux);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["itch-mirror", "-c", "16"]).unwrap();
        assert_eq!(args.concurrency, 16);

        let result = Args::try_parse_from(["itch-mirror", "-c", "0"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );

        let result = Args::try_parse_from(["itch-mirror", "-c", "17"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_game_requires_publisher() {
        let result = Args::try_parse_from(["itch-mirror", "--game", "my-game"]);
        assert!(result.is_err());

        let args = Args::try_parse_from([
            "itch-mirror",
            "--publisher",
            "cool-dev",
            "--game",
            "my-game",
        ])
        .unwrap();
        assert_eq!(args.publisher.as_deref(), Some("cool-dev"));
        assert_eq!(args.game.as_deref(), Some("my-game"));
    }

    #[test]
    fn test_cli_claim_bundle_flag() {
        let args = Args::try_parse_from([
            "itch-mirror",
            "--claim-bundle",
            "https://itch.io/bundle/download/xyz",
        ])
        .unwrap();
        assert_eq!(
            args.claim_bundle.as_deref(),
            Some("https://itch.io/bundle/download/xyz")
        );
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let result = Args::try_parse_from(["itch-mirror", "--invalid-flag"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::UnknownArgument
        );
    }
}
