//! Integration tests for the per-file download-verify-archive protocol.
//!
//! These tests run `Game::sync` against a wiremock server standing in for
//! the storefront API and a tempdir standing in for the mirror root.

use itch_mirror::{ApiClient, ErrorLog, FileOutcome, Game, GameError, Platform, SyncConfig};
use md5::{Digest, Md5};
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAYLOAD: &[u8] = b"game build bytes";

fn payload_md5() -> String {
    format!("{:x}", Md5::digest(PAYLOAD))
}

fn api_for(server: &MockServer) -> ApiClient {
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    ApiClient::with_base_urls("test-token", base.clone(), base)
}

fn config_in(dir: &TempDir) -> SyncConfig {
    SyncConfig {
        output_dir: dir.path().to_path_buf(),
        ..SyncConfig::default()
    }
}

fn log_in(dir: &TempDir) -> ErrorLog {
    ErrorLog::new(dir.path().join("errors.txt"))
}

/// An owned-key entitlement record: download key 555, product 42.
fn owned_record() -> serde_json::Value {
    json!({
        "id": 555,
        "game_id": 42,
        "game": {
            "id": 42,
            "title": "My Game",
            "url": "https://cool-dev.itch.io/my-game",
            "user": {"username": "Cool Dev"}
        }
    })
}

fn owned_game() -> Game {
    Game::from_record(owned_record()).unwrap()
}

/// Mounts the uploads listing for the owned-key record.
async fn mount_uploads(server: &MockServer, uploads: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/games/42/uploads"))
        .and(query_param("download_key_id", "555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uploads": uploads})))
        .mount(server)
        .await;
}

/// Mounts a download-session ticket with the given expected call count.
async fn mount_session(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/games/42/download-sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "uuid-1"})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Mounts the signed download endpoint serving `body` as a file.
async fn mount_download(server: &MockServer, body: &[u8], expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/uploads/77/download"))
        .and(query_param("api_key", "test-token"))
        .and(query_param("download_key_id", "555"))
        .and(query_param("uuid", "uuid-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .insert_header("content-disposition", r#"attachment; filename="build.zip""#),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

// ==================== Download + Verify Tests ====================

#[tokio::test]
async fn test_sync_downloads_verifies_and_writes_sidecar(
) -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(
        &server,
        json!([{"id": 77, "filename": "build.zip", "size": PAYLOAD.len(), "md5_hash": payload_md5()}]),
    )
    .await;
    mount_session(&server, 1).await;
    mount_download(&server, PAYLOAD, 1).await;

    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config_in(&dir), &log_in(&dir)).await?;

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 0);

    let dest = dir.path().join("cool-dev/my-game/build.zip");
    assert_eq!(std::fs::read(&dest)?, PAYLOAD);
    // Checksum round-trip: the sidecar holds the declared checksum, which
    // matches a fresh hash of the written bytes.
    let sidecar = std::fs::read_to_string(dir.path().join("cool-dev/my-game/build.zip.md5"))?;
    assert_eq!(sidecar.trim(), payload_md5());
    Ok(())
}

#[tokio::test]
async fn test_sync_writes_metadata_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    // Zero-upload game: the uploads field is legitimately absent.
    Mock::given(method("GET"))
        .and(path("/games/42/uploads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config_in(&dir), &log_in(&dir)).await?;

    assert_eq!(report.downloaded + report.skipped + report.failed, 0);
    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("cool-dev/my-game.json"))?)?;
    assert_eq!(snapshot["title"], "My Game");
    assert_eq!(snapshot["publisher"], "Cool Dev");
    assert_eq!(snapshot["product_id"], 42);
    assert_eq!(snapshot["download_key_id"], 555);
    Ok(())
}

// ==================== Idempotence Tests ====================

#[tokio::test]
async fn test_second_sync_performs_zero_downloads() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(
        &server,
        json!([{"id": 77, "filename": "build.zip", "md5_hash": payload_md5()}]),
    )
    .await;
    // The session and download endpoints must be hit exactly once across
    // BOTH runs: the second run resolves to Skipped(upToDate) before any
    // download request.
    mount_session(&server, 1).await;
    mount_download(&server, PAYLOAD, 1).await;

    let api = api_for(&server);
    let config = config_in(&dir);
    let log = log_in(&dir);

    let first = owned_game().sync(&api, &config, &log).await?;
    assert_eq!(first.downloaded, 1);

    let second = owned_game().sync(&api, &config, &log).await?;
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.failed, 0);
    Ok(())
}

// ==================== Archive-on-Mismatch Tests ====================

#[tokio::test]
async fn test_stale_file_is_archived_then_redownloaded() -> Result<(), Box<dyn std::error::Error>>
{
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(
        &server,
        json!([{"id": 77, "filename": "build.zip", "md5_hash": payload_md5()}]),
    )
    .await;
    mount_session(&server, 1).await;
    mount_download(&server, PAYLOAD, 1).await;

    // An existing copy whose bytes do not hash to the declared checksum.
    let game_dir = dir.path().join("cool-dev/my-game");
    std::fs::create_dir_all(&game_dir)?;
    std::fs::write(game_dir.join("build.zip"), b"stale bytes")?;

    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config_in(&dir), &log_in(&dir)).await?;
    assert_eq!(report.downloaded, 1);

    // Original bytes live under old/<date>-<filename>.
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let archived = game_dir.join("old").join(format!("{date}-build.zip"));
    assert_eq!(std::fs::read(&archived)?, b"stale bytes");

    // A fresh correct copy exists at the original path with a sidecar.
    assert_eq!(std::fs::read(game_dir.join("build.zip"))?, PAYLOAD);
    let sidecar = std::fs::read_to_string(game_dir.join("build.zip.md5"))?;
    assert_eq!(sidecar.trim(), payload_md5());
    Ok(())
}

// ==================== Missing-Checksum Policy Tests ====================

#[tokio::test]
async fn test_missing_checksum_never_fails_verification() -> Result<(), Box<dyn std::error::Error>>
{
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(&server, json!([{"id": 77, "filename": "build.zip"}])).await;
    mount_session(&server, 1).await;
    mount_download(&server, PAYLOAD, 1).await;

    let api = api_for(&server);
    let config = config_in(&dir);
    let log = log_in(&dir);

    let first = owned_game().sync(&api, &config, &log).await?;
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.failed, 0);

    // Unverifiable downloads get no sidecar.
    let game_dir = dir.path().join("cool-dev/my-game");
    assert!(game_dir.join("build.zip").exists());
    assert!(!game_dir.join("build.zip.md5").exists());

    // A second run keeps the file and still performs no download.
    let second = owned_game().sync(&api, &config, &log).await?;
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.failed, 0);
    Ok(())
}

#[tokio::test]
async fn test_checksum_mismatch_keeps_file_without_sidecar(
) -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(
        &server,
        json!([{"id": 77, "filename": "build.zip", "md5_hash": payload_md5()}]),
    )
    .await;
    mount_session(&server, 1).await;
    // Server serves bytes that do not match the declared checksum.
    mount_download(&server, b"corrupted bytes", 1).await;

    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config_in(&dir), &log_in(&dir)).await?;

    assert_eq!(report.downloaded, 0);
    assert_eq!(report.failed, 1);

    // The mismatched file is left in place for inspection, with no sidecar.
    let game_dir = dir.path().join("cool-dev/my-game");
    assert_eq!(std::fs::read(game_dir.join("build.zip"))?, b"corrupted bytes");
    assert!(!game_dir.join("build.zip.md5").exists());
    Ok(())
}

// ==================== Platform Filter Tests ====================

#[tokio::test]
async fn test_platform_filter_skips_without_network() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(
        &server,
        json!([{"id": 77, "filename": "build.zip", "traits": ["p_windows"]}]),
    )
    .await;
    // No session (and hence no download) may be requested for a filtered
    // upload.
    mount_session(&server, 0).await;

    let mut config = config_in(&dir);
    config.platform = Some(Platform::Linux);

    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config, &log_in(&dir)).await?;

    assert_eq!(report.skipped, 1);
    assert_eq!(report.downloaded, 0);
    assert_eq!(report.failed, 0);
    Ok(())
}

#[tokio::test]
async fn test_no_filter_attempts_tagged_uploads() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    mount_uploads(
        &server,
        json!([{"id": 77, "filename": "build.zip", "traits": ["p_windows"], "md5_hash": payload_md5()}]),
    )
    .await;
    mount_session(&server, 1).await;
    mount_download(&server, PAYLOAD, 1).await;

    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config_in(&dir), &log_in(&dir)).await?;

    assert_eq!(report.downloaded, 1);
    Ok(())
}

// ==================== Recovered Failure Tests ====================

#[tokio::test]
async fn test_transport_error_is_logged_and_recovered() -> Result<(), Box<dyn std::error::Error>>
{
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    // Two uploads: the first download fails with a server error, the second
    // succeeds. The failure must not stop the second file.
    mount_uploads(
        &server,
        json!([
            {"id": 76, "filename": "broken.zip"},
            {"id": 77, "filename": "build.zip", "md5_hash": payload_md5()}
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/games/42/download-sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "uuid-1"})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/uploads/76/download"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_download(&server, PAYLOAD, 1).await;

    let log = log_in(&dir);
    let mut game = owned_game();
    let report = game.sync(&api_for(&server), &config_in(&dir), &log).await?;

    assert_eq!(report.failed, 1);
    assert_eq!(report.downloaded, 1);

    // The diagnostic block carries the slugs, filename, URL, and status.
    let errors = std::fs::read_to_string(log.path())?;
    assert!(errors.contains("my-game"));
    assert!(errors.contains("cool-dev"));
    assert!(errors.contains("broken.zip"));
    assert!(errors.contains("response status: 500"));
    Ok(())
}

#[tokio::test]
async fn test_undecodable_uploads_response_is_metadata_error(
) -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("GET"))
        .and(path("/games/42/uploads"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let mut game = owned_game();
    let result = game.sync(&api_for(&server), &config_in(&dir), &log_in(&dir)).await;

    assert!(matches!(result, Err(GameError::RemoteMetadata { .. })));
    Ok(())
}

// ==================== Outcome Shape Tests ====================

#[test]
fn test_file_outcomes_are_distinct_terminal_states() {
    // Guards against accidentally merging skip variants: up-to-date skips
    // and unverifiable skips are reported differently.
    assert_ne!(FileOutcome::SkippedUpToDate, FileOutcome::SkippedUnverifiable);
    assert_ne!(FileOutcome::Downloaded, FileOutcome::Unverifiable);
}
