//! Idempotent bundle claim loop.
//!
//! Walks a paginated bundle listing and claims every item not yet in the
//! library. Claiming invalidates the page's CSRF token and changes the
//! listing, so after each claim the same page is re-fetched until no
//! claimable row remains. Already-claimed rows expose no form and are
//! skipped silently, making the loop safe to re-run.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::auth::WebSession;
use crate::scrape::{compile_static_regex, hidden_input, last_pager_page};

static GAME_ROW_START_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)<div[^>]*class="[^"]*game_row"#));

static ROW_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<h2[^>]*>\s*<a[^>]*>([^<]+)"));

/// Errors produced while claiming a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Network-level failure fetching or posting a bundle page.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The server returned an error status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The bundle page did not have the expected structure.
    #[error("unexpected bundle page at {url}: {reason}")]
    PageFormat {
        /// The page URL.
        url: String,
        /// What was missing.
        reason: String,
    },
}

/// Counts from a [`Bundle::claim_all`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimSummary {
    /// Items newly claimed during this run.
    pub claimed: usize,
    /// Page count reported by the bundle listing.
    pub pages: u32,
}

#[derive(Debug)]
struct ClaimableRow {
    name: String,
    game_id: String,
    csrf_token: String,
}

/// One bundle listing page, addressed by its URL.
#[derive(Debug, Clone)]
pub struct Bundle {
    url: Url,
}

impl Bundle {
    /// Creates a claimer for the bundle at `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Claims every unowned item in the bundle.
    ///
    /// At-least-once and order-independent: re-running after a partial run
    /// claims only what remains.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError`] if a page cannot be fetched, a claim is
    /// rejected, or the listing has no pager to read the page count from.
    pub async fn claim_all(&self, session: &WebSession) -> Result<ClaimSummary, BundleError> {
        let listing = self.fetch_page(session, None).await?;
        let pages = last_pager_page(&listing).ok_or_else(|| BundleError::PageFormat {
            url: self.url.to_string(),
            reason: "no pager_label with a page count".to_string(),
        })?;
        info!(url = %self.url, pages, "claiming bundle");

        let mut claimed = 0usize;
        for page in 1..pages {
            loop {
                let html = self.fetch_page(session, Some(page)).await?;
                let Some(row) = first_claimable_row(&html) else {
                    break;
                };
                info!(page, game = %row.name, "claiming bundle item");
                self.submit_claim(session, page, &row).await?;
                claimed += 1;
                // The claim invalidated the CSRF token and changed the
                // listing; loop around and re-fetch this page.
            }
            debug!(page, pages, "bundle page drained");
        }

        info!(claimed, "bundle claim complete");
        Ok(ClaimSummary { claimed, pages })
    }

    fn page_url(&self, page: Option<u32>) -> Url {
        let mut url = self.url.clone();
        if let Some(page) = page {
            url.query_pairs_mut().append_pair("page", &page.to_string());
        }
        url
    }

    async fn fetch_page(
        &self,
        session: &WebSession,
        page: Option<u32>,
    ) -> Result<String, BundleError> {
        let url = self.page_url(page);
        let response = session
            .client()
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BundleError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BundleError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| BundleError::Network {
            url: url.to_string(),
            source,
        })
    }

    async fn submit_claim(
        &self,
        session: &WebSession,
        page: u32,
        row: &ClaimableRow,
    ) -> Result<(), BundleError> {
        let url = self.page_url(Some(page));
        let response = session
            .client()
            .post(url.clone())
            .form(&[
                ("action", "claim"),
                ("game_id", row.game_id.as_str()),
                ("csrf_token", row.csrf_token.as_str()),
            ])
            .send()
            .await
            .map_err(|source| BundleError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BundleError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Finds the first game row on the page that still exposes a claim form.
/// Rows without a form are already in the library.
fn first_claimable_row(html: &str) -> Option<ClaimableRow> {
    let starts: Vec<usize> = GAME_ROW_START_RE.find_iter(html).map(|m| m.start()).collect();

    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(html.len());
        let row = &html[*start..end];
        if !row.contains("<form") {
            continue;
        }
        let (Some(game_id), Some(csrf_token)) = (
            hidden_input(row, "game_id"),
            hidden_input(row, "csrf_token"),
        ) else {
            continue;
        };
        let name = ROW_TITLE_RE
            .captures(row)
            .and_then(|c| c.get(1))
            .map_or_else(|| "unknown".to_string(), |m| m.as_str().trim().to_string());
        return Some(ClaimableRow {
            name,
            game_id,
            csrf_token,
        });
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CLAIMABLE_ROW: &str = r#"
        <div class="game_row">
            <h2><a href="/one">First Game</a></h2>
            <form method="post">
                <input type="hidden" name="game_id" value="101">
                <input type="hidden" name="csrf_token" value="tok-abc">
            </form>
        </div>
    "#;

    const OWNED_ROW: &str = r#"
        <div class="game_row">
            <h2><a href="/two">Second Game</a></h2>
            <span>In your library</span>
        </div>
    "#;

    #[test]
    fn test_first_claimable_row_extracts_form_fields() {
        let html = format!("{OWNED_ROW}{CLAIMABLE_ROW}");
        let row = first_claimable_row(&html).unwrap();
        assert_eq!(row.name, "First Game");
        assert_eq!(row.game_id, "101");
        assert_eq!(row.csrf_token, "tok-abc");
    }

    #[test]
    fn test_first_claimable_row_none_when_all_owned() {
        let html = format!("{OWNED_ROW}{OWNED_ROW}");
        assert!(first_claimable_row(&html).is_none());
    }

    #[test]
    fn test_page_url_appends_page_parameter() {
        let bundle = Bundle::new(Url::parse("https://itch.io/bundle/download/seekrit").unwrap());
        assert_eq!(
            bundle.page_url(Some(3)).as_str(),
            "https://itch.io/bundle/download/seekrit?page=3"
        );
        assert_eq!(
            bundle.page_url(None).as_str(),
            "https://itch.io/bundle/download/seekrit"
        );
    }
}
