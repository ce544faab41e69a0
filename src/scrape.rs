//! HTML field extraction shared by the publisher catalog, bundle claimer,
//! and web login: tag-level regexes with order-independent attribute lookup.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static INPUT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<input\s[^>]*>"));

static ANCHOR_TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?is)<a\s[^>]*>"));

static NAME_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)name\s*=\s*"([^"]*)""#));

static VALUE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)value\s*=\s*"([^"]*)""#));

static DATA_LABEL_GAME_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)data-label\s*=\s*"game:(\d+)"#));

static PAGER_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<span[^>]*class="[^"]*pager_label[^"]*"[^>]*>\s*<a[^>]*>(\d+)"#)
});

/// Returns the `value` attribute of the first `<input>` whose `name`
/// attribute equals `name`. Attribute order within the tag does not matter.
#[must_use]
pub fn hidden_input(html: &str, name: &str) -> Option<String> {
    for tag in INPUT_TAG_RE.find_iter(html) {
        let tag = tag.as_str();
        let Some(tag_name) = NAME_ATTR_RE.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        if tag_name.as_str() != name {
            continue;
        }
        return VALUE_ATTR_RE
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }
    None
}

/// Extracts product ids from `game_link` anchors on a publisher storefront
/// page. Order is preserved; duplicate links collapse to one id.
#[must_use]
pub fn extract_game_ids(html: &str) -> Vec<u64> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for tag in ANCHOR_TAG_RE.find_iter(html) {
        let tag = tag.as_str();
        if !tag.contains("game_link") {
            continue;
        }
        if let Some(captures) = DATA_LABEL_GAME_RE.captures(tag) {
            if let Some(id) = captures.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

/// Returns the page count from the last `pager_label` on a bundle listing
/// page, or `None` if no pager is present.
#[must_use]
pub fn last_pager_page(html: &str) -> Option<u32> {
    PAGER_LABEL_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .last()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_input_extracts_value() {
        let html = r#"<form><input type="hidden" name="csrf_token" value="tok123"></form>"#;
        assert_eq!(hidden_input(html, "csrf_token").as_deref(), Some("tok123"));
    }

    #[test]
    fn test_hidden_input_attribute_order_does_not_matter() {
        let html = r#"<input value="42" type="hidden" name="game_id">"#;
        assert_eq!(hidden_input(html, "game_id").as_deref(), Some("42"));
    }

    #[test]
    fn test_hidden_input_missing_returns_none() {
        let html = r#"<input type="hidden" name="other" value="x">"#;
        assert_eq!(hidden_input(html, "csrf_token"), None);
    }

    #[test]
    fn test_extract_game_ids_from_publisher_page() {
        let html = r#"
            <a class="game_link" href="/one" data-label="game:101:title"></a>
            <a href="/plain">not a game link</a>
            <a data-label="game:202:thumb" class="thumb_link game_link"></a>
            <a class="game_link" data-label="game:101:title"></a>
        "#;
        assert_eq!(extract_game_ids(html), vec![101, 202]);
    }

    #[test]
    fn test_last_pager_page_takes_final_label() {
        let html = r#"
            <span class="pager_label"><a href="?page=1">1</a></span>
            <span class="pager_label"><a href="?page=7">7</a></span>
        "#;
        assert_eq!(last_pager_page(html), Some(7));
    }

    #[test]
    fn test_last_pager_page_absent() {
        assert_eq!(last_pager_page("<html><body>no pager</body></html>"), None);
    }
}
