//! Content parsing grammars shared by the derived-work passes and the ask
//! pipeline, plus the content hash that keys embedding recomputes.

use lazy_static::lazy_static;

lazy_static! {
    /// `@[title](id)` — capture 1 = title, capture 2 = id.
    pub static ref MENTION_WITH_ID: regex::Regex =
        regex::Regex::new(r"@\[([^\]]+)\]\(([^)]+)\)").unwrap();

    /// `@[title]` without an id part. The lookahead refuses malformed
    /// mentions like `@[title]abc123)` so they are left as-is.
    pub static ref MENTION_TITLE_ONLY: fancy_regex::Regex =
        fancy_regex::Regex::new(r"@\[([^\]]+)\](?![a-zA-Z0-9]*\))").unwrap();

    /// `[text](/files/{project_id}/{file_id}/{token}/)`, absolute URLs
    /// included. Capture 2 = project id, capture 3 = file id (the file id
    /// must additionally be UUID-formatted to count).
    pub static ref FILE_LINK: regex::Regex = regex::Regex::new(
        r"\[([^\]]+)\]\((?:https?://[^/]+)?/files/([a-zA-Z0-9]+)/([a-zA-Z0-9-]+)/[a-zA-Z0-9_-]+/?\)"
    )
    .unwrap();

    /// `[text](/pages/{page_id})`, absolute URLs included.
    pub static ref PAGE_LINK: regex::Regex = regex::Regex::new(
        r"\[([^\]]+)\]\((?:https?://[^/]+)?/pages/([a-zA-Z0-9]+)/?\)"
    )
    .unwrap();

    /// `@[username](@user_id)` — the `@` prefix inside the parens
    /// distinguishes a user mention from file and page links.
    pub static ref USER_MENTION: regex::Regex =
        regex::Regex::new(r"@\[([^\]]+)\]\(@([a-zA-Z0-9]+)\)").unwrap();
}

/// Parse @-mentions out of an ask query.
///
/// Returns the cleaned query with `@[title](id)` and `@[title]` replaced by
/// just the title (preserving semantic context for the model), along with
/// the mentioned page ids in order of appearance.
pub fn parse_mentions(query: &str) -> (String, Vec<String>) {
    let page_ids = MENTION_WITH_ID
        .captures_iter(query)
        .map(|cap| cap[2].to_string())
        .collect();

    let cleaned = MENTION_WITH_ID.replace_all(query, "$1");
    let cleaned = MENTION_TITLE_ONLY.replace_all(&cleaned, "$1");

    (cleaned.into_owned(), page_ids)
}

/// Page links in page content: (link text, target page external id).
pub fn parse_page_links(content: &str) -> Vec<(String, String)> {
    PAGE_LINK
        .captures_iter(content)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

/// File links in page content: (link text, target file external id).
/// Entries whose file id is not UUID-formatted are skipped, not an error.
pub fn parse_file_links(content: &str) -> Vec<(String, uuid::Uuid)> {
    FILE_LINK
        .captures_iter(content)
        .filter_map(|cap| {
            let file_id = uuid::Uuid::parse_str(&cap[3]).ok()?;
            Some((cap[1].to_string(), file_id))
        })
        .collect()
}

/// Unique external user ids @-mentioned in page content.
pub fn parse_user_mentions(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    USER_MENTION
        .captures_iter(content)
        .filter_map(|cap| {
            let id = cap[2].to_string();
            seen.insert(id.clone()).then_some(id)
        })
        .collect()
}

/// Hash keying embedding recomputes: identical content short-circuits the
/// embedding worker.
pub fn content_sha256(content: &str) -> String {
    use sha2::Digest;
    let digest = sha2::Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_mentions_with_ids() {
        let (cleaned, ids) = parse_mentions("What is @[Meeting Pages](abc123) about?");
        assert_eq!(cleaned, "What is Meeting Pages about?");
        assert_eq!(ids, vec!["abc123"]);

        let (cleaned, ids) = parse_mentions("Summarize @[Page 1](id1) and @[Page 2](id2)");
        assert_eq!(cleaned, "Summarize Page 1 and Page 2");
        assert_eq!(ids, vec!["id1", "id2"]);
    }

    #[test]
    fn test_parse_mentions_title_only() {
        let (cleaned, ids) = parse_mentions("Check @[Task List]");
        assert_eq!(cleaned, "Check Task List");
        assert!(ids.is_empty());
    }

    #[test]
    fn test_parse_mentions_leaves_malformed_untouched() {
        let (cleaned, ids) = parse_mentions("What is @[Meeting Pages]abc123) about?");
        assert_eq!(cleaned, "What is @[Meeting Pages]abc123) about?");
        assert!(ids.is_empty());
    }

    #[test]
    fn test_parse_mentions_no_mentions() {
        let (cleaned, ids) = parse_mentions("No mentions here");
        assert_eq!(cleaned, "No mentions here");
        assert!(ids.is_empty());
    }

    #[test]
    fn test_file_links_require_uuid_ids() {
        let content = "\
            See [report](/files/proj1/550e8400-e29b-41d4-a716-446655440000/tok_abc/) \
            and [bogus](/files/proj1/notauuid/tok_abc/)";
        let links = parse_file_links(content);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "report");
        assert_eq!(
            links[0].1.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_file_links_match_absolute_urls() {
        let content =
            "[doc](https://app.example.com/files/p1/550e8400-e29b-41d4-a716-446655440000/t0k/)";
        assert_eq!(parse_file_links(content).len(), 1);
    }

    #[test]
    fn test_page_links() {
        let links = parse_page_links("Start at [home](/pages/abc123) then [next](/pages/def456/)");
        assert_eq!(
            links,
            vec![
                ("home".to_string(), "abc123".to_string()),
                ("next".to_string(), "def456".to_string()),
            ]
        );
    }

    #[test]
    fn test_user_mentions_dedupe_and_ignore_page_mentions() {
        let content = "cc @[alice](@u1) and @[bob](@u2), again @[alice](@u1); \
                       unrelated page mention @[Notes](n123)";
        assert_eq!(parse_user_mentions(content), vec!["u1", "u2"]);
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_sha256("hello"), content_sha256("hello"));
        assert_ne!(content_sha256("hello"), content_sha256("hello "));
    }
}
