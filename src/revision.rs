//! Parser for `git rev-list --pretty=medium` output
//!
//! Each record looks like:
//!
//! ```text
//! commit <id>
//! Author: Name <email>
//! Date:   Mon Jan 1 12:00:00 2024 +0100
//!
//!     subject line
//!
//!     more of the message
//! ```
//!
//! The id is mandatory; everything else degrades to a placeholder.

use chrono::DateTime;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::{NotifyError, Result};

pub const UNKNOWN: &str = "unknown";

const DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y %z";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";
const MESSAGE_INDENT: &str = "    ";

static AUTHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*) <(.*)>$").expect("valid author regex"));

/// A name/email pair, as used for commit authors and the repository owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Parse `Name <email>`, falling back to `unknown` for both fields.
    pub fn parse_author(value: &str) -> Self {
        match AUTHOR_RE.captures(value.trim()) {
            Some(caps) => Self::new(&caps[1], &caps[2]),
            None => Self::unknown(),
        }
    }
}

/// One revision from the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    pub author: Identity,
    pub timestamp: String,
    pub message: String,
}

/// Convert git's default date (`Mon Jan 1 12:00:00 2024 +0100`) into
/// `2024-01-01T12:00:00+0100`, keeping the original offset.
pub fn format_timestamp(raw: &str) -> Option<String> {
    DateTime::parse_from_str(raw.trim(), DATE_FORMAT)
        .ok()
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

/// Parse a whole listing into revisions, in listing order.
pub fn parse_revisions(listing: &str) -> Result<Vec<Revision>> {
    let mut revisions = Vec::new();
    let mut lines = listing.lines().peekable();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        let id = parse_commit_line(line)?;

        let mut author = None;
        let mut date = None;
        while let Some(header) =
            lines.next_if(|l| !l.trim().is_empty() && !l.starts_with("commit "))
        {
            match header.split_once(':') {
                Some((key, value)) if key.eq_ignore_ascii_case("author") => {
                    author = Some(value.trim().to_string())
                }
                Some((key, value)) if key.eq_ignore_ascii_case("date") => {
                    date = Some(value.trim().to_string())
                }
                Some(_) => {}
                None => warn!("Ignoring malformed header in commit {}: {:?}", id, header),
            }
        }

        let mut body = Vec::new();
        while let Some(text) = lines.next_if(|l| !l.starts_with("commit ")) {
            body.push(text.strip_prefix(MESSAGE_INDENT).unwrap_or(text));
        }
        while body.last().is_some_and(|l| l.trim().is_empty()) {
            body.pop();
        }
        while body.first().is_some_and(|l| l.trim().is_empty()) {
            body.remove(0);
        }

        let author = author
            .as_deref()
            .map(Identity::parse_author)
            .unwrap_or_else(Identity::unknown);
        let timestamp = match date {
            Some(raw) => format_timestamp(&raw).unwrap_or_else(|| {
                warn!("Unparseable date in commit {}: {:?}", id, raw);
                raw
            }),
            None => UNKNOWN.to_string(),
        };

        revisions.push(Revision {
            id,
            author,
            timestamp,
            message: body.join("\n"),
        });
    }

    Ok(revisions)
}

fn parse_commit_line(line: &str) -> Result<String> {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some("commit"), Some(id)) if id.chars().all(|c| c.is_ascii_hexdigit()) => {
            Ok(id.to_string())
        }
        _ => Err(NotifyError::MalformedRevision(line.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
commit 1111111111111111111111111111111111111111
Author: Ada Lovelace <ada@example.com>
Date:   Mon Jan 1 12:00:00 2024 +0100

    Add analytical engine

    It computes Bernoulli numbers.

commit 2222222222222222222222222222222222222222
Merge: 1111111 3333333
Author: Charles Babbage <charles@example.com>
Date:   Tue Feb 13 09:05:07 2024 -0500

    Merge difference engine
";

    #[test]
    fn parses_records_in_listing_order() {
        let revisions = parse_revisions(LISTING).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].id, "1111111111111111111111111111111111111111");
        assert_eq!(revisions[1].id, "2222222222222222222222222222222222222222");
    }

    #[test]
    fn splits_author_and_keeps_offset() {
        let revisions = parse_revisions(LISTING).unwrap();
        assert_eq!(
            revisions[0].author,
            Identity::new("Ada Lovelace", "ada@example.com")
        );
        assert_eq!(revisions[0].timestamp, "2024-01-01T12:00:00+0100");
        assert_eq!(revisions[1].timestamp, "2024-02-13T09:05:07-0500");
    }

    #[test]
    fn keeps_multi_paragraph_messages_whole() {
        let revisions = parse_revisions(LISTING).unwrap();
        assert_eq!(
            revisions[0].message,
            "Add analytical engine\n\nIt computes Bernoulli numbers."
        );
        assert_eq!(revisions[1].message, "Merge difference engine");
    }

    #[test]
    fn unmatched_author_becomes_unknown() {
        let listing = "\
commit abcdef0123456789abcdef0123456789abcdef01
Author: nobody-in-particular
Date:   Mon Jan 1 12:00:00 2024 +0000

    message
";
        let revisions = parse_revisions(listing).unwrap();
        assert_eq!(revisions[0].author, Identity::unknown());
    }

    #[test]
    fn bad_date_keeps_raw_text() {
        let listing = "\
commit abcdef0123456789abcdef0123456789abcdef01
Author: A <a@example.com>
Date:   sometime last week

    message
";
        let revisions = parse_revisions(listing).unwrap();
        assert_eq!(revisions[0].timestamp, "sometime last week");
    }

    #[test]
    fn missing_date_is_unknown() {
        let listing = "\
commit abcdef0123456789abcdef0123456789abcdef01
Author: A <a@example.com>

    message
";
        let revisions = parse_revisions(listing).unwrap();
        assert_eq!(revisions[0].timestamp, UNKNOWN);
    }

    #[test]
    fn unparseable_id_is_an_error() {
        let listing = "commot zzz\nAuthor: A <a@example.com>\n\n    message\n";
        assert!(matches!(
            parse_revisions(listing),
            Err(NotifyError::MalformedRevision(_))
        ));
    }

    #[test]
    fn empty_listing_has_no_revisions() {
        assert!(parse_revisions("").unwrap().is_empty());
    }
}
