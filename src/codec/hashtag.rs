//! Hashtag tokenizer (spec §4.C, §8): scans by Unicode code point,
//! collects `#`-prefixed runs of ASCII `[A-Za-z0-9_]`, lowercases and
//! deduplicates per post, and pairs each unique tag with the post's
//! hour bucket.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::timestamp::truncate_to_hour;

/// One `(tag, hour_bucket, +1)` update, per unique tag in a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashtagUpdate {
    pub tag: String,
    pub hour: String,
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Extract the set of lowercased, deduplicated hashtags in `text`.
pub fn extract_tags(text: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '#' {
            let mut j = i + 1;
            while j < chars.len() && is_tag_char(chars[j]) {
                j += 1;
            }
            if j > i + 1 {
                let tag: String = chars[i + 1..j].iter().collect();
                tags.insert(tag.to_lowercase());
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    tags
}

/// Produce one update per unique tag, paired with the post's hour
/// bucket. Empty text yields nothing (spec §4.C).
pub fn extract_updates(text: &str, created_at: &DateTime<Utc>) -> Vec<HashtagUpdate> {
    if text.is_empty() {
        return Vec::new();
    }
    let hour = truncate_to_hour(created_at);
    extract_tags(text)
        .into_iter()
        .map(|tag| HashtagUpdate { tag, hour: hour.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn extracts_simple_tag() {
        let tags = extract_tags("hello #world");
        assert_eq!(tags, BTreeSet::from(["world".to_string()]));
    }

    #[test]
    fn lowercases_tags() {
        let tags = extract_tags("#RustLang is great");
        assert_eq!(tags, BTreeSet::from(["rustlang".to_string()]));
    }

    #[test]
    fn deduplicates_repeated_tags() {
        let tags = extract_tags("#rust #Rust #RUST");
        assert_eq!(tags, BTreeSet::from(["rust".to_string()]));
    }

    #[test]
    fn stops_at_non_tag_characters() {
        let tags = extract_tags("check #rust-lang out");
        assert_eq!(tags, BTreeSet::from(["rust".to_string()]));
    }

    #[test]
    fn bare_hash_with_no_following_chars_yields_nothing() {
        let tags = extract_tags("just a # symbol");
        assert!(tags.is_empty());
    }

    #[test]
    fn empty_text_yields_no_updates() {
        let updates = extract_updates("", &ts("2024-01-01T00:00:00Z"));
        assert!(updates.is_empty());
    }

    #[test]
    fn hour_bucket_matches_truncated_created_at() {
        let updates = extract_updates("#foo", &ts("2024-01-01T12:45:00Z"));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].hour, "2024-01-01T12:00:00Z");
    }

    #[test]
    fn handles_unicode_text_around_tags() {
        let tags = extract_tags("日本語のテキスト #日本語 #tag1");
        // Non-ASCII runs after '#' do not form a tag character run.
        assert_eq!(tags, BTreeSet::from(["tag1".to_string()]));
    }
}
