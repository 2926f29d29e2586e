//! Interest matching
//!
//! Case-insensitive overlap between two interest lists. Common interests are
//! returned lowercased and sorted so that both sides of a chat index the same
//! list in the same order.

use std::collections::BTreeSet;

use crate::codec::{truncate_chars, MAX_TOPIC_CHARS};

/// Number of distinct topic colors a badge can show
pub const TOPIC_PALETTE_SIZE: u8 = 8;

/// Result of matching two interest lists
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterestMatch {
    /// Shared interests, lowercased and sorted
    pub common: Vec<String>,
    /// floor(100 * |common| / |union|), 0 when both lists are empty
    pub percent: u8,
}

/// Match two interest lists
pub fn match_interests(mine: &[String], theirs: &[String]) -> InterestMatch {
    let mine: BTreeSet<String> = mine.iter().map(|s| s.to_lowercase()).collect();
    let theirs: BTreeSet<String> = theirs.iter().map(|s| s.to_lowercase()).collect();

    let union = mine.union(&theirs).count();
    if union == 0 {
        return InterestMatch::default();
    }

    let common: Vec<String> = mine.intersection(&theirs).cloned().collect();
    let percent = (common.len() * 100 / union) as u8;

    InterestMatch { common, percent }
}

/// True if two topics name the same interest: case-insensitive, and compared
/// as they would appear in the TOPIC field
pub fn same_topic(a: &str, b: &str) -> bool {
    let a = truncate_chars(a, MAX_TOPIC_CHARS);
    let b = truncate_chars(b, MAX_TOPIC_CHARS);
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// The entry of `interests` that `topic` refers to
pub fn find_interest<'a>(interests: &'a [String], topic: &str) -> Option<&'a str> {
    interests
        .iter()
        .find(|i| same_topic(i, topic))
        .map(String::as_str)
}

/// True if `topic` equals one of `interests`, ignoring case
pub fn contains_interest(interests: &[String], topic: &str) -> bool {
    find_interest(interests, topic).is_some()
}

/// First of my interests (in my order) that the peer also lists
pub fn first_common_interest<'a>(mine: &'a [String], theirs: &[String]) -> Option<&'a str> {
    let theirs: BTreeSet<String> = theirs.iter().map(|s| s.to_lowercase()).collect();
    mine.iter()
        .find(|item| theirs.contains(&item.to_lowercase()))
        .map(String::as_str)
}

/// Stable color slot for a topic, identical on every device
pub fn topic_palette_slot(topic: &str) -> u8 {
    let mut h: u32 = 0;
    for ch in topic.to_lowercase().chars() {
        h = (h.wrapping_mul(33).wrapping_add(ch as u32)) & 0xFFFF;
    }
    (h % TOPIC_PALETTE_SIZE as u32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_match_is_case_insensitive_and_sorted() {
        let m = match_interests(&list(&["Rust", "music", "Art"]), &list(&["art", "RUST", "golf"]));
        assert_eq!(m.common, vec!["art", "rust"]);
        // 2 common / 4 distinct
        assert_eq!(m.percent, 50);
    }

    #[test]
    fn test_match_percent_floors() {
        let m = match_interests(&list(&["a", "b"]), &list(&["a", "c"]));
        // 1 / 3 = 33.3
        assert_eq!(m.percent, 33);
    }

    #[test]
    fn test_match_is_symmetric() {
        let a = list(&["python", "Music", "hiking", "chess"]);
        let b = list(&["music", "CHESS", "go"]);
        assert_eq!(match_interests(&a, &b), match_interests(&b, &a));
    }

    #[test]
    fn test_match_empty_sets() {
        assert_eq!(match_interests(&[], &[]), InterestMatch { common: vec![], percent: 0 });
        assert_eq!(match_interests(&list(&["a"]), &[]).percent, 0);
    }

    #[test]
    fn test_duplicate_entries_count_once() {
        let m = match_interests(&list(&["a", "A", "b"]), &list(&["a"]));
        assert_eq!(m.common, vec!["a"]);
        assert_eq!(m.percent, 50);
    }

    #[test]
    fn test_first_common_interest_keeps_my_order_and_case() {
        let mine = list(&["Hiking", "Python"]);
        assert_eq!(first_common_interest(&mine, &list(&["python", "hiking"])), Some("Hiking"));
        assert_eq!(first_common_interest(&mine, &list(&["golf"])), None);
    }

    #[test]
    fn test_contains_interest() {
        let mine = list(&["Python", "music"]);
        assert!(contains_interest(&mine, "python"));
        assert!(!contains_interest(&mine, "golf"));
        assert!(!contains_interest(&mine, ""));
    }

    #[test]
    fn test_long_interest_matches_its_wire_topic() {
        let long = "retro computing and vintage synthesizers";
        let mine = list(&[long, "golf"]);
        let on_air = truncate_chars(long, MAX_TOPIC_CHARS);
        assert_ne!(on_air, long);

        assert!(same_topic(long, on_air));
        assert!(same_topic(&on_air.to_uppercase(), long));
        assert_eq!(find_interest(&mine, on_air), Some(long));
        assert!(!same_topic("", ""));
    }

    #[test]
    fn test_topic_palette_slot_is_stable() {
        // h = (('a' * 33) + 'b') = 97 * 33 + 98 = 3299, 3299 % 8 = 3
        assert_eq!(topic_palette_slot("ab"), 3);
        assert_eq!(topic_palette_slot("AB"), topic_palette_slot("ab"));
        assert!(topic_palette_slot("circuitpython") < TOPIC_PALETTE_SIZE);
    }
}
