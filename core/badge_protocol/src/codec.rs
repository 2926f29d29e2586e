//! On-air advertisement encoding/decoding
//!
//! An advertisement is a single ASCII record, fields joined by `|`:
//!
//! ```text
//! MODE|NAME|INTEREST1,INTEREST2,...|TOPIC|TARGET_ID_HEX|SHARED|CURSOR_IDX|CURSOR_VER
//! ```
//!
//! Fields are positional. Missing trailing fields decode as empty strings and
//! integers default to 0. Separators inside NAME are not escaped.
//!
//! The encoder never exceeds [`MAX_MESSAGE_LEN`] bytes. The structured fields
//! (mode, target, flags, cursor) are budgeted first and interests are packed
//! into the remaining space, so running out of room drops whole trailing
//! interests instead of cutting through CURSOR_VER.

use serde::Serialize;

use crate::convergence::Cursor;
use crate::identity::Identity;

// ============================================================================
// Constants
// ============================================================================

/// Maximum encoded advertisement size in bytes (radio payload limit)
pub const MAX_MESSAGE_LEN: usize = 250;

/// Maximum number of interests carried in one advertisement
pub const MAX_INTERESTS: usize = 12;

/// Display names are cut to this many characters on send and on receipt
pub const MAX_NAME_CHARS: usize = 20;

/// Topics are cut to this many characters on send
pub const MAX_TOPIC_CHARS: usize = 30;

const FIELD_SEPARATOR: char = '|';
const INTEREST_SEPARATOR: char = ',';
const FIELD_COUNT: usize = 8;

// ============================================================================
// Types
// ============================================================================

/// Advertised session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Search,
    Chat,
}

impl Mode {
    fn wire(self) -> &'static str {
        match self {
            Mode::Search => "0",
            Mode::Chat => "1",
        }
    }

    fn from_wire(field: &str) -> Option<Self> {
        match field {
            "0" => Some(Mode::Search),
            "1" => Some(Mode::Chat),
            _ => None,
        }
    }
}

/// One decoded (or to-be-encoded) advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub mode: Mode,
    pub name: String,
    pub interests: Vec<String>,
    /// Mode-dependent free text; opaque to the codec
    pub topic: String,
    /// Identity the sender is chatting with
    pub target: Option<Identity>,
    pub contact_shared: bool,
    pub cursor: Cursor,
}

/// Reasons an inbound payload is discarded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("invalid mode field {0:?}")]
    InvalidMode(String),
    #[error("invalid target identity {0:?}")]
    InvalidTarget(String),
    #[error("invalid integer in {field}: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode an advertisement into at most [`MAX_MESSAGE_LEN`] bytes
pub fn encode(adv: &Advertisement) -> Vec<u8> {
    let mut name = truncate_chars(&adv.name, MAX_NAME_CHARS).to_string();
    let mut topic = truncate_chars(&adv.topic, MAX_TOPIC_CHARS).to_string();

    let tail = format!(
        "{}{sep}{}{sep}{}{sep}{}",
        adv.target.map(|t| t.to_hex()).unwrap_or_default(),
        if adv.contact_shared { "1" } else { "0" },
        adv.cursor.index,
        adv.cursor.version,
        sep = FIELD_SEPARATOR,
    );

    // MODE | NAME | <interests> | TOPIC | tail
    let structured_len =
        |name: &str, topic: &str| 1 + 1 + name.len() + 1 + 1 + topic.len() + 1 + tail.len();

    // Only reachable with multi-byte names/topics
    while structured_len(&name, &topic) > MAX_MESSAGE_LEN {
        if topic.pop().is_none() && name.pop().is_none() {
            break;
        }
    }

    let mut budget = MAX_MESSAGE_LEN.saturating_sub(structured_len(&name, &topic));
    let mut interests = String::new();
    for interest in adv
        .interests
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(MAX_INTERESTS)
    {
        let needed = interest.len() + usize::from(!interests.is_empty());
        if needed > budget {
            log::debug!(
                "Advertisement full, dropping trailing interests from '{}'",
                interest
            );
            break;
        }
        if !interests.is_empty() {
            interests.push(INTEREST_SEPARATOR);
        }
        interests.push_str(interest);
        budget -= needed;
    }

    let msg = format!(
        "{}{sep}{}{sep}{}{sep}{}{sep}{}",
        adv.mode.wire(),
        name,
        interests,
        topic,
        tail,
        sep = FIELD_SEPARATOR,
    );
    debug_assert!(msg.len() <= MAX_MESSAGE_LEN);

    msg.into_bytes()
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode an inbound payload. On error the packet must be dropped.
pub fn decode(payload: &[u8]) -> Result<Advertisement, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;

    let mut fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    fields.resize(FIELD_COUNT, "");

    let mode = Mode::from_wire(fields[0].trim())
        .ok_or_else(|| DecodeError::InvalidMode(fields[0].to_string()))?;

    let name = truncate_chars(fields[1], MAX_NAME_CHARS).to_string();

    let interests = fields[2]
        .split(INTEREST_SEPARATOR)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(MAX_INTERESTS)
        .map(str::to_string)
        .collect();

    let topic = fields[3].trim().to_string();

    let target = match fields[4].trim() {
        "" => None,
        hex => Some(
            Identity::from_hex(hex).map_err(|_| DecodeError::InvalidTarget(hex.to_string()))?,
        ),
    };

    let contact_shared = fields[5].trim() == "1";

    let cursor = Cursor {
        index: parse_counter("cursor_idx", fields[6])?,
        version: parse_counter("cursor_ver", fields[7])?,
    };

    Ok(Advertisement {
        mode,
        name,
        interests,
        topic,
        target,
        contact_shared,
        cursor,
    })
}

fn parse_counter(field: &'static str, value: &str) -> Result<u32, DecodeError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| DecodeError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}

/// Cut a string to at most `max` characters (not bytes)
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_advert() -> Advertisement {
        Advertisement {
            mode: Mode::Chat,
            name: "Ada".to_string(),
            interests: vec!["python".to_string(), "music".to_string()],
            topic: "python".to_string(),
            target: Some(Identity::new([2, 0, 0, 0, 0, 9])),
            contact_shared: true,
            cursor: Cursor { index: 1, version: 7 },
        }
    }

    #[test]
    fn test_encode_layout() {
        let encoded = encode(&chat_advert());
        assert_eq!(
            std::str::from_utf8(&encoded).unwrap(),
            "1|Ada|python,music|python|020000000009|1|1|7"
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let adv = chat_advert();
        assert_eq!(decode(&encode(&adv)).unwrap(), adv);
    }

    #[test]
    fn test_decode_pads_missing_fields() {
        let adv = decode(b"0|Bob|hiking").unwrap();
        assert_eq!(adv.mode, Mode::Search);
        assert_eq!(adv.name, "Bob");
        assert_eq!(adv.interests, vec!["hiking"]);
        assert_eq!(adv.topic, "");
        assert_eq!(adv.target, None);
        assert!(!adv.contact_shared);
        assert_eq!(adv.cursor, Cursor::default());
    }

    #[test]
    fn test_decode_trims_and_drops_empty_interests() {
        let adv = decode(b"0|Bob| rust ,, music ,|").unwrap();
        assert_eq!(adv.interests, vec!["rust", "music"]);
    }

    #[test]
    fn test_decode_caps_interest_count() {
        let list: Vec<String> = (0..20).map(|i| format!("i{}", i)).collect();
        let msg = format!("0|Bob|{}", list.join(","));
        let adv = decode(msg.as_bytes()).unwrap();
        assert_eq!(adv.interests.len(), MAX_INTERESTS);
    }

    #[test]
    fn test_decode_truncates_name() {
        let adv = decode(b"0|abcdefghijklmnopqrstuvwxyz|x").unwrap();
        assert_eq!(adv.name, "abcdefghijklmnopqrst");
    }

    #[test]
    fn test_decode_rejects_non_numeric_cursor() {
        assert!(matches!(
            decode(b"1|Bob|x|x||0|one|0"),
            Err(DecodeError::InvalidInteger { field: "cursor_idx", .. })
        ));
        assert!(matches!(
            decode(b"1|Bob|x|x||0|0|-3"),
            Err(DecodeError::InvalidInteger { field: "cursor_ver", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_target_and_mode() {
        assert!(matches!(
            decode(b"1|Bob|x|x|nothex|0|0|0"),
            Err(DecodeError::InvalidTarget(_))
        ));
        assert!(matches!(
            decode(b"1|Bob|x|x|0102|0|0|0"),
            Err(DecodeError::InvalidTarget(_))
        ));
        assert!(matches!(decode(b"7|Bob"), Err(DecodeError::InvalidMode(_))));
        assert!(matches!(decode(b""), Err(DecodeError::InvalidMode(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(decode(&[0x31, 0x7c, 0xff, 0xfe]), Err(DecodeError::NotUtf8));
    }

    #[test]
    fn test_truncation_drops_interests_not_cursor() {
        let mut adv = chat_advert();
        adv.interests = (0..MAX_INTERESTS)
            .map(|i| format!("{}{}", "x".repeat(28), i))
            .collect();
        adv.cursor = Cursor {
            index: 4_000_000_000,
            version: 4_000_000_000,
        };

        let encoded = encode(&adv);
        assert!(encoded.len() <= MAX_MESSAGE_LEN);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.cursor, adv.cursor);
        assert_eq!(decoded.target, adv.target);
        assert!(decoded.contact_shared);
        assert!(decoded.interests.len() < adv.interests.len());
        assert_eq!(decoded.interests[..], adv.interests[..decoded.interests.len()]);
    }

    #[test]
    fn test_multibyte_name_and_topic_stay_in_bounds() {
        let mut adv = chat_advert();
        adv.name = "\u{1F600}".repeat(40);
        adv.topic = "\u{1F3B5}".repeat(40);
        adv.cursor = Cursor {
            index: u32::MAX,
            version: u32::MAX,
        };

        let encoded = encode(&adv);
        assert!(encoded.len() <= MAX_MESSAGE_LEN);
        assert_eq!(decode(&encoded).unwrap().cursor, adv.cursor);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }
}
