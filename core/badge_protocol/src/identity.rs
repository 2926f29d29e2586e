//! Hardware identity of a badge
//!
//! A 6-byte address, unique per device. It keys the peer table and is the
//! tie-break value of cursor convergence, so ordering is plain unsigned
//! byte-wise comparison (the derived `Ord` on the array).

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Length of a hardware identity in bytes
pub const IDENTITY_LEN: usize = 6;

/// Error parsing an identity from its hex form
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid identity hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("identity must be 6 bytes, got {0}")]
    InvalidLength(usize),
}

/// Fixed-length hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    pub const fn new(bytes: [u8; IDENTITY_LEN]) -> Self {
        Identity(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Lowercase hex, as carried in the TARGET_ID field
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(text)?;
        let arr: [u8; IDENTITY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(bytes.len()))?;
        Ok(Identity(arr))
    }
}

impl From<[u8; IDENTITY_LEN]> for Identity {
    fn from(bytes: [u8; IDENTITY_LEN]) -> Self {
        Identity(bytes)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::from_hex(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = Identity::new([0x01, 0xab, 0x00, 0xff, 0x10, 0x7e]);
        assert_eq!(id.to_hex(), "01ab00ff107e");
        assert_eq!(Identity::from_hex("01ab00ff107e").unwrap(), id);
        assert_eq!("01AB00FF107E".parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            Identity::from_hex("zz0000000000"),
            Err(IdentityError::InvalidHex(_))
        ));
        assert!(matches!(
            Identity::from_hex("0102"),
            Err(IdentityError::InvalidLength(2))
        ));
    }

    #[test]
    fn test_ordering_is_unsigned_bytewise() {
        let low = Identity::new([0x01, 0xff, 0xff, 0xff, 0xff, 0xff]);
        let high = Identity::new([0x80, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(high > low);
    }

    #[test]
    fn test_display_is_colon_separated() {
        let id = Identity::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(id.to_string(), "de:ad:be:ef:00:01");
    }
}
