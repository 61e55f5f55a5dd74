//! Strong type definitions for Anchorline.
//!
//! Identifiers are newtypes so a label can never be passed where an address
//! is expected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A 32-byte content address, computed as Blake3(payload).
///
/// The store is content-addressed: two equal payloads always have the same
/// address, so `put` is idempotent and the address doubles as an integrity
/// check on retrieval.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress(pub [u8; 32]);

impl ContentAddress {
    /// Compute the address of a payload.
    pub fn of(payload: &[u8]) -> Self {
        Self(*blake3::hash(payload).as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidAddress(e.to_string()))?;
        Self::try_from(bytes.as_slice())
    }

    /// Whether `payload` hashes to this address.
    pub fn verifies(&self, payload: &[u8]) -> bool {
        Self::of(payload) == *self
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ContentAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ContentAddress {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for ContentAddress {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidAddress(format!("expected 32 bytes, got {}", slice.len())))?;
        Ok(Self(arr))
    }
}

// Addresses serialize as hex so JSON output and CBOR frames agree.
impl Serialize for ContentAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A non-empty identifier grouping data items by product or class.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    /// Create a label, rejecting the empty string.
    pub fn new(label: impl Into<String>) -> Result<Self, CoreError> {
        let label = label.into();
        if label.is_empty() {
            return Err(CoreError::EmptyLabel);
        }
        Ok(Self(label))
    }

    /// Borrow the label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:?})", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Label {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Label {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Label {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_deterministic() {
        let a = ContentAddress::of(b"apple");
        let b = ContentAddress::of(b"apple");
        assert_eq!(a, b);
        assert_ne!(a, ContentAddress::of(b"orange"));
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = ContentAddress::of(b"lemon");
        let parsed: ContentAddress = addr.to_hex().parse().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(addr.to_string().len(), 64);
    }

    #[test]
    fn test_address_rejects_short_hex() {
        assert!(matches!(
            ContentAddress::from_hex("abcd"),
            Err(CoreError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_address_debug_is_truncated() {
        let debug = format!("{:?}", ContentAddress::from_bytes([0xab; 32]));
        assert_eq!(debug, "ContentAddress(abababababababab)");
    }

    #[test]
    fn test_address_serializes_as_hex() {
        let addr = ContentAddress::from_bytes([0x01; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: ContentAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_label_rejects_empty() {
        assert!(matches!(Label::new(""), Err(CoreError::EmptyLabel)));
        assert!(serde_json::from_str::<Label>("\"\"").is_err());
        assert_eq!(Label::new("apple").unwrap().as_str(), "apple");
    }
}
