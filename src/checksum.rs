//! Schema text fingerprints

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 fingerprint of a schema text.
///
/// Surrounding whitespace is not significant: `"{..}\n"` and `"{..}"` share a
/// fingerprint. Anything inside the text is compared byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Fingerprint of a schema text
    pub fn of_text(text: &str) -> Self {
        Self::from_bytes(text.trim().as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `text` hashes to this fingerprint
    pub fn matches(&self, text: &str) -> bool {
        *self == Self::of_text(text)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}
