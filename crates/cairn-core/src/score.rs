//! Content scores: the 20-byte SHA-1 identifiers blobs are addressed by.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Number of raw bytes in a [`Score`].
pub const SCORE_LEN: usize = 20;

/// Errors returned while parsing a hex-encoded score.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The input was not exactly 40 lowercase hex characters.
    #[error("invalid hex score: expected 40 lowercase hex characters")]
    InvalidHexScore,
}

/// A content-addressed identifier: the SHA-1 digest of a blob's plaintext.
///
/// Two scores compare equal iff their raw bytes are equal; the hex form is
/// always lowercase and exactly 40 characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score([u8; SCORE_LEN]);

impl Score {
    /// Wrap raw bytes directly. Callers that already hold a validated digest
    /// (e.g. read back from storage) use this instead of re-hashing.
    #[must_use]
    pub const fn from_raw(bytes: [u8; SCORE_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw 20 bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SCORE_LEN] {
        &self.0
    }

    /// Compute the score of a blob: `SHA-1(plaintext)`.
    #[must_use]
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; SCORE_LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Lowercase hex encoding, always 40 characters.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a lowercase hex string into a score.
    ///
    /// Rejects wrong length, non-hex characters, and uppercase (hex::decode
    /// accepts mixed case, so case is checked explicitly).
    pub fn parse_hex(s: &str) -> Result<Self, ParseError> {
        if s.len() != SCORE_LEN * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(ParseError::InvalidHexScore);
        }
        let mut out = [0u8; SCORE_LEN];
        hex::decode_to_slice(s, &mut out).map_err(|_| ParseError::InvalidHexScore)?;
        Ok(Self(out))
    }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Score({})", self.hex())
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}
