//! Content identifier for a session (the torrent info hash).

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an info hash in bytes.
pub const INFO_HASH_LEN: usize = 20;

/// Errors from parsing an info hash string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InfoHashError {
    /// The string is not valid hex or base32.
    #[error("invalid info hash '{value}': not a hex or base32 string")]
    InvalidEncoding {
        /// The rejected input.
        value: String,
    },

    /// The decoded value is not 20 bytes long.
    #[error("invalid info hash '{value}': expected {INFO_HASH_LEN} bytes, got {len}")]
    InvalidLength {
        /// The rejected input.
        value: String,
        /// Decoded byte length.
        len: usize,
    },
}

/// A 20-byte content hash identifying one session.
///
/// Displays and serializes as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Wraps raw hash bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the 32-character base32 form used by some magnet links.
    ///
    /// # Errors
    ///
    /// Returns [`InfoHashError`] if the input is not 32 base32 characters.
    pub fn from_base32(value: &str) -> Result<Self, InfoHashError> {
        let bytes = BASE32
            .decode(value.to_ascii_uppercase().as_bytes())
            .map_err(|_| InfoHashError::InvalidEncoding {
                value: value.to_string(),
            })?;
        Self::try_from(bytes.as_slice()).map_err(|len| InfoHashError::InvalidLength {
            value: value.to_string(),
            len,
        })
    }
}

impl TryFrom<&[u8]> for InfoHash {
    type Error = usize;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; INFO_HASH_LEN] = bytes.try_into().map_err(|_| bytes.len())?;
        Ok(Self(array))
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == 32 {
            return Self::from_base32(trimmed);
        }
        let bytes = hex::decode(trimmed).map_err(|_| InfoHashError::InvalidEncoding {
            value: trimmed.to_string(),
        })?;
        Self::try_from(bytes.as_slice()).map_err(|len| InfoHashError::InvalidLength {
            value: trimmed.to_string(),
            len,
        })
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
