//! Descriptors used to add sessions.
//!
//! A descriptor is either a magnet URI, which resolves its metadata
//! asynchronously through the swarm, or a metainfo blob (the contents of a
//! `.torrent` file), whose metadata is available immediately.
//!
//! # Example
//!
//! ```
//! use seedbox_core::descriptor::Descriptor;
//!
//! let descriptor = Descriptor::magnet(
//!     "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=Sintel",
//! )
//! .unwrap();
//! assert_eq!(descriptor.display_name(), Some("Sintel"));
//! assert!(descriptor.is_deferred());
//! ```

mod cache;
mod remote;

pub use cache::{CacheError, DescriptorCache};
pub use remote::{FetchError, MAX_DESCRIPTOR_BYTES, RemoteDescriptorFetcher};

use std::fmt;

use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;
use url::Url;

use crate::session::{INFO_HASH_LEN, InfoHash, InfoHashError};

/// Prefix of the exact-topic parameter carrying a `BitTorrent` info hash.
const BTIH_PREFIX: &str = "urn:btih:";

/// Errors from validating a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Input is not a parseable magnet URI.
    #[error("invalid magnet URI '{uri}': {reason}\n  Suggestion: Magnet links look like magnet:?xt=urn:btih:<40 hex chars>")]
    InvalidMagnet {
        /// The rejected input.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The magnet URI has no `xt=urn:btih:` parameter.
    #[error("magnet URI '{uri}' has no urn:btih info hash")]
    MissingInfoHash {
        /// The rejected input.
        uri: String,
    },

    /// The info hash inside the magnet URI is malformed.
    #[error("magnet URI has a malformed info hash: {0}")]
    InvalidInfoHash(#[from] InfoHashError),

    /// Metainfo payload was empty.
    #[error("metainfo descriptor is empty")]
    EmptyMetaInfo,

    /// Metainfo payload is not a bencoded dictionary.
    #[error("metainfo descriptor is not valid bencode: {reason}")]
    MalformedMetaInfo {
        /// Decoder message.
        reason: String,
    },

    /// Metainfo dictionary has no `info` dictionary.
    #[error("metainfo descriptor has no info dictionary\n  Suggestion: Check that the file is a .torrent and not a web page")]
    MissingInfoDict,

    /// Metainfo payload exceeds the accepted size.
    #[error("metainfo descriptor too large: {len} bytes (limit {limit})")]
    TooLarge {
        /// Payload length.
        len: usize,
        /// Accepted maximum.
        limit: usize,
    },
}

/// Validated input for adding a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Magnet URI; metadata resolves asynchronously.
    Magnet {
        /// Original URI.
        uri: String,
        /// Info hash from the `xt` parameter.
        info_hash: InfoHash,
        /// Display name from the `dn` parameter.
        display_name: Option<String>,
    },

    /// Raw metainfo (`.torrent` file contents).
    MetaInfo {
        /// Bencoded payload.
        bytes: Vec<u8>,
        /// SHA-1 of the bencoded info dictionary.
        info_hash: InfoHash,
        /// `name` entry of the info dictionary.
        name: Option<String>,
    },
}

impl Descriptor {
    /// Parses and validates a magnet URI.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if the URI is not a magnet link or carries
    /// no valid `urn:btih` info hash.
    pub fn magnet(uri: &str) -> Result<Self, DescriptorError> {
        let uri = uri.trim();
        let parsed = Url::parse(uri).map_err(|e| DescriptorError::InvalidMagnet {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "magnet" {
            return Err(DescriptorError::InvalidMagnet {
                uri: uri.to_string(),
                reason: format!("unexpected scheme '{}'", parsed.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    if let Some(raw) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = Some(raw.parse::<InfoHash>()?);
                    }
                }
                "dn" if display_name.is_none() && !value.is_empty() => {
                    display_name = Some(value.into_owned());
                }
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| DescriptorError::MissingInfoHash {
            uri: uri.to_string(),
        })?;

        Ok(Self::Magnet {
            uri: uri.to_string(),
            info_hash,
            display_name,
        })
    }

    /// Builds a magnet descriptor for a known info hash.
    #[must_use]
    pub fn from_info_hash(info_hash: InfoHash) -> Self {
        Self::Magnet {
            uri: format!("magnet:?xt={BTIH_PREFIX}{info_hash}"),
            info_hash,
            display_name: None,
        }
    }

    /// Decodes a metainfo payload and derives its info hash.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if the payload is empty, too large, not
    /// bencode, or has no `info` dictionary.
    pub fn metainfo(bytes: impl Into<Vec<u8>>) -> Result<Self, DescriptorError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(DescriptorError::EmptyMetaInfo);
        }
        if bytes.len() > MAX_DESCRIPTOR_BYTES {
            return Err(DescriptorError::TooLarge {
                len: bytes.len(),
                limit: MAX_DESCRIPTOR_BYTES,
            });
        }

        let root: Value =
            serde_bencode::from_bytes(&bytes).map_err(|e| DescriptorError::MalformedMetaInfo {
                reason: e.to_string(),
            })?;
        let Value::Dict(mut root) = root else {
            return Err(DescriptorError::MalformedMetaInfo {
                reason: "top level is not a dictionary".to_string(),
            });
        };
        let Some(info @ Value::Dict(_)) = root.remove(b"info".as_slice()) else {
            return Err(DescriptorError::MissingInfoDict);
        };

        let encoded =
            serde_bencode::to_bytes(&info).map_err(|e| DescriptorError::MalformedMetaInfo {
                reason: e.to_string(),
            })?;
        let mut digest = [0u8; INFO_HASH_LEN];
        digest.copy_from_slice(&Sha1::digest(&encoded));

        let name = match &info {
            Value::Dict(fields) => match fields.get(b"name".as_slice()) {
                Some(Value::Bytes(raw)) => String::from_utf8(raw.clone())
                    .ok()
                    .filter(|name| !name.is_empty()),
                _ => None,
            },
            _ => None,
        };

        Ok(Self::MetaInfo {
            bytes,
            info_hash: InfoHash::from_bytes(digest),
            name,
        })
    }

    /// Info hash identifying the session this descriptor adds.
    #[must_use]
    pub fn info_hash(&self) -> InfoHash {
        match self {
            Self::Magnet { info_hash, .. } | Self::MetaInfo { info_hash, .. } => *info_hash,
        }
    }

    /// Display name carried by the descriptor.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Magnet { display_name, .. } => display_name.as_deref(),
            Self::MetaInfo { name, .. } => name.as_deref(),
        }
    }

    /// True when metadata must be fetched from the swarm before sizes are known.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Magnet { .. })
    }

    /// Metainfo bytes for caching, if this is a metainfo descriptor.
    #[must_use]
    pub fn metainfo_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::MetaInfo { bytes, .. } => Some(bytes),
            Self::Magnet { .. } => None,
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Magnet { info_hash, .. } => write!(f, "Descriptor::Magnet({info_hash})"),
            Self::MetaInfo {
                bytes, info_hash, ..
            } => write!(
                f,
                "Descriptor::MetaInfo({info_hash}, {} bytes)",
                bytes.len()
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

    #[test]
    fn test_magnet_parses_hash_and_name() {
        let uri = format!("magnet:?xt=urn:btih:{HASH}&dn=Big+Buck+Bunny&tr=udp%3A%2F%2Ftracker");
        let descriptor = Descriptor::magnet(&uri).unwrap();
        assert_eq!(descriptor.info_hash().to_string(), HASH);
        assert_eq!(descriptor.display_name(), Some("Big Buck Bunny"));
        assert!(descriptor.is_deferred());
        assert!(descriptor.metainfo_bytes().is_none());
    }

    #[test]
    fn test_magnet_accepts_base32_hash() {
        let descriptor =
            Descriptor::magnet("magnet:?xt=urn:btih:YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKEK").unwrap();
        assert_eq!(descriptor.info_hash().to_string(), HASH);
    }

    #[test]
    fn test_magnet_rejects_other_scheme() {
        let err = Descriptor::magnet("https://example.com/file.torrent").unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidMagnet { .. }));
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_magnet_rejects_garbage() {
        let err = Descriptor::magnet("not a uri").unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidMagnet { .. }));
    }

    #[test]
    fn test_magnet_requires_btih() {
        let err = Descriptor::magnet("magnet:?dn=nothing").unwrap_err();
        assert!(matches!(err, DescriptorError::MissingInfoHash { .. }));
    }

    #[test]
    fn test_magnet_rejects_short_hash() {
        let err = Descriptor::magnet("magnet:?xt=urn:btih:abcdef").unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidInfoHash(_)));
    }

    #[test]
    fn test_from_info_hash_round_trips() {
        let hash: InfoHash = HASH.parse().unwrap();
        let descriptor = Descriptor::from_info_hash(hash);
        let Descriptor::Magnet { uri, .. } = &descriptor else {
            panic!("expected magnet descriptor");
        };
        assert_eq!(Descriptor::magnet(uri).unwrap(), descriptor);
    }

    /// Single-file metainfo whose info dictionary hashes to a known value.
    const METAINFO: &[u8] =
        b"d8:announce14:http://tracker4:infod6:lengthi1024e4:name8:test.bin12:piece lengthi262144eee";
    const INFO: &[u8] = b"d6:lengthi1024e4:name8:test.bin12:piece lengthi262144ee";

    #[test]
    fn test_metainfo_hashes_info_dictionary() {
        let descriptor = Descriptor::metainfo(METAINFO.to_vec()).unwrap();
        let expected = hex::encode(Sha1::digest(INFO));
        assert_eq!(descriptor.info_hash().to_string(), expected);
        assert_eq!(descriptor.display_name(), Some("test.bin"));
        assert!(!descriptor.is_deferred());
        assert_eq!(descriptor.metainfo_bytes(), Some(METAINFO));
    }

    #[test]
    fn test_metainfo_hash_ignores_outer_keys() {
        let bare = Descriptor::metainfo(format!("d4:info{}e", String::from_utf8_lossy(INFO))).unwrap();
        let full = Descriptor::metainfo(METAINFO.to_vec()).unwrap();
        assert_eq!(bare.info_hash(), full.info_hash());
    }

    #[test]
    fn test_metainfo_rejects_empty_and_html() {
        assert!(matches!(
            Descriptor::metainfo(Vec::new()),
            Err(DescriptorError::EmptyMetaInfo)
        ));
        assert!(matches!(
            Descriptor::metainfo(b"<html></html>".to_vec()),
            Err(DescriptorError::MalformedMetaInfo { .. })
        ));
    }

    #[test]
    fn test_metainfo_rejects_dictionary_shaped_garbage() {
        let err = Descriptor::metainfo(b"d this is not bencode at all e".to_vec()).unwrap_err();
        assert!(matches!(err, DescriptorError::MalformedMetaInfo { .. }));
    }

    #[test]
    fn test_metainfo_requires_info_dictionary() {
        assert_eq!(
            Descriptor::metainfo(b"d1:ai1ee".to_vec()).unwrap_err(),
            DescriptorError::MissingInfoDict
        );
        assert_eq!(
            Descriptor::metainfo(b"d4:info3:abce".to_vec()).unwrap_err(),
            DescriptorError::MissingInfoDict
        );
        assert!(matches!(
            Descriptor::metainfo(b"li1ee".to_vec()),
            Err(DescriptorError::MalformedMetaInfo { .. })
        ));
    }

    #[test]
    fn test_metainfo_rejects_oversized() {
        let mut bytes = vec![b'0'; MAX_DESCRIPTOR_BYTES + 1];
        bytes[0] = b'd';
        let last = bytes.len() - 1;
        bytes[last] = b'e';
        assert!(matches!(
            Descriptor::metainfo(bytes),
            Err(DescriptorError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_descriptor_debug_hides_payload() {
        let descriptor = Descriptor::metainfo(b"d4:infod4:name3:fooee".to_vec()).unwrap();
        let debug = format!("{descriptor:?}");
        assert!(debug.starts_with("Descriptor::MetaInfo("));
        assert!(debug.ends_with(", 21 bytes)"));
    }
}
