//! Key layout, feed entries and derived metadata.
//!
//! # Binary Format
//!
//! A cache key is `{identifier}{delimiter}{params_fingerprint}` and a feed key
//! is `{identifier}{delimiter}{time_ordered_id}`. There is no extra framing:
//! the bytes are the object path in a remote store and the LMDB key locally.
//! Because the delimiter is reserved inside identifiers, the substring before
//! the first delimiter always recovers the owning identifier.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;
use uuid::Uuid;

/// Default delimiter between an identifier and the rest of a key.
pub const DEFAULT_DELIMITER: char = '_';

/// Content-addressed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<u8>);

impl Key {
    /// Compose `{identifier}{delimiter}{params}`.
    pub fn compose(identifier: &str, delimiter: char, params: &str) -> Self {
        let mut buf = String::with_capacity(identifier.len() + params.len() + 1);
        buf.push_str(identifier);
        buf.push(delimiter);
        buf.push_str(params);
        Self(buf.into_bytes())
    }

    /// Wrap raw key bytes read back from a store.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The owning identifier: everything before the first delimiter.
    pub fn identifier(&self, delimiter: char) -> &[u8] {
        base_key(&self.0, delimiter)
    }

    /// Lossy UTF-8 rendering, used for logs and object paths.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// True if this key lives under `identifier`.
    pub fn belongs_to(&self, identifier: &str, delimiter: char) -> bool {
        self.0.starts_with(&identifier_prefix(identifier.as_bytes(), delimiter))
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Key::from)
    }
}

/// Everything before the first `delimiter`, or the whole key if absent.
pub fn base_key(key: &[u8], delimiter: char) -> &[u8] {
    let mut buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut buf).as_bytes();
    match find_subslice(key, delim) {
        Some(pos) => &key[..pos],
        None => key,
    }
}

/// `{identifier}{delimiter}` as bytes: the scan prefix for one computation.
pub fn identifier_prefix(identifier: &[u8], delimiter: char) -> Vec<u8> {
    let mut buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut buf).as_bytes();
    let mut prefix = Vec::with_capacity(identifier.len() + delim.len());
    prefix.extend_from_slice(identifier);
    prefix.extend_from_slice(delim);
    prefix
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// One append-only feed record: which key was written, and when.
///
/// `timestamp` is the full feed key (`{identifier}{delimiter}{id}`), which is
/// also what consumers persist as their offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(with = "lossy_bytes")]
    pub timestamp: Vec<u8>,
    pub key: Key,
}

impl FeedEntry {
    pub fn new(timestamp: Vec<u8>, key: Key) -> Self {
        Self { timestamp, key }
    }

    pub fn timestamp_str(&self) -> String {
        String::from_utf8_lossy(&self.timestamp).into_owned()
    }

    /// Decode the wall-clock time embedded in the time-ordered id.
    ///
    /// Returns `None` when the id part is not a UUIDv7.
    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        let text = std::str::from_utf8(&self.timestamp).ok()?;
        let id_part = text.rsplit(|c: char| !c.is_ascii_hexdigit()).next()?;
        let uuid = Uuid::try_parse(id_part).ok()?;
        let (secs, nanos) = uuid.get_timestamp()?.to_unix();
        DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
    }
}

mod lossy_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

/// Raw stored bytes plus their content-type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub value: Vec<u8>,
    /// `None` when the writer did not specify one (read-through backfills).
    pub content_type: Option<String>,
}

impl StoredRecord {
    pub fn new(value: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            value,
            content_type,
        }
    }
}

/// Metadata derived on demand from store state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaData {
    pub key: Key,
    pub public_uri: Option<Url>,
    pub content_type: String,
    pub content_length: u64,
    pub identifier: String,
}

impl MetaData {
    /// Replace the public URI, e.g. with a locally-served address.
    pub fn with_public_uri(mut self, uri: Url) -> Self {
        self.public_uri = Some(uri);
        self
    }
}
