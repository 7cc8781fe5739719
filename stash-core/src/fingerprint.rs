//! Deterministic fingerprints for computations and their arguments.
//!
//! A computation is identified by a [`ComputationDescriptor`]: its declared
//! name, a stable rendering of its body (source text captured with the
//! [`computation!`](crate::computation) macro, or an explicit version tag) and
//! optionally the values it captures. Argument sets are fingerprinted from
//! their values only, never from object identity.
//!
//! # Hash Input Format
//!
//! Parameter hashes run SHA-256 over a tagged, length-prefixed encoding:
//!
//! ```text
//! 'P' count:u64 value*            positional, in order
//! 'K' count:u64 (len:u64 name value)*   keyword, sorted by name
//!
//! value := 'J' len:u64 canonical-json
//!        | 'B' len:u64 bytes
//!        | 'A' dtype:u8 ndim:u64 dim:u64* len:u64 element-buffer
//! ```
//!
//! All integers are little-endian. Canonical JSON has object keys sorted at
//! every depth.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::args::{ArgValue, Args, NumericArray};
use crate::error::{FingerprintError, StashResult};

/// Identity of a computation as seen by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationDescriptor {
    pub name: String,
    /// Stable rendering of the body. Any change here changes the fingerprint.
    pub source: String,
    /// Values the computation closes over, folded in when enabled.
    pub captures: Vec<ArgValue>,
    pub description: Option<String>,
}

impl ComputationDescriptor {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            captures: Vec::new(),
            description: None,
        }
    }

    pub fn with_captures(mut self, captures: Vec<ArgValue>) -> Self {
        self.captures = captures;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Build a `(ComputationDescriptor, closure)` pair whose source is the
/// closure's own token stream.
///
/// ```
/// use stash_core::{computation, Args, StashResult};
///
/// let (descriptor, square) = computation!("square", |args: &Args| -> StashResult<i64> {
///     Ok(args.get(0).and_then(|v| v.as_json()).and_then(|v| v.as_i64()).unwrap_or(0).pow(2))
/// });
/// assert_eq!(descriptor.name, "square");
/// assert_eq!(square(&Args::new().arg(4i64)).ok(), Some(16));
/// ```
#[macro_export]
macro_rules! computation {
    ($name:expr, $body:expr $(,)?) => {
        (
            $crate::fingerprint::ComputationDescriptor::new($name, stringify!($body)),
            $body,
        )
    };
}

/// Strategy deriving the identifier half of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputationFingerprint {
    /// Hash of name and body, plus captured values when `include_captures`.
    Content { include_captures: bool },
    /// The declared name, verbatim.
    Name,
    /// A fixed caller-chosen identifier.
    Literal(String),
}

impl Default for ComputationFingerprint {
    fn default() -> Self {
        ComputationFingerprint::Content {
            include_captures: false,
        }
    }
}

impl ComputationFingerprint {
    pub fn derive(&self, descriptor: &ComputationDescriptor) -> String {
        match self {
            ComputationFingerprint::Content { include_captures } => {
                let mut hasher = Sha256::new();
                if *include_captures {
                    hasher.update(b"C");
                    hasher.update((descriptor.captures.len() as u64).to_le_bytes());
                    for capture in &descriptor.captures {
                        hash_value(&mut hasher, capture);
                    }
                }
                hash_bytes(&mut hasher, b'N', descriptor.name.as_bytes());
                hash_bytes(&mut hasher, b'S', descriptor.source.as_bytes());
                hex::encode(hasher.finalize())
            }
            ComputationFingerprint::Name => descriptor.name.clone(),
            ComputationFingerprint::Literal(identifier) => identifier.clone(),
        }
    }
}

/// Strategy deriving the parameter half of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ParamsFingerprint {
    /// SHA-256 over every positional and keyword argument.
    #[default]
    Hash,
    /// Fixed fingerprint; arguments are not inspected.
    Literal(String),
    /// Canonical JSON of the keyword arguments. Positional arguments are rejected.
    Json,
}

impl ParamsFingerprint {
    pub fn derive(&self, args: &Args) -> StashResult<String> {
        match self {
            ParamsFingerprint::Hash => Ok(hash_args(args)),
            ParamsFingerprint::Literal(fixed) => Ok(fixed.clone()),
            ParamsFingerprint::Json => json_args(args),
        }
    }
}

/// SHA-256 hex digest of an argument set.
pub fn hash_args(args: &Args) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"P");
    hasher.update((args.positional().len() as u64).to_le_bytes());
    for value in args.positional() {
        hash_value(&mut hasher, value);
    }
    hasher.update(b"K");
    hasher.update((args.keyword().len() as u64).to_le_bytes());
    for (name, value) in args.keyword() {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hash_value(&mut hasher, value);
    }
    hex::encode(hasher.finalize())
}

fn json_args(args: &Args) -> StashResult<String> {
    if !args.positional().is_empty() {
        return Err(FingerprintError::PositionalArgumentsRejected {
            count: args.positional().len(),
        }
        .into());
    }
    let mut map = Map::new();
    for (name, value) in args.keyword() {
        let json = match value {
            ArgValue::Json(v) => canonical_json(v),
            ArgValue::Array(array) => array
                .to_json()
                .ok_or_else(|| FingerprintError::NotJson { name: name.clone() })?,
            ArgValue::Bytes(_) => return Err(FingerprintError::NotJson { name: name.clone() }.into()),
        };
        map.insert(name.clone(), json);
    }
    serde_json::to_string(&Value::Object(map)).map_err(|e| {
        FingerprintError::NotSerializable {
            reason: e.to_string(),
        }
        .into()
    })
}

fn hash_value(hasher: &mut Sha256, value: &ArgValue) {
    match value {
        ArgValue::Json(json) => {
            // Value's Display is infallible compact JSON.
            let text = canonical_json(json).to_string();
            hash_bytes(hasher, b'J', text.as_bytes());
        }
        ArgValue::Bytes(bytes) => hash_bytes(hasher, b'B', bytes),
        ArgValue::Array(array) => hash_array(hasher, array),
    }
}

fn hash_array(hasher: &mut Sha256, array: &NumericArray) {
    hasher.update([b'A', array.dtype().tag()]);
    hasher.update((array.shape().len() as u64).to_le_bytes());
    for dim in array.shape() {
        hasher.update((*dim as u64).to_le_bytes());
    }
    hasher.update((array.as_bytes().len() as u64).to_le_bytes());
    hasher.update(array.as_bytes());
}

fn hash_bytes(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Rebuild `value` with object keys inserted in sorted order at every depth.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonical_json(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
