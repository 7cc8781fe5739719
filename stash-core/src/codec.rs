//! Value codecs: the serializer/deserializer pair an orchestrator is bound to.
//!
//! Three stored representations exist: JSON documents, raw byte payloads and
//! numeric arrays. Each codec declares the content type it produces.
//!
//! # Array Format
//!
//! ```text
//! [dtype:u8][ndim:u32][dim:u64 x ndim][element buffer]
//! ```
//!
//! Little-endian throughout; the element buffer is row-major.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use crate::args::{DType, NumericArray};
use crate::content_type::SupportedContentType;
use crate::error::CodecError;

/// Serializer/deserializer pair for values of type `V`.
pub trait Codec<V>: Send + Sync {
    /// Content type written alongside encoded values.
    fn content_type(&self) -> &str;

    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

/// JSON documents via serde_json.
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Codec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &str {
        SupportedContentType::Json.as_str()
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: "json",
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: "json",
            reason: e.to_string(),
        })
    }
}

/// Identity codec for raw byte payloads.
#[derive(Debug, Clone)]
pub struct BytesCodec {
    content_type: String,
}

impl BytesCodec {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }
}

impl Default for BytesCodec {
    fn default() -> Self {
        Self::new(SupportedContentType::OctetStream.as_str())
    }
}

impl Codec<Vec<u8>> for BytesCodec {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// Self-describing binary codec for [`NumericArray`].
#[derive(Debug, Clone)]
pub struct ArrayCodec {
    content_type: SupportedContentType,
}

impl ArrayCodec {
    pub fn tensor() -> Self {
        Self {
            content_type: SupportedContentType::Tensor,
        }
    }

    pub fn time_series() -> Self {
        Self {
            content_type: SupportedContentType::TimeSeries,
        }
    }
}

impl Default for ArrayCodec {
    fn default() -> Self {
        Self::tensor()
    }
}

impl Codec<NumericArray> for ArrayCodec {
    fn content_type(&self) -> &str {
        self.content_type.as_str()
    }

    fn encode(&self, value: &NumericArray) -> Result<Vec<u8>, CodecError> {
        let ndim = u32::try_from(value.shape().len()).map_err(|_| CodecError::Encode {
            codec: "numeric-array",
            reason: format!("{} dimensions exceed u32", value.shape().len()),
        })?;
        let mut out = Vec::with_capacity(5 + value.shape().len() * 8 + value.as_bytes().len());
        out.push(value.dtype().tag());
        out.extend_from_slice(&ndim.to_le_bytes());
        for dim in value.shape() {
            out.extend_from_slice(&(*dim as u64).to_le_bytes());
        }
        out.extend_from_slice(value.as_bytes());
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<NumericArray, CodecError> {
        let truncated = || CodecError::Decode {
            codec: "numeric-array",
            reason: format!("truncated header ({} bytes)", bytes.len()),
        };
        let (&tag, rest) = bytes.split_first().ok_or_else(truncated)?;
        let dtype = DType::from_tag(tag).ok_or_else(|| CodecError::Decode {
            codec: "numeric-array",
            reason: format!("unknown dtype tag {}", tag),
        })?;
        let ndim_bytes: [u8; 4] = rest
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(truncated)?;
        let ndim = u32::from_le_bytes(ndim_bytes) as usize;
        let mut cursor = &rest[4..];
        let mut shape = Vec::with_capacity(ndim.min(64));
        for _ in 0..ndim {
            let dim_bytes: [u8; 8] = cursor
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(truncated)?;
            let dim = usize::try_from(u64::from_le_bytes(dim_bytes)).map_err(|_| {
                CodecError::Decode {
                    codec: "numeric-array",
                    reason: "dimension exceeds usize".to_string(),
                }
            })?;
            shape.push(dim);
            cursor = &cursor[8..];
        }
        NumericArray::from_raw(dtype, shape, cursor.to_vec())
    }
}
