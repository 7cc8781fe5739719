//! Argument model for memoized computations.
//!
//! Arguments form a closed value set: JSON-like documents, raw byte payloads
//! and numeric arrays. Arrays are held as their normalized element buffer
//! (little-endian, row-major) so that value-equal arrays compare and hash
//! identically whatever container they were built from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, FingerprintError, StashResult};

/// Element type of a [`NumericArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            DType::U8 => 0,
            DType::I32 => 1,
            DType::I64 => 2,
            DType::F32 => 3,
            DType::F64 => 4,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DType::U8),
            1 => Some(DType::I32),
            2 => Some(DType::I64),
            3 => Some(DType::F32),
            4 => Some(DType::F64),
            _ => None,
        }
    }
}

/// Dense n-dimensional numeric array stored as a flat element buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumericArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

macro_rules! numeric_constructors {
    ($($ty:ty => $dtype:expr, $from:ident, $to:ident);* $(;)?) => {
        impl NumericArray {
            $(
                /// Build an array of the given shape from row-major elements.
                pub fn $from(shape: Vec<usize>, values: &[$ty]) -> Result<Self, CodecError> {
                    let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                    Self::from_raw($dtype, shape, data)
                }

                /// Copy the elements out, or `None` if the element type differs.
                pub fn $to(&self) -> Option<Vec<$ty>> {
                    if self.dtype != $dtype {
                        return None;
                    }
                    let width = std::mem::size_of::<$ty>();
                    Some(
                        self.data
                            .chunks_exact(width)
                            .map(|chunk| {
                                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                                buf.copy_from_slice(chunk);
                                <$ty>::from_le_bytes(buf)
                            })
                            .collect(),
                    )
                }
            )*
        }

        $(
            impl From<Vec<$ty>> for NumericArray {
                fn from(values: Vec<$ty>) -> Self {
                    NumericArray::from(values.as_slice())
                }
            }

            impl From<&[$ty]> for NumericArray {
                fn from(values: &[$ty]) -> Self {
                    NumericArray {
                        dtype: $dtype,
                        shape: vec![values.len()],
                        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
                    }
                }
            }

            impl<const N: usize> From<[$ty; N]> for NumericArray {
                fn from(values: [$ty; N]) -> Self {
                    NumericArray::from(&values[..])
                }
            }
        )*
    };
}

numeric_constructors! {
    u8 => DType::U8, from_u8, to_u8_vec;
    i32 => DType::I32, from_i32, to_i32_vec;
    i64 => DType::I64, from_i64, to_i64_vec;
    f32 => DType::F32, from_f32, to_f32_vec;
    f64 => DType::F64, from_f64, to_f64_vec;
}

impl NumericArray {
    /// Build from an already little-endian element buffer.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, CodecError> {
        let needed = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .and_then(|elements| elements.checked_mul(dtype.width()))
            .ok_or_else(|| CodecError::Decode {
                codec: "numeric-array",
                reason: format!("shape {:?} of {:?} overflows usize", shape, dtype),
            })?;
        if needed != data.len() {
            return Err(CodecError::Decode {
                codec: "numeric-array",
                reason: format!(
                    "shape {:?} of {:?} needs {} bytes, buffer has {}",
                    shape,
                    dtype,
                    needed,
                    data.len()
                ),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The normalized element buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same elements, new shape with the same element count.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, CodecError> {
        Self::from_raw(self.dtype, shape, self.data)
    }

    /// JSON rendering as a flat list of numbers, if every element is finite.
    pub fn to_json(&self) -> Option<Value> {
        let values: Option<Vec<Value>> = match self.dtype {
            DType::U8 => Some(self.data.iter().map(|v| Value::from(*v)).collect()),
            DType::I32 => self
                .to_i32_vec()
                .map(|v| v.into_iter().map(Value::from).collect()),
            DType::I64 => self
                .to_i64_vec()
                .map(|v| v.into_iter().map(Value::from).collect()),
            DType::F32 => self.to_f32_vec().and_then(|v| {
                v.into_iter()
                    .map(|x| serde_json::Number::from_f64(f64::from(x)).map(Value::Number))
                    .collect()
            }),
            DType::F64 => self.to_f64_vec().and_then(|v| {
                v.into_iter()
                    .map(|x| serde_json::Number::from_f64(x).map(Value::Number))
                    .collect()
            }),
        };
        values.map(Value::Array)
    }
}

/// A single argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Any JSON-like document (strings, numbers, maps, lists).
    Json(Value),
    /// An opaque byte payload.
    Bytes(Vec<u8>),
    /// A numeric array, normalized to its element buffer.
    Array(NumericArray),
}

impl ArgValue {
    /// Convert any serializable value into a JSON argument.
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> StashResult<Self> {
        serde_json::to_value(value)
            .map(ArgValue::Json)
            .map_err(|e| {
                FingerprintError::NotSerializable {
                    reason: e.to_string(),
                }
                .into()
            })
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ArgValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ArgValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NumericArray> {
        match self {
            ArgValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        ArgValue::Json(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Json(Value::from(value))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Json(Value::from(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Json(Value::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Json(Value::from(value))
    }
}

impl From<NumericArray> for ArgValue {
    fn from(value: NumericArray) -> Self {
        ArgValue::Array(value)
    }
}

/// Positional and keyword arguments for one call.
///
/// Positional order matters; keyword order does not (keys are kept sorted).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<ArgValue>,
    keyword: BTreeMap<String, ArgValue>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Append a positional argument from any serializable value.
    pub fn arg_serialize<T: Serialize + ?Sized>(mut self, value: &T) -> StashResult<Self> {
        self.positional.push(ArgValue::serialize(value)?);
        Ok(self)
    }

    /// Set a keyword argument from any serializable value.
    pub fn kwarg_serialize<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> StashResult<Self> {
        self.keyword.insert(name.into(), ArgValue::serialize(value)?);
        Ok(self)
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, ArgValue> {
        &self.keyword
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.positional.get(index)
    }

    pub fn get_kw(&self, name: &str) -> Option<&ArgValue> {
        self.keyword.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_from_vec_and_slice_are_equal() {
        let values = vec![1.0f32, 2.5, -3.0];
        let from_vec = NumericArray::from(values.clone());
        let from_slice = NumericArray::from(values.as_slice());
        let from_fixed = NumericArray::from([1.0f32, 2.5, -3.0]);
        assert_eq!(from_vec, from_slice);
        assert_eq!(from_vec, from_fixed);
    }

    #[test]
    fn test_array_shape_validation() {
        let ok = NumericArray::from_f64(vec![2, 3], &[0.0; 6]);
        assert!(ok.is_ok());
        let bad = NumericArray::from_f64(vec![2, 3], &[0.0; 5]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_array_typed_readback() {
        let arr = NumericArray::from_i32(vec![2, 2], &[1, 2, 3, 4]).expect("valid shape");
        assert_eq!(arr.to_i32_vec(), Some(vec![1, 2, 3, 4]));
        assert_eq!(arr.to_f32_vec(), None);
        assert_eq!(arr.len(), 4);
        let reshaped = arr.reshape(vec![4]).expect("same element count");
        assert_eq!(reshaped.shape(), &[4]);
    }

    #[test]
    fn test_array_to_json() {
        let arr = NumericArray::from(vec![1i64, 2, 3]);
        assert_eq!(arr.to_json(), Some(json!([1, 2, 3])));
        let nan = NumericArray::from(vec![f64::NAN]);
        assert_eq!(nan.to_json(), None);
    }

    #[test]
    fn test_kwargs_are_order_independent() {
        let a = Args::new().kwarg("x", 1i64).kwarg("y", "two");
        let b = Args::new().kwarg("y", "two").kwarg("x", 1i64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_serialize_rejects_non_string_map_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1);
        let err = ArgValue::serialize(&map).expect_err("non-string keys are not JSON");
        assert!(matches!(
            err,
            crate::StashError::Fingerprint(FingerprintError::NotSerializable { .. })
        ));
    }
}
