use std::fmt;

// DType: element types a record store may hold
//
// Feature matrices arrive as F32 (the common case) or F64; labels arrive as
// a signed or unsigned integer scalar:
//
//   F32: 32-bit float, features and normalization statistics
//   F64: 64-bit float, high-precision feature exports
//   U8 : unsigned byte, compact labels
//   I32: signed 32-bit int, labels
//   I64: signed 64-bit int, labels (NumPy / h5py default)

/// Enum of all element types the stores understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
    U8,
    I32,
    I64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
            DType::U8 => 1,
            DType::I32 => 4,
            DType::I64 => 8,
        }
    }

    /// Whether this dtype can hold feature values.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Whether this dtype can hold a class label.
    pub fn is_int(&self) -> bool {
        matches!(self, DType::U8 | DType::I32 | DType::I64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
        };
        write!(f, "{}", s)
    }
}

// WithDType: Trait that connects Rust types to DType enum
//
// Stores hand us raw little-endian bytes plus a DType tag. Implementing this
// trait for each element type lets one generic decoder turn those bytes into
// typed values:
//
//   fn decode<T: WithDType>(bytes: &[u8]) -> Result<Vec<T>> { ... }

/// Trait implemented by Rust types that a store can decode.
pub trait WithDType: Copy + Send + Sync + 'static + fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    /// Read one value from exactly `DTYPE.size_in_bytes()` little-endian bytes.
    fn from_le(bytes: &[u8]) -> Self;

    /// Append the little-endian encoding of this value to `out`.
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_with_dtype {
    ($t:ty, $dtype:expr, $n:expr) => {
        impl WithDType for $t {
            const DTYPE: DType = $dtype;
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn from_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                <$t>::from_le_bytes(buf)
            }
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_with_dtype!(f32, DType::F32, 4);
impl_with_dtype!(f64, DType::F64, 8);
impl_with_dtype!(u8, DType::U8, 1);
impl_with_dtype!(i32, DType::I32, 4);
impl_with_dtype!(i64, DType::I64, 8);

/// Decode a little-endian byte buffer of `dtype` elements into `f64` values.
///
/// Fails if the buffer length is not a whole number of elements.
pub fn decode_le_as_f64(bytes: &[u8], dtype: DType) -> crate::Result<Vec<f64>> {
    fn decode<T: WithDType>(bytes: &[u8]) -> Vec<f64> {
        bytes
            .chunks_exact(T::DTYPE.size_in_bytes())
            .map(|c| T::from_le(c).to_f64())
            .collect()
    }

    let size = dtype.size_in_bytes();
    if bytes.len() % size != 0 {
        return Err(crate::Error::msg(format!(
            "buffer of {} bytes is not a whole number of {} elements",
            bytes.len(),
            dtype
        )));
    }
    Ok(match dtype {
        DType::F32 => decode::<f32>(bytes),
        DType::F64 => decode::<f64>(bytes),
        DType::U8 => decode::<u8>(bytes),
        DType::I32 => decode::<i32>(bytes),
        DType::I64 => decode::<i64>(bytes),
    })
}

/// Encode a slice of values as little-endian bytes.
pub fn encode_le<T: WithDType>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
    for &v in values {
        v.write_le(&mut out);
    }
    out
}
