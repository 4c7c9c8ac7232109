use std::fmt::{self, Debug, Display};

#[cfg(feature = "half")]
use half::f16;

use crate::{Error, Result};

/// Runtime tag identifying the element type stored in a tensor.
///
/// Storage is untyped bytes, so the tag can change independently of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// No type has been set. Any size computation on this tag fails.
    #[default]
    Invalid,
    #[cfg(feature = "half")]
    Half,
    Float,
    Double,
    Int32,
    UInt8,
    UInt16,
    Int16,
    Int8,
    Int64,
    Bool,
}

impl DataType {
    /// Byte width of one element.
    pub fn size_of(&self) -> Result<usize> {
        let size = match self {
            Self::Invalid => return Err(Error::InvalidDType(*self).bt()),
            #[cfg(feature = "half")]
            Self::Half => size_of::<f16>(),
            Self::Float => size_of::<f32>(),
            Self::Double => size_of::<f64>(),
            Self::Int32 => size_of::<i32>(),
            Self::UInt8 => size_of::<u8>(),
            Self::UInt16 => size_of::<u16>(),
            Self::Int16 => size_of::<i16>(),
            Self::Int8 => size_of::<i8>(),
            Self::Int64 => size_of::<i64>(),
            Self::Bool => size_of::<bool>(),
        };
        Ok(size)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            #[cfg(feature = "half")]
            Self::Half => f16::NAME,
            Self::Float => f32::NAME,
            Self::Double => f64::NAME,
            Self::Int32 => i32::NAME,
            Self::UInt8 => u8::NAME,
            Self::UInt16 => u16::NAME,
            Self::Int16 => i16::NAME,
            Self::Int8 => i8::NAME,
            Self::Int64 => i64::NAME,
            Self::Bool => "bool",
        }
    }

    /// Render the element stored at the start of `bytes`.
    ///
    /// `bytes` must hold at least [`DataType::size_of`] bytes; alignment is not required.
    pub(crate) fn format_element(&self, bytes: &[u8]) -> Result<String> {
        fn read<T: DType>(bytes: &[u8]) -> String {
            bytemuck::pod_read_unaligned::<T>(&bytes[..size_of::<T>()]).to_string()
        }

        let width = self.size_of()?;
        if bytes.len() < width {
            return Err(Error::CapacityExceeded {
                required: width,
                capacity: bytes.len(),
            }
            .bt());
        }
        let s = match self {
            Self::Invalid => return Err(Error::InvalidDType(*self).bt()),
            #[cfg(feature = "half")]
            Self::Half => read::<f16>(bytes),
            Self::Float => read::<f32>(bytes),
            Self::Double => read::<f64>(bytes),
            Self::Int32 => read::<i32>(bytes),
            Self::UInt8 => read::<u8>(bytes),
            Self::UInt16 => read::<u16>(bytes),
            Self::Int16 => read::<i16>(bytes),
            Self::Int8 => read::<i8>(bytes),
            Self::Int64 => read::<i64>(bytes),
            Self::Bool => (bytes[0] != 0).to_string(),
        };
        Ok(s)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker trait for element types with a plain byte representation.
///
/// Typed accessors reinterpret raw storage as `[T]`, so only types for which
/// every bit pattern is valid implement this. `bool` has a [`DataType`] tag but
/// no typed access.
pub trait DType: bytemuck::Pod + Debug + Display + Send + Sync + 'static {
    const DATA_TYPE: DataType;
    const NAME: &'static str;
}

macro_rules! dtype {
    ($rt:ident, $tag:ident, $repr:expr) => {
        impl DType for $rt {
            const DATA_TYPE: DataType = DataType::$tag;
            const NAME: &'static str = $repr;
        }
    };
}

dtype!(f32, Float, "f32");
dtype!(f64, Double, "f64");
dtype!(i32, Int32, "i32");
dtype!(u8, UInt8, "u8");
dtype!(u16, UInt16, "u16");
dtype!(i16, Int16, "i16");
dtype!(i8, Int8, "i8");
dtype!(i64, Int64, "i64");
#[cfg(feature = "half")]
dtype!(f16, Half, "f16");
