//! Dimension data types.

use thiserror::Error;

/// A dimension value data type.
///
/// Dimension index and label arrays are homogeneous buffers of one of these types.
/// Index arrays are always [`Int64`](DimensionDataType::Int64).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum DimensionDataType {
    /// `int8` Integer in `[-2^7, 2^7-1]`.
    Int8,
    /// `int16` Integer in `[-2^15, 2^15-1]`.
    Int16,
    /// `int32` Integer in `[-2^31, 2^31-1]`.
    Int32,
    /// `int64` Integer in `[-2^63, 2^63-1]`.
    Int64,
    /// `float32` IEEE 754 single-precision floating point.
    Float32,
    /// `float64` IEEE 754 double-precision floating point.
    Float64,
}

/// An unsupported data type error.
#[derive(Clone, Debug, Error)]
#[error("unsupported data type {_0}")]
pub struct UnsupportedDataTypeError(String);

/// A mismatch between a declared data type and a stored buffer's type tag.
///
/// Surfaced rather than silently coerced.
#[derive(Copy, Clone, Debug, Error)]
#[error("type mismatch: declared {_0}, stored {_1}")]
pub struct TypeMismatchError(pub DimensionDataType, pub DimensionDataType);

impl DimensionDataType {
    /// The identifier of the data type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// The size in bytes of one value.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 | Self::Float64 => 8,
            Self::Float32 => 4,
        }
    }
}

impl core::fmt::Display for DimensionDataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DimensionDataType {
    type Err = UnsupportedDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int8" => Ok(Self::Int8),
            "int16" => Ok(Self::Int16),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            _ => Err(UnsupportedDataTypeError(s.to_string())),
        }
    }
}

impl serde::Serialize for DimensionDataType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for DimensionDataType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// A value storable in a dimension index or label array.
pub trait DimensionValue: bytemuck::Pod {
    /// The data type tag of the value.
    const DATA_TYPE: DimensionDataType;
}

impl DimensionValue for i8 {
    const DATA_TYPE: DimensionDataType = DimensionDataType::Int8;
}
impl DimensionValue for i16 {
    const DATA_TYPE: DimensionDataType = DimensionDataType::Int16;
}
impl DimensionValue for i32 {
    const DATA_TYPE: DimensionDataType = DimensionDataType::Int32;
}
impl DimensionValue for i64 {
    const DATA_TYPE: DimensionDataType = DimensionDataType::Int64;
}
impl DimensionValue for f32 {
    const DATA_TYPE: DimensionDataType = DimensionDataType::Float32;
}
impl DimensionValue for f64 {
    const DATA_TYPE: DimensionDataType = DimensionDataType::Float64;
}
