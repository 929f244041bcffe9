//! Simplified datatype classification for typed reads.

use hdflite_format::datatype::Datatype;

/// The element type of a dataset, reduced to what a caller picks a read
/// method by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Fixed-length string of the given byte width.
    FixedString(u32),
    /// A numeric type of unusual width; read it via the raw bytes.
    Other,
}

/// Classify a parsed datatype.
pub fn classify(datatype: &Datatype) -> DType {
    match datatype {
        Datatype::FixedPoint { size, signed, .. } => match (size, signed) {
            (1, true) => DType::Int8,
            (2, true) => DType::Int16,
            (4, true) => DType::Int32,
            (8, true) => DType::Int64,
            (1, false) => DType::UInt8,
            (2, false) => DType::UInt16,
            (4, false) => DType::UInt32,
            (8, false) => DType::UInt64,
            _ => DType::Other,
        },
        Datatype::FloatingPoint { size, .. } => match size {
            4 => DType::Float32,
            8 => DType::Float64,
            _ => DType::Other,
        },
        Datatype::String { size, .. } => DType::FixedString(*size),
    }
}
