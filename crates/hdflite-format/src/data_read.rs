//! Raw reads for compact/contiguous layouts and typed element conversion.
//!
//! Chunked layouts go through [`crate::chunked::ChunkedDatasetReader`];
//! this module covers the two simple layouts and the conversions from raw
//! element bytes to native values, honoring the stored byte order.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::data_layout::DataLayout;
use crate::datatype::{ByteOrdering, Datatype, StringPadding};
use crate::error::FormatError;

/// Zero-copy read of a contiguous dataset: a direct slice into the file.
///
/// Returns `Ok(None)` for compact and chunked layouts.
pub fn contiguous_slice<'f>(
    file_data: &'f [u8],
    layout: &DataLayout,
    expected_bytes: usize,
) -> Result<Option<&'f [u8]>, FormatError> {
    match layout {
        DataLayout::Contiguous { address, size } => {
            let address = address.ok_or(FormatError::NoDataAllocated)? as usize;
            let size = *size as usize;
            if size != expected_bytes {
                return Err(FormatError::DataSizeMismatch {
                    expected: expected_bytes,
                    actual: size,
                });
            }
            let end = address
                .checked_add(size)
                .filter(|&e| e <= file_data.len())
                .ok_or(FormatError::UnexpectedEof {
                    expected: address.saturating_add(size),
                    available: file_data.len(),
                })?;
            Ok(Some(&file_data[address..end]))
        }
        _ => Ok(None),
    }
}

/// Read the raw bytes of a compact or contiguous dataset.
pub fn read_raw(
    file_data: &[u8],
    layout: &DataLayout,
    expected_bytes: usize,
) -> Result<Vec<u8>, FormatError> {
    match layout {
        DataLayout::Compact { data } => {
            if data.len() != expected_bytes {
                return Err(FormatError::DataSizeMismatch {
                    expected: expected_bytes,
                    actual: data.len(),
                });
            }
            Ok(data.clone())
        }
        DataLayout::Contiguous { .. } => Ok(contiguous_slice(file_data, layout, expected_bytes)?
            .map(<[u8]>::to_vec)
            .unwrap_or_default()),
        DataLayout::Chunked { .. } => Err(FormatError::InvalidChunkIndex(
            "chunked layouts are read through the chunked reader".into(),
        )),
    }
}

fn element_chunks(raw: &[u8], size: usize) -> Result<std::slice::ChunksExact<'_, u8>, FormatError> {
    if size == 0 || !raw.len().is_multiple_of(size) {
        return Err(FormatError::DataSizeMismatch {
            expected: size,
            actual: raw.len(),
        });
    }
    Ok(raw.chunks_exact(size))
}

fn numeric(datatype: &Datatype) -> Result<(usize, ByteOrdering, bool, bool), FormatError> {
    match datatype {
        Datatype::FixedPoint {
            size,
            order,
            signed,
        } => Ok((*size as usize, *order, false, *signed)),
        Datatype::FloatingPoint { size, order } => Ok((*size as usize, *order, true, true)),
        Datatype::String { .. } => Err(FormatError::TypeMismatch {
            expected: "numeric",
            actual: "String",
        }),
    }
}

fn read_unsigned(bytes: &[u8], order: ByteOrdering) -> u64 {
    match order {
        ByteOrdering::LittleEndian => LittleEndian::read_uint(bytes, bytes.len()),
        ByteOrdering::BigEndian => BigEndian::read_uint(bytes, bytes.len()),
    }
}

fn read_signed(bytes: &[u8], order: ByteOrdering) -> i64 {
    match order {
        ByteOrdering::LittleEndian => LittleEndian::read_int(bytes, bytes.len()),
        ByteOrdering::BigEndian => BigEndian::read_int(bytes, bytes.len()),
    }
}

fn read_float(bytes: &[u8], order: ByteOrdering) -> Result<f64, FormatError> {
    match (bytes.len(), order) {
        (4, ByteOrdering::LittleEndian) => Ok(LittleEndian::read_f32(bytes) as f64),
        (4, ByteOrdering::BigEndian) => Ok(BigEndian::read_f32(bytes) as f64),
        (8, ByteOrdering::LittleEndian) => Ok(LittleEndian::read_f64(bytes)),
        (8, ByteOrdering::BigEndian) => Ok(BigEndian::read_f64(bytes)),
        (n, _) => Err(FormatError::DataSizeMismatch {
            expected: 8,
            actual: n,
        }),
    }
}

/// Convert raw element bytes to `f64` values.
pub fn read_as_f64(raw: &[u8], datatype: &Datatype) -> Result<Vec<f64>, FormatError> {
    let (size, order, is_float, signed) = numeric(datatype)?;
    element_chunks(raw, size)?
        .map(|bytes| {
            if is_float {
                read_float(bytes, order)
            } else if signed {
                Ok(read_signed(bytes, order) as f64)
            } else {
                Ok(read_unsigned(bytes, order) as f64)
            }
        })
        .collect()
}

/// Convert raw element bytes to `f32` values (f64 sources are narrowed).
pub fn read_as_f32(raw: &[u8], datatype: &Datatype) -> Result<Vec<f32>, FormatError> {
    Ok(read_as_f64(raw, datatype)?
        .into_iter()
        .map(|v| v as f32)
        .collect())
}

/// Convert raw element bytes to `i64` values.
pub fn read_as_i64(raw: &[u8], datatype: &Datatype) -> Result<Vec<i64>, FormatError> {
    let (size, order, is_float, signed) = numeric(datatype)?;
    element_chunks(raw, size)?
        .map(|bytes| {
            if is_float {
                Ok(read_float(bytes, order)? as i64)
            } else if signed {
                Ok(read_signed(bytes, order))
            } else {
                Ok(read_unsigned(bytes, order) as i64)
            }
        })
        .collect()
}

/// Convert raw element bytes to `i32` values.
pub fn read_as_i32(raw: &[u8], datatype: &Datatype) -> Result<Vec<i32>, FormatError> {
    Ok(read_as_i64(raw, datatype)?
        .into_iter()
        .map(|v| v as i32)
        .collect())
}

/// Convert raw element bytes to `u64` values.
pub fn read_as_u64(raw: &[u8], datatype: &Datatype) -> Result<Vec<u64>, FormatError> {
    let (size, order, is_float, _signed) = numeric(datatype)?;
    element_chunks(raw, size)?
        .map(|bytes| {
            if is_float {
                Ok(read_float(bytes, order)? as u64)
            } else {
                Ok(read_unsigned(bytes, order))
            }
        })
        .collect()
}

/// Convert raw fixed-length string elements to `String` values.
pub fn read_as_strings(raw: &[u8], datatype: &Datatype) -> Result<Vec<String>, FormatError> {
    let Datatype::String { size, padding } = datatype else {
        return Err(FormatError::TypeMismatch {
            expected: "String",
            actual: "numeric",
        });
    };
    element_chunks(raw, *size as usize)?
        .map(|bytes| {
            let content = match padding {
                StringPadding::NullTerminate | StringPadding::NullPad => bytes
                    .split(|&b| b == 0)
                    .next()
                    .unwrap_or(bytes),
                StringPadding::SpacePad => {
                    let end = bytes
                        .iter()
                        .rposition(|&b| b != b' ')
                        .map_or(0, |p| p + 1);
                    &bytes[..end]
                }
            };
            Ok(String::from_utf8_lossy(content).into_owned())
        })
        .collect()
}
