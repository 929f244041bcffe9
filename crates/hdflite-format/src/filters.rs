//! Chunk decode pipeline: deflate, shuffle, and fletcher32 filters.
//!
//! A [`DecodePipeline`] is built once per dataset from its filter pipeline
//! message and applied to every chunk in the decode (read) direction, i.e.
//! in reverse of the order the filters were applied on write. The pipeline
//! holds only immutable filter descriptions, so `decode` is safe to call
//! concurrently from the parallel chunk fan-out.

use crate::error::FormatError;
use crate::filter_message::{
    FilterPipelineMessage, FilterSpec, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE,
};

/// An immutable chain of decode filters for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePipeline {
    filters: Vec<FilterSpec>,
    element_size: u32,
}

impl DecodePipeline {
    /// The identity pipeline used when a dataset carries no filter
    /// pipeline message.
    pub fn no_filters() -> DecodePipeline {
        DecodePipeline {
            filters: Vec::new(),
            element_size: 0,
        }
    }

    /// Build a decode pipeline from a parsed filter pipeline message.
    ///
    /// `element_size` is the dataset element size, used by the shuffle
    /// filter when its client data does not carry one. Unsupported filters
    /// marked optional are dropped with a warning; unsupported mandatory
    /// filters fail construction.
    pub fn build(
        message: &FilterPipelineMessage,
        element_size: u32,
    ) -> Result<DecodePipeline, FormatError> {
        let mut filters = Vec::with_capacity(message.filters.len());
        for spec in &message.filters {
            match spec.id {
                FILTER_SHUFFLE | FILTER_FLETCHER32 => filters.push(spec.clone()),
                #[cfg(feature = "deflate")]
                FILTER_DEFLATE => filters.push(spec.clone()),
                other => {
                    if spec.is_optional() {
                        log::warn!(
                            "skipping unsupported optional filter {} ({:?})",
                            other,
                            spec.name
                        );
                    } else {
                        return Err(FormatError::UnsupportedFilter(other));
                    }
                }
            }
        }
        Ok(DecodePipeline {
            filters,
            element_size,
        })
    }

    /// True if decoding is the identity transform.
    pub fn is_identity(&self) -> bool {
        self.filters.is_empty()
    }

    /// The filters this pipeline applies, in encode order.
    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    /// Decode chunk bytes, applying the filters in reverse order.
    ///
    /// `filter_mask` comes from the chunk record: bit i set means filter i
    /// was *not* applied to this chunk on write and is skipped here.
    pub fn decode(&self, data: &[u8], filter_mask: u32) -> Result<Vec<u8>, FormatError> {
        let mut bytes = data.to_vec();
        for (i, spec) in self.filters.iter().enumerate().rev() {
            if i < 32 && filter_mask & (1 << i) != 0 {
                continue;
            }
            bytes = match spec.id {
                FILTER_SHUFFLE => {
                    let elem = spec
                        .client_data
                        .first()
                        .copied()
                        .unwrap_or(self.element_size);
                    unshuffle(&bytes, elem as usize)?
                }
                FILTER_DEFLATE => inflate(&bytes)?,
                FILTER_FLETCHER32 => fletcher32_strip(&bytes)?,
                other => return Err(FormatError::UnsupportedFilter(other)),
            };
        }
        Ok(bytes)
    }
}

/// Decompress zlib-compressed data.
#[cfg(feature = "deflate")]
fn inflate(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    use std::io::Read;
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FormatError::FilterDecode(format!("deflate: {e}")))?;
    Ok(out)
}

#[cfg(not(feature = "deflate"))]
fn inflate(_data: &[u8]) -> Result<Vec<u8>, FormatError> {
    Err(FormatError::UnsupportedFilter(FILTER_DEFLATE))
}

/// Undo the byte shuffle: on disk all byte-0s of each element are grouped,
/// then all byte-1s, and so on.
fn unshuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, FormatError> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    if !data.len().is_multiple_of(element_size) {
        return Err(FormatError::FilterDecode(format!(
            "shuffle: length {} not a multiple of element size {element_size}",
            data.len()
        )));
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte in 0..element_size {
        let plane = &data[byte * count..(byte + 1) * count];
        for (i, &b) in plane.iter().enumerate() {
            out[i * element_size + byte] = b;
        }
    }
    Ok(out)
}

/// HDF5's modified Fletcher32 over 16-bit big-endian words.
fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    // Defer the modulo across blocks; 360 words is the largest block that
    // cannot overflow the u32 accumulators.
    const BLOCK_BYTES: usize = 360 * 2;

    let mut offset = 0;
    while offset + BLOCK_BYTES <= data.len() {
        for pair in data[offset..offset + BLOCK_BYTES].chunks_exact(2) {
            let word = ((pair[0] as u32) << 8) | pair[1] as u32;
            sum1 += word;
            sum2 += sum1;
        }
        sum1 %= 65535;
        sum2 %= 65535;
        offset += BLOCK_BYTES;
    }

    while offset < data.len() {
        let word = if offset + 1 < data.len() {
            ((data[offset] as u32) << 8) | data[offset + 1] as u32
        } else {
            (data[offset] as u32) << 8
        };
        sum1 = (sum1 + word) % 65535;
        sum2 = (sum2 + sum1) % 65535;
        offset += 2;
    }

    (sum2 << 16) | sum1
}

/// Verify the trailing Fletcher32 checksum and strip it.
fn fletcher32_strip(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    if data.len() < 4 {
        return Err(FormatError::FilterDecode(
            "fletcher32: chunk too short for checksum".into(),
        ));
    }
    let payload = &data[..data.len() - 4];
    let stored = u32::from_le_bytes([
        data[data.len() - 4],
        data[data.len() - 3],
        data[data.len() - 2],
        data[data.len() - 1],
    ]);
    let computed = fletcher32(payload);
    if stored != computed {
        return Err(FormatError::Fletcher32Mismatch { stored, computed });
    }
    Ok(payload.to_vec())
}
