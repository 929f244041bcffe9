//! HDF5 Data Layout message parsing (message type 0x0008).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::util::{ensure_len, is_undefined, read_uint, read_var_uint};

/// Parsed HDF5 data layout message (versions 3 and 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Data stored inline in the message.
    Compact {
        /// The inline raw data bytes.
        data: Vec<u8>,
    },
    /// Data stored at a single address in the file.
    Contiguous {
        /// File address of the data, or `None` if undefined (all 0xFF).
        address: Option<u64>,
        /// Size of the data in bytes.
        size: u64,
    },
    /// Data stored in fixed-shape chunks located through an index.
    Chunked {
        /// Chunk dimension sizes, rank+1 entries: the spatial tile shape
        /// followed by the element size.
        chunk_dimensions: Vec<u32>,
        /// Address of the chunk index structure, or `None` if undefined.
        index_address: Option<u64>,
        /// Layout message version (3 or 4).
        version: u8,
        /// Chunk index type (v4 only): 1=single chunk, 2=implicit,
        /// 3=fixed array, 4=extensible array, 5=B-tree v2.
        index_type: Option<u8>,
        /// On-disk size of the single chunk when it is filtered (v4,
        /// index type 1 with the filtered flag set).
        single_chunk_filtered_size: Option<u64>,
        /// Filter mask of the single chunk (same conditions).
        single_chunk_filter_mask: Option<u32>,
    },
}

impl DataLayout {
    /// Parse a data layout message from raw message bytes.
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout, FormatError> {
        ensure_len(data, 0, 2)?;
        let version = data[0];
        let class = data[1];
        match version {
            3 => Self::parse_v3(data, class, offset_size, length_size),
            4 => Self::parse_v4(data, class, offset_size, length_size),
            v => Err(FormatError::InvalidLayoutVersion(v)),
        }
    }

    fn parse_compact(data: &[u8], pos: usize) -> Result<DataLayout, FormatError> {
        ensure_len(data, pos, 2)?;
        let size = LittleEndian::read_u16(&data[pos..pos + 2]) as usize;
        ensure_len(data, pos + 2, size)?;
        Ok(DataLayout::Compact {
            data: data[pos + 2..pos + 2 + size].to_vec(),
        })
    }

    fn parse_contiguous(
        data: &[u8],
        pos: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<DataLayout, FormatError> {
        let os = offset_size as usize;
        ensure_len(data, pos, os + length_size as usize)?;
        let address = if is_undefined(data, pos, offset_size) {
            None
        } else {
            Some(read_uint(data, pos, offset_size)?)
        };
        let size = read_uint(data, pos + os, length_size)?;
        Ok(DataLayout::Contiguous { address, size })
    }

    fn parse_v3(
        data: &[u8],
        class: u8,
        offset_size: u8,
        length_size: u8,
    ) -> Result<DataLayout, FormatError> {
        let pos = 2;
        match class {
            0 => Self::parse_compact(data, pos),
            1 => Self::parse_contiguous(data, pos, offset_size, length_size),
            2 => {
                // dimensionality(1) + index address + dims (u32 each)
                ensure_len(data, pos, 1)?;
                let ndims = data[pos] as usize;
                let os = offset_size as usize;
                let mut p = pos + 1;

                ensure_len(data, p, os)?;
                let index_address = if is_undefined(data, p, offset_size) {
                    None
                } else {
                    Some(read_uint(data, p, offset_size)?)
                };
                p += os;

                ensure_len(data, p, ndims * 4)?;
                let mut chunk_dimensions = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    chunk_dimensions.push(LittleEndian::read_u32(&data[p..p + 4]));
                    p += 4;
                }

                Ok(DataLayout::Chunked {
                    chunk_dimensions,
                    index_address,
                    version: 3,
                    index_type: None,
                    single_chunk_filtered_size: None,
                    single_chunk_filter_mask: None,
                })
            }
            c => Err(FormatError::InvalidLayoutClass(c)),
        }
    }

    fn parse_v4(
        data: &[u8],
        class: u8,
        offset_size: u8,
        length_size: u8,
    ) -> Result<DataLayout, FormatError> {
        let pos = 2;
        match class {
            0 => Self::parse_compact(data, pos),
            1 => Self::parse_contiguous(data, pos, offset_size, length_size),
            2 => {
                // flags(1) + dimensionality(1) + dim_size_width(1)
                ensure_len(data, pos, 3)?;
                let flags = data[pos];
                let ndims = data[pos + 1] as usize;
                let dim_width = data[pos + 2] as usize;
                let mut p = pos + 3;

                let mut chunk_dimensions = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    // Chunk dims fit u32 in practice; wider encodings are
                    // read in full and truncated.
                    let v = read_var_uint(data, p, dim_width)?;
                    chunk_dimensions.push(v as u32);
                    p += dim_width;
                }

                ensure_len(data, p, 1)?;
                let index_type = data[p];
                p += 1;

                let mut single_chunk_filtered_size = None;
                let mut single_chunk_filter_mask = None;
                if index_type == 1 && flags & 0x02 != 0 {
                    // Single chunk with filters:
                    // filtered_size(length_size) + filter_mask(4)
                    let ls = length_size as usize;
                    ensure_len(data, p, ls + 4)?;
                    single_chunk_filtered_size = Some(read_uint(data, p, length_size)?);
                    p += ls;
                    single_chunk_filter_mask =
                        Some(LittleEndian::read_u32(&data[p..p + 4]));
                    p += 4;
                }

                ensure_len(data, p, offset_size as usize)?;
                let index_address = if is_undefined(data, p, offset_size) {
                    None
                } else {
                    Some(read_uint(data, p, offset_size)?)
                };

                Ok(DataLayout::Chunked {
                    chunk_dimensions,
                    index_address,
                    version: 4,
                    index_type: Some(index_type),
                    single_chunk_filtered_size,
                    single_chunk_filter_mask,
                })
            }
            c => Err(FormatError::InvalidLayoutClass(c)),
        }
    }
}
