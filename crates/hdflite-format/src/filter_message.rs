//! HDF5 Filter Pipeline message parsing (message type 0x000B).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::util::ensure_len;

/// Well-known filter identifiers.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;

/// Description of one filter in a pipeline, with its client parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// Filter identification value.
    pub id: u16,
    /// Optional filter name (usually present for id >= 256).
    pub name: Option<String>,
    /// Filter flags; bit 0 marks the filter optional.
    pub flags: u16,
    /// Client data values passed to the filter.
    pub client_data: Vec<u32>,
}

impl FilterSpec {
    /// True if the filter is marked optional (flag bit 0).
    pub fn is_optional(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// A parsed filter pipeline message: the ordered list of filters that were
/// applied to each chunk when the file was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipelineMessage {
    /// Message version (1 or 2).
    pub version: u8,
    /// Filters in application (encode) order.
    pub filters: Vec<FilterSpec>,
}

impl FilterPipelineMessage {
    /// Parse a filter pipeline message from raw message bytes.
    pub fn parse(data: &[u8]) -> Result<FilterPipelineMessage, FormatError> {
        ensure_len(data, 0, 2)?;
        let version = data[0];
        let count = data[1] as usize;
        match version {
            1 => Self::parse_v1(data, count),
            2 => Self::parse_v2(data, count),
            v => Err(FormatError::InvalidFilterPipelineVersion(v)),
        }
    }

    fn parse_v1(data: &[u8], count: usize) -> Result<FilterPipelineMessage, FormatError> {
        // version(1) + count(1) + reserved(6)
        ensure_len(data, 0, 8)?;
        let mut pos = 8;
        let mut filters = Vec::with_capacity(count);

        for _ in 0..count {
            ensure_len(data, pos, 8)?;
            let id = LittleEndian::read_u16(&data[pos..pos + 2]);
            let name_len = LittleEndian::read_u16(&data[pos + 2..pos + 4]) as usize;
            let flags = LittleEndian::read_u16(&data[pos + 4..pos + 6]);
            let n_client = LittleEndian::read_u16(&data[pos + 6..pos + 8]) as usize;
            pos += 8;

            let name = if name_len > 0 {
                ensure_len(data, pos, name_len)?;
                let s = read_name(&data[pos..pos + name_len]);
                // Name field is padded to an 8-byte boundary in v1.
                pos += (name_len + 7) & !7;
                Some(s)
            } else {
                None
            };

            let client_data = read_client_data(data, &mut pos, n_client)?;
            // Odd client data counts are padded with 4 bytes in v1.
            if n_client % 2 != 0 {
                pos += 4;
            }

            filters.push(FilterSpec {
                id,
                name,
                flags,
                client_data,
            });
        }

        Ok(FilterPipelineMessage {
            version: 1,
            filters,
        })
    }

    fn parse_v2(data: &[u8], count: usize) -> Result<FilterPipelineMessage, FormatError> {
        let mut pos = 2;
        let mut filters = Vec::with_capacity(count);

        for _ in 0..count {
            ensure_len(data, pos, 2)?;
            let id = LittleEndian::read_u16(&data[pos..pos + 2]);
            pos += 2;

            // Name length field is only present for non-reserved ids.
            let name_len = if id >= 256 {
                ensure_len(data, pos, 2)?;
                let nl = LittleEndian::read_u16(&data[pos..pos + 2]) as usize;
                pos += 2;
                nl
            } else {
                0
            };

            ensure_len(data, pos, 4)?;
            let flags = LittleEndian::read_u16(&data[pos..pos + 2]);
            let n_client = LittleEndian::read_u16(&data[pos + 2..pos + 4]) as usize;
            pos += 4;

            let name = if name_len > 0 {
                ensure_len(data, pos, name_len)?;
                let s = read_name(&data[pos..pos + name_len]);
                pos += name_len; // no padding in v2
                Some(s)
            } else {
                None
            };

            let client_data = read_client_data(data, &mut pos, n_client)?;

            filters.push(FilterSpec {
                id,
                name,
                flags,
                client_data,
            });
        }

        Ok(FilterPipelineMessage {
            version: 2,
            filters,
        })
    }
}

fn read_name(bytes: &[u8]) -> String {
    let trimmed = bytes.split(|&b| b == 0).next().unwrap_or(bytes);
    String::from_utf8_lossy(trimmed).into_owned()
}

fn read_client_data(
    data: &[u8],
    pos: &mut usize,
    count: usize,
) -> Result<Vec<u32>, FormatError> {
    ensure_len(data, *pos, count * 4)?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(LittleEndian::read_u32(&data[*pos..*pos + 4]));
        *pos += 4;
    }
    Ok(values)
}
