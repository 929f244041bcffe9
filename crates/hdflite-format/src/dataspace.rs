//! HDF5 Dataspace message parsing (message type 0x0001).

use crate::error::FormatError;
use crate::util::{ensure_len, read_uint};

/// Parsed HDF5 dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// Number of dimensions (0 for scalar).
    pub rank: u8,
    /// Current dimension sizes, fastest-varying last.
    pub dimensions: Vec<u64>,
    /// True for null dataspaces (no elements at all).
    pub is_null: bool,
}

impl Dataspace {
    /// Parse a dataspace message from raw message bytes.
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        ensure_len(data, 0, 4)?;

        let version = data[0];
        let rank = data[1];
        let flags = data[2];

        let (is_null, header_size) = match version {
            // v1: byte 3 plus four more bytes are reserved.
            1 => {
                ensure_len(data, 0, 8)?;
                (false, 8usize)
            }
            // v2: byte 3 is the dataspace type.
            2 => match data[3] {
                0 | 1 => (false, 4usize),
                2 => (true, 4usize),
                t => return Err(FormatError::InvalidDataspaceType(t)),
            },
            v => return Err(FormatError::InvalidDataspaceVersion(v)),
        };

        let ls = length_size as usize;
        let mut pos = header_size;
        let mut dimensions = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            dimensions.push(read_uint(data, pos, length_size)?);
            pos += ls;
        }
        // Max dimensions (flags bit 0) and v1 permutation indices (flags
        // bit 1) follow; a reader does not use either.
        let _ = flags;

        Ok(Dataspace {
            rank,
            dimensions,
            is_null,
        })
    }

    /// Total number of elements (product of the dimensions; 1 for scalar,
    /// 0 for null dataspaces).
    pub fn num_elements(&self) -> u64 {
        if self.is_null {
            return 0;
        }
        self.dimensions.iter().product()
    }
}
