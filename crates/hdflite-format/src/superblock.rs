//! HDF5 signature search and superblock parsing (versions 0–3).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::util::{ensure_len, read_uint};

/// The 8-byte HDF5 file signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Locate the HDF5 signature in `data`.
///
/// The signature may appear at offset 0 or at any power-of-two multiple of
/// 512 (512, 1024, 2048, ...), per the userblock rules.
pub fn find_signature(data: &[u8]) -> Result<usize, FormatError> {
    if data.len() >= 8 && data[..8] == HDF5_SIGNATURE {
        return Ok(0);
    }
    let mut offset = 512usize;
    while offset + 8 <= data.len() {
        if data[offset..offset + 8] == HDF5_SIGNATURE {
            return Ok(offset);
        }
        offset = match offset.checked_mul(2) {
            Some(next) => next,
            None => break,
        };
    }
    Err(FormatError::SignatureNotFound)
}

/// Parsed HDF5 superblock.
///
/// Only the fields a read-only reader consumes are retained; the v0/v1
/// B-tree K values and free-space bookkeeping are validated but dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (0–3).
    pub version: u8,
    /// Size of file offsets in bytes (2, 4, or 8).
    pub offset_size: u8,
    /// Size of lengths in bytes (2, 4, or 8).
    pub length_size: u8,
    /// File base address.
    pub base_address: u64,
    /// End-of-file address.
    pub eof_address: u64,
    /// Root group object header address.
    pub root_group_address: u64,
    /// Superblock extension address (v2/v3 only, when defined).
    pub extension_address: Option<u64>,
}

fn validate_sizes(offset_size: u8, length_size: u8) -> Result<(), FormatError> {
    if !matches!(offset_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidOffsetSize(offset_size));
    }
    if !matches!(length_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidLengthSize(length_size));
    }
    Ok(())
}

impl Superblock {
    /// Parse the superblock at `signature_offset` (as returned by
    /// [`find_signature`]).
    pub fn parse(data: &[u8], signature_offset: usize) -> Result<Superblock, FormatError> {
        ensure_len(data, signature_offset, 9)?;
        let d = &data[signature_offset..];
        if d[..8] != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }

        match d[8] {
            v @ (0 | 1) => Self::parse_v0v1(d, v),
            v @ (2 | 3) => Self::parse_v2v3(d, v),
            v => Err(FormatError::UnsupportedSuperblockVersion(v)),
        }
    }

    /// Versions 0 and 1 share a layout; v1 inserts two extra K fields
    /// before the consistency flags.
    fn parse_v0v1(d: &[u8], version: u8) -> Result<Superblock, FormatError> {
        // sig(8) + version(1) + free_space_ver(1) + root_grp_ver(1) + reserved(1)
        // + shared_hdr_ver(1) + offset_size(1) + length_size(1) + reserved(1)
        // + group_leaf_k(2) + group_internal_k(2)
        // v1 only: + indexed_storage_k(2) + reserved(2)
        // + consistency_flags(4)
        let fixed = if version == 0 { 24 } else { 28 };
        ensure_len(d, 0, fixed)?;

        let offset_size = d[13];
        let length_size = d[14];
        validate_sizes(offset_size, length_size)?;

        let os = offset_size as usize;
        // base, free-space, eof, driver-info addresses, then the root group
        // symbol table entry (link_name_offset + header address + cache info).
        let sym_entry_size = os * 2 + 4 + 4 + 16;
        ensure_len(d, fixed, 4 * os + sym_entry_size)?;

        let mut pos = fixed;
        let base_address = read_uint(d, pos, offset_size)?;
        pos += os; // free space address, unused by a reader
        pos += os;
        let eof_address = read_uint(d, pos, offset_size)?;
        pos += os; // driver info address, unused
        pos += os;

        // Root symbol table entry: skip link_name_offset, take the header address.
        pos += os;
        let root_group_address = read_uint(d, pos, offset_size)?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            extension_address: None,
        })
    }

    fn parse_v2v3(d: &[u8], version: u8) -> Result<Superblock, FormatError> {
        // sig(8) + version(1) + offset_size(1) + length_size(1) + flags(1)
        ensure_len(d, 0, 12)?;
        let offset_size = d[9];
        let length_size = d[10];
        validate_sizes(offset_size, length_size)?;

        let os = offset_size as usize;
        ensure_len(d, 12, 4 * os + 4)?;

        let mut pos = 12;
        let base_address = read_uint(d, pos, offset_size)?;
        pos += os;
        let extension = read_uint(d, pos, offset_size)?;
        let extension_defined = !d[pos..pos + os].iter().all(|&b| b == 0xFF);
        pos += os;
        let eof_address = read_uint(d, pos, offset_size)?;
        pos += os;
        let root_group_address = read_uint(d, pos, offset_size)?;
        pos += os;

        #[cfg(feature = "checksum")]
        {
            let stored = LittleEndian::read_u32(&d[pos..pos + 4]);
            let computed = crc32c::crc32c(&d[..pos]);
            if computed != stored {
                return Err(FormatError::ChecksumMismatch {
                    expected: stored,
                    computed,
                });
            }
        }
        #[cfg(not(feature = "checksum"))]
        let _ = LittleEndian::read_u32(&d[pos..pos + 4]);

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            extension_address: extension_defined.then_some(extension),
        })
    }
}
