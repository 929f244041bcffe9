//! HDF5 object header parsing (v1 and v2, with continuation blocks).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::message_type::MessageType;
use crate::util::{ensure_len, read_uint};

const OHDR_SIGNATURE: [u8; 4] = *b"OHDR";
const OCHK_SIGNATURE: [u8; 4] = *b"OCHK";

/// A single parsed header message.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMessage {
    /// The message type.
    pub msg_type: MessageType,
    /// Message flags byte.
    pub flags: u8,
    /// Raw message data bytes.
    pub data: Vec<u8>,
}

/// Parsed HDF5 object header.
///
/// NIL messages are dropped and continuation blocks are flattened, so
/// `messages` holds every real message of the object in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    /// Header version (1 or 2).
    pub version: u8,
    /// All non-NIL messages collected from all header blocks.
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    /// Parse an object header at `offset` in the file data.
    pub fn parse(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<ObjectHeader, FormatError> {
        ensure_len(data, offset, 4)?;
        if data[offset..offset + 4] == OHDR_SIGNATURE {
            Self::parse_v2(data, offset, offset_size, length_size)
        } else {
            Self::parse_v1(data, offset, offset_size, length_size)
        }
    }

    /// Returns true if a message of the given type is present.
    pub fn has_message(&self, msg_type: MessageType) -> bool {
        self.messages.iter().any(|m| m.msg_type == msg_type)
    }

    /// Returns the first message of the given type, if present.
    pub fn find_message(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.msg_type == msg_type)
    }

    // ----- v1 -----

    fn parse_v1(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<ObjectHeader, FormatError> {
        // version(1) + reserved(1) + num_messages(2) + ref_count(4) + header_size(4),
        // then padded to 8-byte alignment (4 pad bytes) before the first message.
        ensure_len(data, offset, 16)?;

        let version = data[offset];
        if version != 1 {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }

        let num_messages = LittleEndian::read_u16(&data[offset + 2..offset + 4]) as usize;
        let block_size = LittleEndian::read_u32(&data[offset + 8..offset + 12]) as usize;

        let block_start = offset + 16;
        ensure_len(data, block_start, block_size)?;

        let mut messages = Vec::with_capacity(num_messages);
        let mut pending = vec![(block_start, block_size)];
        let mut parsed = 0usize;

        while let Some((start, size)) = pending.pop() {
            let end = start + size;
            ensure_len(data, start, size)?;
            let mut pos = start;

            while pos + 8 <= end && parsed < num_messages {
                let raw_type = LittleEndian::read_u16(&data[pos..pos + 2]);
                let msg_size = LittleEndian::read_u16(&data[pos + 2..pos + 4]) as usize;
                let flags = data[pos + 4];
                pos += 8;
                if pos + msg_size > end {
                    break;
                }
                parsed += 1;

                let msg_type = MessageType::from_u16(raw_type);
                if let MessageType::Unknown(id) = msg_type {
                    // Bit 3: fail on unknown must-understand messages.
                    if flags & 0x08 != 0 {
                        return Err(FormatError::UnsupportedMessage(id));
                    }
                }

                if msg_type == MessageType::Continuation {
                    let body = &data[pos..pos + msg_size];
                    let os = offset_size as usize;
                    if body.len() >= os + length_size as usize {
                        let cont_off = read_uint(body, 0, offset_size)? as usize;
                        let cont_len = read_uint(body, os, length_size)? as usize;
                        pending.push((cont_off, cont_len));
                    }
                } else if msg_type != MessageType::Nil {
                    messages.push(HeaderMessage {
                        msg_type,
                        flags,
                        data: data[pos..pos + msg_size].to_vec(),
                    });
                }

                pos += msg_size;
            }
        }

        Ok(ObjectHeader {
            version: 1,
            messages,
        })
    }

    // ----- v2 -----

    fn parse_v2(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<ObjectHeader, FormatError> {
        ensure_len(data, offset, 6)?;
        let version = data[offset + 4];
        if version != 2 {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }
        let flags = data[offset + 5];

        let mut pos = offset + 6;

        // Timestamps (flags bit 2): four u32 values.
        if flags & 0x04 != 0 {
            ensure_len(data, pos, 16)?;
            pos += 16;
        }
        // Attribute storage thresholds (flags bit 4).
        if flags & 0x10 != 0 {
            ensure_len(data, pos, 4)?;
            pos += 4;
        }

        // Width of the "size of chunk 0" field is in flags bits 0-1.
        let size_width = 1u8 << (flags & 0x03);
        let block_size = read_uint(data, pos, size_width)? as usize;
        pos += size_width as usize;

        let has_creation_order = flags & 0x04 != 0;

        let mut messages = Vec::new();
        let mut continuations = Vec::new();

        // Chunk 0: messages run from here, followed by a 4-byte checksum.
        let block_end = pos + block_size;
        ensure_len(data, block_end, 4)?;
        verify_block_checksum(data, offset, block_end)?;
        parse_v2_block(
            data,
            pos,
            block_end,
            has_creation_order,
            offset_size,
            length_size,
            &mut messages,
            &mut continuations,
        )?;

        while let Some((cont_off, cont_len)) = continuations.pop() {
            // OCHK signature(4) + messages + checksum(4)
            ensure_len(data, cont_off, cont_len)?;
            if cont_len < 8 {
                return Err(FormatError::UnexpectedEof {
                    expected: 8,
                    available: cont_len,
                });
            }
            if data[cont_off..cont_off + 4] != OCHK_SIGNATURE {
                return Err(FormatError::InvalidContinuationSignature);
            }
            let msg_end = cont_off + cont_len - 4;
            verify_block_checksum(data, cont_off, msg_end)?;
            parse_v2_block(
                data,
                cont_off + 4,
                msg_end,
                has_creation_order,
                offset_size,
                length_size,
                &mut messages,
                &mut continuations,
            )?;
        }

        Ok(ObjectHeader {
            version: 2,
            messages,
        })
    }
}

/// Validate the CRC32C over `data[block_start..msg_end]` against the four
/// bytes stored at `msg_end`.
#[allow(unused_variables)]
fn verify_block_checksum(
    data: &[u8],
    block_start: usize,
    msg_end: usize,
) -> Result<(), FormatError> {
    #[cfg(feature = "checksum")]
    {
        ensure_len(data, msg_end, 4)?;
        let stored = LittleEndian::read_u32(&data[msg_end..msg_end + 4]);
        let computed = crc32c::crc32c(&data[block_start..msg_end]);
        if computed != stored {
            return Err(FormatError::ChecksumMismatch {
                expected: stored,
                computed,
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_v2_block(
    data: &[u8],
    start: usize,
    end: usize,
    has_creation_order: bool,
    offset_size: u8,
    length_size: u8,
    messages: &mut Vec<HeaderMessage>,
    continuations: &mut Vec<(usize, usize)>,
) -> Result<(), FormatError> {
    // v2 message header: type(1) + size(2) + flags(1) [+ creation_order(2)]
    let header_size = if has_creation_order { 6 } else { 4 };
    let mut pos = start;

    while pos + header_size <= end {
        let raw_type = data[pos] as u16;
        let msg_size = LittleEndian::read_u16(&data[pos + 1..pos + 3]) as usize;
        let flags = data[pos + 3];
        pos += header_size;
        if pos + msg_size > end {
            // Trailing gap smaller than a message header.
            break;
        }

        let msg_type = MessageType::from_u16(raw_type);
        if let MessageType::Unknown(id) = msg_type {
            if flags & 0x08 != 0 {
                return Err(FormatError::UnsupportedMessage(id));
            }
        }

        if msg_type == MessageType::Continuation {
            let body = &data[pos..pos + msg_size];
            let os = offset_size as usize;
            if body.len() >= os + length_size as usize {
                let cont_off = read_uint(body, 0, offset_size)? as usize;
                let cont_len = read_uint(body, os, length_size)? as usize;
                continuations.push((cont_off, cont_len));
            }
        } else if msg_type != MessageType::Nil {
            messages.push(HeaderMessage {
                msg_type,
                flags,
                data: data[pos..pos + msg_size].to_vec(),
            });
        }

        pos += msg_size;
    }

    Ok(())
}
