//! HDF5 Datatype message parsing (message type 0x0003).
//!
//! Restricted to the type classes this reader extracts: fixed-point,
//! floating-point, and fixed-length strings. The chunked read engine only
//! consumes [`Datatype::size`]; element bytes are passed through verbatim.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::util::ensure_len;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrdering {
    LittleEndian,
    BigEndian,
}

/// String padding style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Parsed HDF5 datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    /// Class 0: fixed-point (integer) types.
    FixedPoint {
        size: u32,
        order: ByteOrdering,
        signed: bool,
    },
    /// Class 1: IEEE floating-point types.
    FloatingPoint { size: u32, order: ByteOrdering },
    /// Class 3: fixed-length strings.
    String { size: u32, padding: StringPadding },
}

impl Datatype {
    /// Element size in bytes. This is the only property the chunked read
    /// engine consumes.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. } => *size,
        }
    }

    /// Parse a datatype message from raw message bytes.
    pub fn parse(data: &[u8]) -> Result<Datatype, FormatError> {
        // class_and_version(1) + bit_field(3) + size(4)
        ensure_len(data, 0, 8)?;

        let class = data[0] & 0x0F;
        let version = data[0] >> 4;
        if !(1..=3).contains(&version) {
            return Err(FormatError::InvalidDatatypeVersion { class, version });
        }

        let bits0 = data[1];
        let size = LittleEndian::read_u32(&data[4..8]);

        match class {
            0 => {
                let order = parse_order(bits0 & 0x01)?;
                let signed = bits0 & 0x08 != 0;
                // Properties: bit offset(2) + bit precision(2), unused here.
                ensure_len(data, 8, 4)?;
                Ok(Datatype::FixedPoint {
                    size,
                    order,
                    signed,
                })
            }
            1 => {
                let order = parse_order(bits0 & 0x01)?;
                // Properties: offset/precision/exponent/mantissa layout,
                // unused for IEEE types.
                ensure_len(data, 8, 12)?;
                Ok(Datatype::FloatingPoint { size, order })
            }
            3 => {
                let padding = match bits0 & 0x0F {
                    0 => StringPadding::NullTerminate,
                    1 => StringPadding::NullPad,
                    2 => StringPadding::SpacePad,
                    p => return Err(FormatError::InvalidStringPadding(p)),
                };
                Ok(Datatype::String { size, padding })
            }
            c => Err(FormatError::UnsupportedDatatypeClass(c)),
        }
    }
}

fn parse_order(bit: u8) -> Result<ByteOrdering, FormatError> {
    match bit {
        0 => Ok(ByteOrdering::LittleEndian),
        1 => Ok(ByteOrdering::BigEndian),
        b => Err(FormatError::InvalidByteOrder(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little-endian IEEE f64 datatype message.
    pub(crate) fn f64_message() -> Vec<u8> {
        let mut buf = vec![0x11, 0x00, 0x00, 0x00]; // class 1, version 1
        buf.extend_from_slice(&8u32.to_le_bytes());
        // bit offset(2) + precision(2) + exp loc(1) + exp size(1)
        // + mantissa loc(1) + mantissa size(1) + exp bias(4)
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&64u16.to_le_bytes());
        buf.push(52);
        buf.push(11);
        buf.push(0);
        buf.push(52);
        buf.extend_from_slice(&1023u32.to_le_bytes());
        buf
    }

    fn i32_message(signed: bool) -> Vec<u8> {
        let bits = if signed { 0x08 } else { 0x00 };
        let mut buf = vec![0x10, bits, 0x00, 0x00]; // class 0, version 1
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // bit offset
        buf.extend_from_slice(&32u16.to_le_bytes()); // bit precision
        buf
    }

    #[test]
    fn parse_f64() {
        let dt = Datatype::parse(&f64_message()).unwrap();
        assert_eq!(
            dt,
            Datatype::FloatingPoint {
                size: 8,
                order: ByteOrdering::LittleEndian,
            }
        );
        assert_eq!(dt.size(), 8);
    }

    #[test]
    fn parse_signed_and_unsigned_ints() {
        let dt = Datatype::parse(&i32_message(true)).unwrap();
        assert_eq!(
            dt,
            Datatype::FixedPoint {
                size: 4,
                order: ByteOrdering::LittleEndian,
                signed: true,
            }
        );
        let dt = Datatype::parse(&i32_message(false)).unwrap();
        assert!(matches!(dt, Datatype::FixedPoint { signed: false, .. }));
    }

    #[test]
    fn parse_fixed_string() {
        let mut buf = vec![0x13, 0x00, 0x00, 0x00]; // class 3, version 1
        buf.extend_from_slice(&16u32.to_le_bytes());
        let dt = Datatype::parse(&buf).unwrap();
        assert_eq!(
            dt,
            Datatype::String {
                size: 16,
                padding: StringPadding::NullTerminate,
            }
        );
    }

    #[test]
    fn unsupported_class() {
        let mut buf = vec![0x16, 0x00, 0x00, 0x00]; // class 6 (compound)
        buf.extend_from_slice(&24u32.to_le_bytes());
        assert_eq!(
            Datatype::parse(&buf),
            Err(FormatError::UnsupportedDatatypeClass(6))
        );
    }

    #[test]
    fn bad_version() {
        let mut buf = vec![0x50, 0x00, 0x00, 0x00]; // class 0, version 5
        buf.extend_from_slice(&4u32.to_le_bytes());
        assert_eq!(
            Datatype::parse(&buf),
            Err(FormatError::InvalidDatatypeVersion {
                class: 0,
                version: 5
            })
        );
    }

    #[test]
    fn big_endian_int() {
        let mut buf = vec![0x10, 0x01, 0x00, 0x00];
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        let dt = Datatype::parse(&buf).unwrap();
        assert!(matches!(
            dt,
            Datatype::FixedPoint {
                order: ByteOrdering::BigEndian,
                ..
            }
        ));
    }
}
