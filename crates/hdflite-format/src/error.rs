//! Error types for HDF5 format parsing and chunked reading.

use core::fmt;

/// Errors that can occur while parsing HDF5 structures or reading data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The HDF5 magic signature was not found at any valid offset.
    SignatureNotFound,
    /// The superblock version is not supported.
    UnsupportedSuperblockVersion(u8),
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    InvalidLengthSize(u8),
    /// Invalid or unsupported object header version.
    InvalidObjectHeaderVersion(u8),
    /// Invalid object header continuation block signature.
    InvalidContinuationSignature,
    /// Unknown message type that is marked as must-understand.
    UnsupportedMessage(u16),
    /// A required header message is missing.
    MissingMessage(&'static str),
    /// Datatype class not supported by this reader.
    UnsupportedDatatypeClass(u8),
    /// Invalid datatype version for a given class.
    InvalidDatatypeVersion {
        /// The type class.
        class: u8,
        /// The version found.
        version: u8,
    },
    /// Invalid string padding type.
    InvalidStringPadding(u8),
    /// Invalid character set.
    InvalidCharacterSet(u8),
    /// Invalid byte order bits.
    InvalidByteOrder(u8),
    /// Invalid dataspace version.
    InvalidDataspaceVersion(u8),
    /// Invalid dataspace type.
    InvalidDataspaceType(u8),
    /// Invalid data layout version.
    InvalidLayoutVersion(u8),
    /// Invalid data layout class.
    InvalidLayoutClass(u8),
    /// No data allocated for the layout.
    NoDataAllocated,
    /// Type mismatch when converting data.
    TypeMismatch {
        /// Expected type description.
        expected: &'static str,
        /// Actual type description.
        actual: &'static str,
    },
    /// Data size mismatch.
    DataSizeMismatch {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
    /// Invalid local heap signature or content.
    InvalidLocalHeap,
    /// Invalid local heap version.
    InvalidLocalHeapVersion(u8),
    /// Invalid B-tree v1 signature.
    InvalidBTreeSignature,
    /// Invalid B-tree v1 node type.
    InvalidBTreeNodeType(u8),
    /// Invalid B-tree v2 signature (header, leaf, or internal node).
    InvalidBTreeV2Signature,
    /// Invalid B-tree v2 version.
    InvalidBTreeV2Version(u8),
    /// Invalid symbol table node signature.
    InvalidSymbolTableSignature,
    /// Invalid symbol table node version.
    InvalidSymbolTableVersion(u8),
    /// Invalid link message version.
    InvalidLinkVersion(u8),
    /// Invalid link type code.
    InvalidLinkType(u8),
    /// Invalid link info message version.
    InvalidLinkInfoVersion(u8),
    /// The group stores its links densely (fractal heap + B-tree v2),
    /// which this reader does not support.
    UnsupportedDenseGroup,
    /// Path not found during group traversal.
    PathNotFound(String),
    /// CRC32C checksum mismatch.
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Invalid filter pipeline message version.
    InvalidFilterPipelineVersion(u8),
    /// A mandatory filter in the pipeline is not supported.
    UnsupportedFilter(u16),
    /// The filter pipeline could not be constructed.
    FilterInit(String),
    /// A filter failed while decoding chunk bytes.
    FilterDecode(String),
    /// Fletcher32 checksum mismatch while decoding a chunk.
    Fletcher32Mismatch {
        /// The checksum stored with the chunk.
        stored: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// A chunk index structure is malformed or uses an unsupported layout.
    InvalidChunkIndex(String),
    /// Chunked layout version / index type combination is not supported.
    UnsupportedChunkIndex {
        /// Layout message version (3 or 4).
        version: u8,
        /// Index type for v4 layouts.
        index_type: Option<u8>,
    },
    /// Named-chunk accessor called with an offset absent from the lookup.
    ChunkNotFound {
        /// The requested chunk offset.
        offset: Vec<u64>,
        /// Path of the dataset.
        path: String,
    },
    /// A backing storage read failed.
    BackingRead {
        /// Path of the dataset being read.
        path: String,
        /// File address of the failed read.
        address: u64,
        /// Length of the failed read in bytes.
        size: u64,
    },
    /// Checked stride/size arithmetic overflowed.
    DimensionOverflow,
    /// The dataset is too large to materialize in a single buffer.
    DatasetTooLarge {
        /// The required buffer length in bytes.
        bytes: u64,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::SignatureNotFound => {
                write!(f, "HDF5 signature not found at any valid offset")
            }
            FormatError::UnsupportedSuperblockVersion(v) => {
                write!(f, "unsupported superblock version: {v}")
            }
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidObjectHeaderVersion(v) => {
                write!(f, "invalid object header version: {v}")
            }
            FormatError::InvalidContinuationSignature => {
                write!(f, "invalid object header continuation signature")
            }
            FormatError::UnsupportedMessage(id) => {
                write!(
                    f,
                    "unsupported message type {id:#06x} marked as must-understand"
                )
            }
            FormatError::MissingMessage(name) => {
                write!(f, "missing required {name} message")
            }
            FormatError::UnsupportedDatatypeClass(c) => {
                write!(f, "unsupported datatype class: {c}")
            }
            FormatError::InvalidDatatypeVersion { class, version } => {
                write!(f, "invalid datatype version {version} for class {class}")
            }
            FormatError::InvalidStringPadding(p) => {
                write!(f, "invalid string padding type: {p}")
            }
            FormatError::InvalidCharacterSet(c) => {
                write!(f, "invalid character set: {c}")
            }
            FormatError::InvalidByteOrder(b) => {
                write!(f, "invalid byte order: {b}")
            }
            FormatError::InvalidDataspaceVersion(v) => {
                write!(f, "invalid dataspace version: {v}")
            }
            FormatError::InvalidDataspaceType(t) => {
                write!(f, "invalid dataspace type: {t}")
            }
            FormatError::InvalidLayoutVersion(v) => {
                write!(f, "invalid data layout version: {v}")
            }
            FormatError::InvalidLayoutClass(c) => {
                write!(f, "invalid data layout class: {c}")
            }
            FormatError::NoDataAllocated => {
                write!(f, "no data allocated for layout")
            }
            FormatError::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {expected}, got {actual}")
            }
            FormatError::DataSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "data size mismatch: expected {expected} bytes, got {actual} bytes"
                )
            }
            FormatError::InvalidLocalHeap => {
                write!(f, "invalid local heap")
            }
            FormatError::InvalidLocalHeapVersion(v) => {
                write!(f, "invalid local heap version: {v}")
            }
            FormatError::InvalidBTreeSignature => {
                write!(f, "invalid B-tree v1 signature")
            }
            FormatError::InvalidBTreeNodeType(t) => {
                write!(f, "invalid B-tree v1 node type: {t}")
            }
            FormatError::InvalidBTreeV2Signature => {
                write!(f, "invalid B-tree v2 signature")
            }
            FormatError::InvalidBTreeV2Version(v) => {
                write!(f, "invalid B-tree v2 version: {v}")
            }
            FormatError::InvalidSymbolTableSignature => {
                write!(f, "invalid symbol table node signature")
            }
            FormatError::InvalidSymbolTableVersion(v) => {
                write!(f, "invalid symbol table node version: {v}")
            }
            FormatError::InvalidLinkVersion(v) => {
                write!(f, "invalid link message version: {v}")
            }
            FormatError::InvalidLinkType(t) => {
                write!(f, "invalid link type: {t}")
            }
            FormatError::InvalidLinkInfoVersion(v) => {
                write!(f, "invalid link info message version: {v}")
            }
            FormatError::UnsupportedDenseGroup => {
                write!(f, "dense group link storage (fractal heap) not supported")
            }
            FormatError::PathNotFound(p) => {
                write!(f, "path not found: {p}")
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: stored {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::InvalidFilterPipelineVersion(v) => {
                write!(f, "invalid filter pipeline version: {v}")
            }
            FormatError::UnsupportedFilter(id) => {
                write!(f, "unsupported mandatory filter: {id}")
            }
            FormatError::FilterInit(msg) => {
                write!(f, "failed to build filter pipeline: {msg}")
            }
            FormatError::FilterDecode(msg) => {
                write!(f, "filter decode failed: {msg}")
            }
            FormatError::Fletcher32Mismatch { stored, computed } => {
                write!(
                    f,
                    "fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::InvalidChunkIndex(msg) => {
                write!(f, "invalid chunk index: {msg}")
            }
            FormatError::UnsupportedChunkIndex {
                version,
                index_type,
            } => {
                write!(
                    f,
                    "unsupported chunked layout: version={version}, index type={index_type:?}"
                )
            }
            FormatError::ChunkNotFound { offset, path } => {
                write!(f, "no chunk with offset {offset:?} in dataset '{path}'")
            }
            FormatError::BackingRead {
                path,
                address,
                size,
            } => {
                write!(
                    f,
                    "failed to read {size} bytes at address {address:#x} for dataset '{path}'"
                )
            }
            FormatError::DimensionOverflow => {
                write!(f, "dimension arithmetic overflowed")
            }
            FormatError::DatasetTooLarge { bytes } => {
                write!(f, "dataset too large to materialize: {bytes} bytes")
            }
        }
    }
}

impl std::error::Error for FormatError {}
