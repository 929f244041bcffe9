//! Low-level HDF5 binary format parsing and chunked dataset reading.
//!
//! Everything in this crate operates on `&[u8]` file bytes; how those
//! bytes are obtained (in memory, read from disk, memory-mapped) is the
//! `hdflite-io` crate's concern.
//!
//! The centerpiece is [`chunked::ChunkedDatasetReader`], which assembles
//! chunked datasets from any of the chunk index variants in
//! [`chunk_index`], decoding chunks in parallel through the filter
//! pipeline in [`filters`].

pub mod btree_v2;
mod cell_slice;
pub mod chunk_index;
pub mod chunked;
pub mod data_layout;
pub mod data_read;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod filter_message;
pub mod filters;
pub mod group;
pub mod message_type;
pub mod object_header;
pub mod stride;
pub mod superblock;
mod util;
