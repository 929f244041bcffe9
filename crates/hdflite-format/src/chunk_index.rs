//! Chunk location model and the chunk index variants.
//!
//! Every chunked dataset stores its chunks through one of several on-disk
//! index structures. Each variant here scans its structure once and builds
//! a flat `HashMap<ChunkOffset, Chunk>` for O(1) lookups; the
//! [`ChunkIndex`] capability trait is the only thing the read engine sees.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::btree_v2::{self, BTreeV2Header};
use crate::data_layout::DataLayout;
use crate::error::FormatError;
use crate::util::{ensure_len, is_undefined, read_uint, read_var_uint};

/// Logical dataset coordinates of a chunk's lowest-index element.
/// Equality and hashing are element-wise, so this serves as the lookup key.
pub type ChunkOffset = Vec<u64>;

/// Location of one chunk in backing storage. Immutable after index load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Logical dataset coordinates of the chunk origin (spatial dims only).
    pub offset: ChunkOffset,
    /// Byte address of the chunk data in the file.
    pub address: u64,
    /// On-disk (possibly compressed) byte length.
    pub size: u32,
    /// Filter mask: bit i set means pipeline filter i was skipped for this
    /// chunk.
    pub filter_mask: u32,
}

/// The chunk lookup table: one entry per allocated chunk.
pub type ChunkLookup = HashMap<ChunkOffset, Chunk>;

/// Capability the chunked read engine is polymorphic over.
pub trait ChunkIndex {
    /// The chunk lookup this index provides. Read-only during reads.
    fn chunk_lookup(&self) -> &ChunkLookup;
}

impl<T: ChunkIndex + ?Sized> ChunkIndex for Box<T> {
    fn chunk_lookup(&self) -> &ChunkLookup {
        (**self).chunk_lookup()
    }
}

impl<T: ChunkIndex + ?Sized> ChunkIndex for &T {
    fn chunk_lookup(&self) -> &ChunkLookup {
        (**self).chunk_lookup()
    }
}

/// Number of chunks along each dimension.
fn chunk_grid(dims: &[u64], chunk_dims: &[u32]) -> Vec<u64> {
    dims.iter()
        .zip(chunk_dims.iter())
        .map(|(&d, &c)| if c == 0 { 0 } else { d.div_ceil(c as u64) })
        .collect()
}

/// Convert a row-major linear chunk number into the chunk's logical offset.
fn linear_to_chunk_offset(linear: u64, grid: &[u64], chunk_dims: &[u32]) -> ChunkOffset {
    let rank = grid.len();
    let mut offset = vec![0u64; rank];
    let mut remaining = linear;
    for d in (0..rank).rev() {
        if grid[d] == 0 {
            return offset;
        }
        offset[d] = (remaining % grid[d]) * chunk_dims[d] as u64;
        remaining /= grid[d];
    }
    offset
}

fn insert_chunk(lookup: &mut ChunkLookup, chunk: Chunk) {
    lookup.insert(chunk.offset.clone(), chunk);
}

// ---------------------------------------------------------------------------
// B-tree v1 (layout v3)
// ---------------------------------------------------------------------------

/// Chunk index backed by a B-tree v1 of node type 1.
pub struct BTreeV1Index {
    lookup: ChunkLookup,
}

impl ChunkIndex for BTreeV1Index {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl BTreeV1Index {
    /// Traverse the chunk B-tree rooted at `btree_address`.
    ///
    /// Keys carry `rank + 1` offsets (the trailing one indexes into the
    /// element, always 0 for allocated chunks); only the spatial `rank`
    /// offsets become the lookup key.
    pub fn read(
        file_data: &[u8],
        btree_address: u64,
        rank: usize,
        offset_size: u8,
    ) -> Result<BTreeV1Index, FormatError> {
        let mut lookup = ChunkLookup::new();
        collect_btree_v1(file_data, btree_address, rank, offset_size, &mut lookup)?;
        Ok(BTreeV1Index { lookup })
    }
}

fn collect_btree_v1(
    file_data: &[u8],
    node_address: u64,
    rank: usize,
    offset_size: u8,
    lookup: &mut ChunkLookup,
) -> Result<(), FormatError> {
    let offset = node_address as usize;
    let os = offset_size as usize;
    ensure_len(file_data, offset, 8 + os * 2)?;

    if &file_data[offset..offset + 4] != b"TREE" {
        return Err(FormatError::InvalidBTreeSignature);
    }
    let node_type = file_data[offset + 4];
    if node_type != 1 {
        return Err(FormatError::InvalidBTreeNodeType(node_type));
    }
    let node_level = file_data[offset + 5];
    let entries = LittleEndian::read_u16(&file_data[offset + 6..offset + 8]) as usize;

    // Skip left/right sibling addresses.
    let mut pos = offset + 8 + os * 2;

    // Key: chunk size(4) + filter mask(4) + (rank + 1) offsets.
    let key_size = 8 + (rank + 1) * os;
    ensure_len(file_data, pos, entries * (key_size + os) + key_size)?;

    if node_level == 0 {
        for _ in 0..entries {
            let size = LittleEndian::read_u32(&file_data[pos..pos + 4]);
            let filter_mask = LittleEndian::read_u32(&file_data[pos + 4..pos + 8]);
            let mut offsets = Vec::with_capacity(rank);
            let mut kp = pos + 8;
            for _ in 0..rank {
                offsets.push(read_uint(file_data, kp, offset_size)?);
                kp += os;
            }
            pos += key_size;

            let address = read_uint(file_data, pos, offset_size)?;
            pos += os;

            insert_chunk(
                lookup,
                Chunk {
                    offset: offsets,
                    address,
                    size,
                    filter_mask,
                },
            );
        }
        // The final key bounds the last chunk and carries no child.
    } else {
        let mut children = Vec::with_capacity(entries);
        for _ in 0..entries {
            pos += key_size;
            children.push(read_uint(file_data, pos, offset_size)?);
            pos += os;
        }
        for child in children {
            collect_btree_v1(file_data, child, rank, offset_size, lookup)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Single chunk (layout v4, index type 1)
// ---------------------------------------------------------------------------

/// Index for datasets stored as exactly one chunk covering the extent.
pub struct SingleChunkIndex {
    lookup: ChunkLookup,
}

impl ChunkIndex for SingleChunkIndex {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl SingleChunkIndex {
    /// Build the one-entry lookup. `filtered` carries the on-disk size and
    /// mask when the chunk went through the pipeline; otherwise the chunk
    /// is stored at its logical size.
    pub fn read(
        address: u64,
        rank: usize,
        chunk_byte_size: u64,
        filtered: Option<(u64, u32)>,
    ) -> SingleChunkIndex {
        let (size, filter_mask) = match filtered {
            Some((size, mask)) => (size as u32, mask),
            None => (chunk_byte_size as u32, 0),
        };
        let mut lookup = ChunkLookup::with_capacity(1);
        insert_chunk(
            &mut lookup,
            Chunk {
                offset: vec![0; rank],
                address,
                size,
                filter_mask,
            },
        );
        SingleChunkIndex { lookup }
    }
}

// ---------------------------------------------------------------------------
// Implicit (layout v4, index type 2)
// ---------------------------------------------------------------------------

/// Index for unfiltered datasets whose chunks are stored contiguously;
/// addresses are computed, nothing is stored on disk.
pub struct ImplicitIndex {
    lookup: ChunkLookup,
}

impl ChunkIndex for ImplicitIndex {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl ImplicitIndex {
    /// Generate the chunk grid starting at `base_address`, row-major.
    pub fn read(
        base_address: u64,
        dims: &[u64],
        chunk_dims: &[u32],
        elem_size: u32,
    ) -> ImplicitIndex {
        let grid = chunk_grid(dims, chunk_dims);
        let total: u64 = grid.iter().product();
        let chunk_bytes: u64 = chunk_dims.iter().map(|&d| d as u64).product::<u64>()
            * elem_size as u64;

        let mut lookup = ChunkLookup::with_capacity(total as usize);
        for i in 0..total {
            insert_chunk(
                &mut lookup,
                Chunk {
                    offset: linear_to_chunk_offset(i, &grid, chunk_dims),
                    address: base_address + i * chunk_bytes,
                    size: chunk_bytes as u32,
                    filter_mask: 0,
                },
            );
        }
        ImplicitIndex { lookup }
    }
}

// ---------------------------------------------------------------------------
// Fixed array (layout v4, index type 3)
// ---------------------------------------------------------------------------

/// Index backed by a Fixed Array (`FAHD` header + `FADB` data block).
pub struct FixedArrayIndex {
    lookup: ChunkLookup,
}

impl ChunkIndex for FixedArrayIndex {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl FixedArrayIndex {
    /// Read a non-paged fixed array index at `header_address`.
    pub fn read(
        file_data: &[u8],
        header_address: u64,
        dims: &[u64],
        chunk_dims: &[u32],
        elem_size: u32,
        offset_size: u8,
        length_size: u8,
    ) -> Result<FixedArrayIndex, FormatError> {
        let offset = header_address as usize;
        let os = offset_size as usize;
        let ls = length_size as usize;

        // FAHD: signature(4) + version(1) + client_id(1) + entry_size(1)
        // + page_bits(1) + num_entries(length) + data_block_addr(offset)
        // + checksum(4)
        ensure_len(file_data, offset, 8 + ls + os + 4)?;
        let d = &file_data[offset..];
        if &d[..4] != b"FAHD" {
            return Err(FormatError::InvalidChunkIndex(
                "bad fixed array header signature".into(),
            ));
        }
        if d[4] != 0 {
            return Err(FormatError::InvalidChunkIndex(format!(
                "unsupported fixed array version: {}",
                d[4]
            )));
        }
        let client_id = d[5];
        let entry_size = d[6] as usize;
        let page_bits = d[7];
        let num_entries = read_uint(d, 8, length_size)?;
        let data_block_address = read_uint(d, 8 + ls, offset_size)?;

        if page_bits < 64 && num_entries > 1u64 << page_bits {
            return Err(FormatError::InvalidChunkIndex(
                "paged fixed array data blocks not supported".into(),
            ));
        }

        // FADB: signature(4) + version(1) + client_id(1) + header_addr(offset)
        let db = data_block_address as usize;
        ensure_len(file_data, db, 6 + os)?;
        if &file_data[db..db + 4] != b"FADB" {
            return Err(FormatError::InvalidChunkIndex(
                "bad fixed array data block signature".into(),
            ));
        }
        let mut pos = db + 6 + os;

        let grid = chunk_grid(dims, chunk_dims);
        let chunk_bytes: u64 = chunk_dims.iter().map(|&d| d as u64).product::<u64>()
            * elem_size as u64;

        let mut lookup = ChunkLookup::with_capacity(num_entries as usize);
        for i in 0..num_entries {
            let chunk = read_index_entry(
                file_data,
                pos,
                client_id,
                entry_size,
                offset_size,
                chunk_bytes,
                i,
                &grid,
                chunk_dims,
            )?;
            pos += entry_width(client_id, entry_size, offset_size);
            if let Some(chunk) = chunk {
                insert_chunk(&mut lookup, chunk);
            }
        }
        Ok(FixedArrayIndex { lookup })
    }
}

/// Byte width of one index entry for the given client id.
fn entry_width(client_id: u8, entry_size: usize, offset_size: u8) -> usize {
    if client_id == 0 {
        offset_size as usize
    } else {
        entry_size
    }
}

/// Decode one fixed/extensible array element at `pos`.
///
/// Client id 0 stores a bare address; client id 1 adds the on-disk chunk
/// size (variable width) and the filter mask. Returns `None` for
/// unallocated entries (address of all 0xFF).
#[allow(clippy::too_many_arguments)]
fn read_index_entry(
    file_data: &[u8],
    pos: usize,
    client_id: u8,
    entry_size: usize,
    offset_size: u8,
    chunk_bytes: u64,
    linear: u64,
    grid: &[u64],
    chunk_dims: &[u32],
) -> Result<Option<Chunk>, FormatError> {
    let os = offset_size as usize;

    if client_id == 0 {
        if is_undefined(file_data, pos, offset_size) {
            return Ok(None);
        }
        let address = read_uint(file_data, pos, offset_size)?;
        Ok(Some(Chunk {
            offset: linear_to_chunk_offset(linear, grid, chunk_dims),
            address,
            size: chunk_bytes as u32,
            filter_mask: 0,
        }))
    } else {
        let size_width = entry_size
            .checked_sub(os + 4)
            .ok_or_else(|| FormatError::InvalidChunkIndex("entry size too small".into()))?;
        ensure_len(file_data, pos, entry_size)?;
        if is_undefined(file_data, pos, offset_size) {
            return Ok(None);
        }
        let address = read_uint(file_data, pos, offset_size)?;
        let size = read_var_uint(file_data, pos + os, size_width)?;
        let filter_mask = LittleEndian::read_u32(
            &file_data[pos + os + size_width..pos + os + size_width + 4],
        );
        Ok(Some(Chunk {
            offset: linear_to_chunk_offset(linear, grid, chunk_dims),
            address,
            size: size as u32,
            filter_mask,
        }))
    }
}

// ---------------------------------------------------------------------------
// Extensible array (layout v4, index type 4)
// ---------------------------------------------------------------------------

/// Index backed by an Extensible Array (`EAHD` header + `EAIB` index block).
///
/// Inline index-block elements and the direct data blocks listed in the
/// index block are supported; super blocks are not.
pub struct ExtensibleArrayIndex {
    lookup: ChunkLookup,
}

impl ChunkIndex for ExtensibleArrayIndex {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl ExtensibleArrayIndex {
    /// Read an extensible array index at `header_address`.
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        file_data: &[u8],
        header_address: u64,
        dims: &[u64],
        chunk_dims: &[u32],
        elem_size: u32,
        offset_size: u8,
        length_size: u8,
    ) -> Result<ExtensibleArrayIndex, FormatError> {
        let offset = header_address as usize;
        let os = offset_size as usize;
        let ls = length_size as usize;

        // EAHD: signature(4) + version(1) + client_id(1) + entry_size(1)
        // + max_nelmts_bits(1) + idx_blk_elmts(1) + min_dblk_nelmts(1)
        // + sblk_min_nelmts(1) + max_dblk_nelmts_bits(1)
        // + 6 stats (length each) + index_block_addr(offset) + checksum(4)
        ensure_len(file_data, offset, 12 + 6 * ls + os + 4)?;
        let d = &file_data[offset..];
        if &d[..4] != b"EAHD" {
            return Err(FormatError::InvalidChunkIndex(
                "bad extensible array header signature".into(),
            ));
        }
        if d[4] != 0 {
            return Err(FormatError::InvalidChunkIndex(format!(
                "unsupported extensible array version: {}",
                d[4]
            )));
        }
        let client_id = d[5];
        let entry_size = d[6] as usize;
        let idx_blk_elmts = d[8] as usize;
        let min_dblk_nelmts = d[9] as usize;
        let sblk_min_nelmts = d[10] as usize;

        // Stats fields: the fifth is the element count.
        let num_elements = read_uint(d, 12 + 4 * ls, length_size)? as usize;
        let index_block_address = read_uint(d, 12 + 6 * ls, offset_size)?;

        // EAIB: signature(4) + version(1) + client_id(1) + header_addr(offset)
        let ib = index_block_address as usize;
        ensure_len(file_data, ib, 6 + os)?;
        if &file_data[ib..ib + 4] != b"EAIB" {
            return Err(FormatError::InvalidChunkIndex(
                "bad extensible array index block signature".into(),
            ));
        }
        let mut pos = ib + 6 + os;

        let grid = chunk_grid(dims, chunk_dims);
        let chunk_bytes: u64 = chunk_dims.iter().map(|&d| d as u64).product::<u64>()
            * elem_size as u64;
        let width = entry_width(client_id, entry_size, offset_size);

        let mut lookup = ChunkLookup::with_capacity(num_elements);
        let inline = idx_blk_elmts.min(num_elements);
        for i in 0..inline {
            let chunk = read_index_entry(
                file_data,
                pos,
                client_id,
                entry_size,
                offset_size,
                chunk_bytes,
                i as u64,
                &grid,
                chunk_dims,
            )?;
            pos += width;
            if let Some(chunk) = chunk {
                insert_chunk(&mut lookup, chunk);
            }
        }

        let mut consumed = inline;
        if consumed < num_elements {
            // Data blocks listed directly in the index block: 2^level
            // blocks per super block level, sizes doubling after the
            // first level.
            let mut dblk_sizes = Vec::new();
            let mut nelmts = min_dblk_nelmts;
            for level in 0..sblk_min_nelmts {
                for _ in 0..(1usize << level) {
                    dblk_sizes.push(nelmts);
                }
                if level > 0 {
                    nelmts *= 2;
                }
            }

            for &block_elems in &dblk_sizes {
                if consumed >= num_elements {
                    break;
                }
                let addr = read_uint(file_data, pos, offset_size)?;
                let addr_undefined = is_undefined(file_data, pos, offset_size);
                pos += os;
                if addr_undefined {
                    consumed += block_elems;
                    continue;
                }
                read_data_block(
                    file_data,
                    addr as usize,
                    block_elems.min(num_elements - consumed),
                    client_id,
                    entry_size,
                    offset_size,
                    d[7],
                    chunk_bytes,
                    consumed as u64,
                    &grid,
                    chunk_dims,
                    &mut lookup,
                )?;
                consumed += block_elems;
            }

            if consumed < num_elements {
                return Err(FormatError::InvalidChunkIndex(
                    "extensible array super blocks not supported".into(),
                ));
            }
        }

        Ok(ExtensibleArrayIndex { lookup })
    }
}

/// Read the elements of one `EADB` data block.
#[allow(clippy::too_many_arguments)]
fn read_data_block(
    file_data: &[u8],
    offset: usize,
    nelmts: usize,
    client_id: u8,
    entry_size: usize,
    offset_size: u8,
    max_nelmts_bits: u8,
    chunk_bytes: u64,
    start_linear: u64,
    grid: &[u64],
    chunk_dims: &[u32],
    lookup: &mut ChunkLookup,
) -> Result<(), FormatError> {
    let os = offset_size as usize;
    ensure_len(file_data, offset, 6 + os)?;
    if &file_data[offset..offset + 4] != b"EADB" {
        return Err(FormatError::InvalidChunkIndex(
            "bad extensible array data block signature".into(),
        ));
    }
    // version(1) + client_id(1) + header_addr(offset) + block offset; the
    // block offset field is ceil(max_nelmts_bits / 8) bytes wide.
    let block_offset_width = (max_nelmts_bits as usize).div_ceil(8);
    let mut pos = offset + 6 + os + block_offset_width;

    let width = entry_width(client_id, entry_size, offset_size);
    for i in 0..nelmts {
        let chunk = read_index_entry(
            file_data,
            pos,
            client_id,
            entry_size,
            offset_size,
            chunk_bytes,
            start_linear + i as u64,
            grid,
            chunk_dims,
        )?;
        pos += width;
        if let Some(chunk) = chunk {
            insert_chunk(lookup, chunk);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// B-tree v2 (layout v4, index type 5)
// ---------------------------------------------------------------------------

/// Index backed by a B-tree v2 with chunk records (types 10 and 11).
pub struct BTreeV2Index {
    lookup: ChunkLookup,
}

impl ChunkIndex for BTreeV2Index {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl BTreeV2Index {
    /// Read a chunk B-tree v2 rooted at `header_address`.
    ///
    /// Type 10 records hold an address plus scaled (grid) coordinates;
    /// type 11 records add the on-disk size and filter mask.
    pub fn read(
        file_data: &[u8],
        header_address: u64,
        dims: &[u64],
        chunk_dims: &[u32],
        elem_size: u32,
        offset_size: u8,
        length_size: u8,
    ) -> Result<BTreeV2Index, FormatError> {
        let header =
            BTreeV2Header::parse(file_data, header_address as usize, offset_size, length_size)?;
        if header.tree_type != 10 && header.tree_type != 11 {
            return Err(FormatError::InvalidChunkIndex(format!(
                "unexpected B-tree v2 record type {} for chunk index",
                header.tree_type
            )));
        }

        let rank = dims.len();
        let os = offset_size as usize;
        let chunk_bytes: u64 = chunk_dims.iter().map(|&d| d as u64).product::<u64>()
            * elem_size as u64;

        let records = btree_v2::collect_records(file_data, &header, offset_size)?;
        let mut lookup = ChunkLookup::with_capacity(records.len());
        for record in records {
            let (address, size, filter_mask, coords_at) = if header.tree_type == 10 {
                let address = read_uint(&record, 0, offset_size)?;
                (address, chunk_bytes as u32, 0u32, os)
            } else {
                let size_width = (header.record_size as usize)
                    .checked_sub(os + 4 + 8 * rank)
                    .filter(|w| (1..=8usize).contains(w))
                    .ok_or_else(|| {
                        FormatError::InvalidChunkIndex(
                            "filtered chunk record size inconsistent with rank".into(),
                        )
                    })?;
                let address = read_uint(&record, 0, offset_size)?;
                let size = read_var_uint(&record, os, size_width)?;
                let mask = LittleEndian::read_u32(
                    &record[os + size_width..os + size_width + 4],
                );
                (address, size as u32, mask, os + size_width + 4)
            };

            ensure_len(&record, coords_at, 8 * rank)?;
            let mut offset = Vec::with_capacity(rank);
            for d in 0..rank {
                let scaled =
                    LittleEndian::read_u64(&record[coords_at + d * 8..coords_at + d * 8 + 8]);
                offset.push(scaled * chunk_dims[d] as u64);
            }

            insert_chunk(
                &mut lookup,
                Chunk {
                    offset,
                    address,
                    size,
                    filter_mask,
                },
            );
        }
        Ok(BTreeV2Index { lookup })
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// An index with no chunks, used for datasets whose storage was never
/// allocated.
pub struct EmptyIndex {
    lookup: ChunkLookup,
}

impl ChunkIndex for EmptyIndex {
    fn chunk_lookup(&self) -> &ChunkLookup {
        &self.lookup
    }
}

impl Default for EmptyIndex {
    fn default() -> Self {
        EmptyIndex {
            lookup: ChunkLookup::new(),
        }
    }
}

/// Build the chunk index named by a chunked [`DataLayout`].
///
/// `dims` are the dataset dimensions and `elem_size` the element size in
/// bytes. Returns an [`EmptyIndex`] when the layout's index address is
/// undefined (no chunks ever written).
pub fn build_chunk_index(
    file_data: &[u8],
    layout: &DataLayout,
    dims: &[u64],
    elem_size: u32,
    offset_size: u8,
    length_size: u8,
) -> Result<Box<dyn ChunkIndex + Send + Sync>, FormatError> {
    let DataLayout::Chunked {
        chunk_dimensions,
        index_address,
        version,
        index_type,
        single_chunk_filtered_size,
        single_chunk_filter_mask,
    } = layout
    else {
        return Err(FormatError::InvalidChunkIndex(
            "layout is not chunked".into(),
        ));
    };

    let address = match index_address {
        Some(addr) => *addr,
        None => return Ok(Box::new(EmptyIndex::default())),
    };

    let rank = dims.len();
    let spatial: Vec<u32> = chunk_dimensions
        .get(..rank)
        .ok_or_else(|| {
            FormatError::InvalidChunkIndex(format!(
                "chunk dimensionality {} below dataset rank {rank}",
                chunk_dimensions.len()
            ))
        })?
        .to_vec();

    match (version, index_type) {
        (3, _) => Ok(Box::new(BTreeV1Index::read(
            file_data,
            address,
            rank,
            offset_size,
        )?)),
        (4, Some(1)) => {
            let chunk_bytes: u64 = spatial.iter().map(|&d| d as u64).product::<u64>()
                * elem_size as u64;
            let filtered =
                (*single_chunk_filtered_size).zip(*single_chunk_filter_mask);
            Ok(Box::new(SingleChunkIndex::read(
                address,
                rank,
                chunk_bytes,
                filtered,
            )))
        }
        (4, Some(2)) => Ok(Box::new(ImplicitIndex::read(
            address, dims, &spatial, elem_size,
        ))),
        (4, Some(3)) => Ok(Box::new(FixedArrayIndex::read(
            file_data,
            address,
            dims,
            &spatial,
            elem_size,
            offset_size,
            length_size,
        )?)),
        (4, Some(4)) => Ok(Box::new(ExtensibleArrayIndex::read(
            file_data,
            address,
            dims,
            &spatial,
            elem_size,
            offset_size,
            length_size,
        )?)),
        (4, Some(5)) => Ok(Box::new(BTreeV2Index::read(
            file_data,
            address,
            dims,
            &spatial,
            elem_size,
            offset_size,
            length_size,
        )?)),
        (v, t) => Err(FormatError::UnsupportedChunkIndex {
            version: *v,
            index_type: *t,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_u64(buf: &mut Vec<u8>, val: u64) {
        buf.extend_from_slice(&val.to_le_bytes());
    }

    /// Build a B-tree v1 type-1 leaf holding the given chunks.
    pub(crate) fn build_chunk_btree_leaf(chunks: &[Chunk], rank: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"TREE");
        buf.push(1); // node type: raw data chunks
        buf.push(0); // leaf
        buf.extend_from_slice(&(chunks.len() as u16).to_le_bytes());
        write_u64(&mut buf, u64::MAX); // left sibling
        write_u64(&mut buf, u64::MAX); // right sibling
        for chunk in chunks {
            buf.extend_from_slice(&chunk.size.to_le_bytes());
            buf.extend_from_slice(&chunk.filter_mask.to_le_bytes());
            for d in 0..=rank {
                write_u64(&mut buf, chunk.offset.get(d).copied().unwrap_or(0));
            }
            write_u64(&mut buf, chunk.address);
        }
        // Final bounding key.
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        for _ in 0..=rank {
            write_u64(&mut buf, u64::MAX);
        }
        buf
    }

    fn chunk(offset: Vec<u64>, address: u64, size: u32) -> Chunk {
        Chunk {
            offset,
            address,
            size,
            filter_mask: 0,
        }
    }

    #[test]
    fn btree_v1_leaf() {
        let chunks = vec![
            chunk(vec![0, 0], 0x1000, 80),
            chunk(vec![0, 2], 0x2000, 80),
            chunk(vec![2, 0], 0x3000, 80),
        ];
        let tree = build_chunk_btree_leaf(&chunks, 2);
        let mut file = vec![0u8; 0x800];
        file[..tree.len()].copy_from_slice(&tree);

        let index = BTreeV1Index::read(&file, 0, 2, 8).unwrap();
        assert_eq!(index.chunk_lookup().len(), 3);
        assert_eq!(index.chunk_lookup()[&vec![0, 2]].address, 0x2000);
        assert!(!index.chunk_lookup().contains_key(&vec![2, 2]));
    }

    #[test]
    fn btree_v1_internal_recurses() {
        let left = build_chunk_btree_leaf(&[chunk(vec![0], 0x1000, 40)], 1);
        let right = build_chunk_btree_leaf(&[chunk(vec![5], 0x2000, 40)], 1);
        let left_off = 0x100usize;
        let right_off = 0x200usize;

        // Internal node: same key size, children point at the leaves.
        let mut root = Vec::new();
        root.extend_from_slice(b"TREE");
        root.push(1);
        root.push(1); // level 1
        root.extend_from_slice(&2u16.to_le_bytes());
        write_u64(&mut root, u64::MAX);
        write_u64(&mut root, u64::MAX);
        for &(key0, addr) in &[(0u64, left_off as u64), (5u64, right_off as u64)] {
            root.extend_from_slice(&0u32.to_le_bytes());
            root.extend_from_slice(&0u32.to_le_bytes());
            write_u64(&mut root, key0);
            write_u64(&mut root, 0);
            write_u64(&mut root, addr);
        }
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        write_u64(&mut root, u64::MAX);
        write_u64(&mut root, u64::MAX);
        let root_off = 0x300usize;

        let mut file = vec![0u8; 0x400];
        file[left_off..left_off + left.len()].copy_from_slice(&left);
        file[right_off..right_off + right.len()].copy_from_slice(&right);
        file[root_off..root_off + root.len()].copy_from_slice(&root);

        let index = BTreeV1Index::read(&file, root_off as u64, 1, 8).unwrap();
        assert_eq!(index.chunk_lookup().len(), 2);
        assert_eq!(index.chunk_lookup()[&vec![0]].address, 0x1000);
        assert_eq!(index.chunk_lookup()[&vec![5]].address, 0x2000);
    }

    #[test]
    fn btree_v1_empty() {
        let tree = build_chunk_btree_leaf(&[], 1);
        let mut file = vec![0u8; 0x200];
        file[..tree.len()].copy_from_slice(&tree);
        let index = BTreeV1Index::read(&file, 0, 1, 8).unwrap();
        assert!(index.chunk_lookup().is_empty());
    }

    #[test]
    fn btree_v1_wrong_node_type() {
        let mut tree = build_chunk_btree_leaf(&[], 1);
        tree[4] = 0;
        let mut file = vec![0u8; 0x200];
        file[..tree.len()].copy_from_slice(&tree);
        assert_eq!(
            BTreeV1Index::read(&file, 0, 1, 8).err(),
            Some(FormatError::InvalidBTreeNodeType(0))
        );
    }

    #[test]
    fn single_chunk() {
        let index = SingleChunkIndex::read(0x4000, 2, 96, None);
        let lookup = index.chunk_lookup();
        assert_eq!(lookup.len(), 1);
        let c = &lookup[&vec![0, 0]];
        assert_eq!(c.address, 0x4000);
        assert_eq!(c.size, 96);
        assert_eq!(c.filter_mask, 0);
    }

    #[test]
    fn single_chunk_filtered() {
        let index = SingleChunkIndex::read(0x4000, 1, 96, Some((33, 0)));
        assert_eq!(index.chunk_lookup()[&vec![0]].size, 33);
    }

    #[test]
    fn implicit_grid() {
        // 10x6 dataset, 4x3 chunks => 3x2 grid.
        let index = ImplicitIndex::read(0x2000, &[10, 6], &[4, 3], 4);
        let lookup = index.chunk_lookup();
        assert_eq!(lookup.len(), 6);
        let bytes_per_chunk = 4 * 3 * 4u64;
        for (i, offset) in [
            vec![0u64, 0],
            vec![0, 3],
            vec![4, 0],
            vec![4, 3],
            vec![8, 0],
            vec![8, 3],
        ]
        .iter()
        .enumerate()
        {
            let c = &lookup[offset];
            assert_eq!(c.address, 0x2000 + i as u64 * bytes_per_chunk);
            assert_eq!(c.size, bytes_per_chunk as u32);
        }
    }

    fn build_fixed_array(
        entries: &[Option<u64>],
        client_id: u8,
        entry_size: u8,
        filtered: &[(u64, u32)],
    ) -> Vec<u8> {
        let mut file = vec![0u8; 0x1000];
        let db_addr = 0x200u64;

        // Header at 0.
        let mut hdr = Vec::new();
        hdr.extend_from_slice(b"FAHD");
        hdr.push(0);
        hdr.push(client_id);
        hdr.push(entry_size);
        hdr.push(10); // page bits: large enough to stay non-paged
        write_u64(&mut hdr, entries.len() as u64);
        write_u64(&mut hdr, db_addr);
        hdr.extend_from_slice(&0u32.to_le_bytes());
        file[..hdr.len()].copy_from_slice(&hdr);

        // Data block.
        let mut db = Vec::new();
        db.extend_from_slice(b"FADB");
        db.push(0);
        db.push(client_id);
        write_u64(&mut db, 0); // back-pointer to header
        for (i, entry) in entries.iter().enumerate() {
            match entry {
                None => {
                    if client_id == 0 {
                        write_u64(&mut db, u64::MAX);
                    } else {
                        db.extend_from_slice(&vec![0xFF; entry_size as usize]);
                    }
                }
                Some(addr) => {
                    write_u64(&mut db, *addr);
                    if client_id == 1 {
                        let (size, mask) = filtered[i];
                        let size_width = entry_size as usize - 8 - 4;
                        db.extend_from_slice(&size.to_le_bytes()[..size_width]);
                        db.extend_from_slice(&mask.to_le_bytes());
                    }
                }
            }
        }
        file[db_addr as usize..db_addr as usize + db.len()].copy_from_slice(&db);
        file
    }

    #[test]
    fn fixed_array_unfiltered() {
        // 1D dataset of 25 elements, chunks of 10 => 3 entries.
        let file = build_fixed_array(&[Some(0x400), Some(0x500), Some(0x600)], 0, 8, &[]);
        let index = FixedArrayIndex::read(&file, 0, &[25], &[10], 8, 8, 8).unwrap();
        let lookup = index.chunk_lookup();
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup[&vec![0]].address, 0x400);
        assert_eq!(lookup[&vec![10]].address, 0x500);
        assert_eq!(lookup[&vec![20]].address, 0x600);
        assert_eq!(lookup[&vec![0]].size, 80);
    }

    #[test]
    fn fixed_array_skips_unallocated() {
        let file = build_fixed_array(&[Some(0x400), None, Some(0x600)], 0, 8, &[]);
        let index = FixedArrayIndex::read(&file, 0, &[25], &[10], 8, 8, 8).unwrap();
        assert_eq!(index.chunk_lookup().len(), 2);
        assert!(!index.chunk_lookup().contains_key(&vec![10]));
    }

    #[test]
    fn fixed_array_filtered_entries() {
        // entry_size = addr(8) + size(4) + mask(4) = 16
        let file = build_fixed_array(
            &[Some(0x400), Some(0x500)],
            1,
            16,
            &[(70, 0), (55, 0b1)],
        );
        let index = FixedArrayIndex::read(&file, 0, &[20], &[10], 8, 8, 8).unwrap();
        let lookup = index.chunk_lookup();
        assert_eq!(lookup[&vec![0]].size, 70);
        assert_eq!(lookup[&vec![10]].size, 55);
        assert_eq!(lookup[&vec![10]].filter_mask, 0b1);
    }

    #[test]
    fn extensible_array_inline_elements() {
        let mut file = vec![0u8; 0x1000];
        let ib_addr = 0x300u64;

        let mut hdr = Vec::new();
        hdr.extend_from_slice(b"EAHD");
        hdr.push(0); // version
        hdr.push(0); // client id: unfiltered
        hdr.push(8); // entry size
        hdr.push(10); // max_nelmts_bits
        hdr.push(4); // index block elements
        hdr.push(4); // min data block elements
        hdr.push(2); // super block min elements
        hdr.push(10); // max dblk nelmts bits
        for stat in [0u64, 0, 0, 0, 3, 0] {
            write_u64(&mut hdr, stat); // stats; fifth is nelmts
        }
        write_u64(&mut hdr, ib_addr);
        hdr.extend_from_slice(&0u32.to_le_bytes());
        file[..hdr.len()].copy_from_slice(&hdr);

        let mut ib = Vec::new();
        ib.extend_from_slice(b"EAIB");
        ib.push(0);
        ib.push(0);
        write_u64(&mut ib, 0); // back-pointer
        for addr in [0x400u64, 0x500, 0x600] {
            write_u64(&mut ib, addr);
        }
        file[ib_addr as usize..ib_addr as usize + ib.len()].copy_from_slice(&ib);

        let index = ExtensibleArrayIndex::read(&file, 0, &[30], &[10], 8, 8, 8).unwrap();
        let lookup = index.chunk_lookup();
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup[&vec![20]].address, 0x600);
        assert_eq!(lookup[&vec![0]].size, 80);
    }

    #[test]
    fn btree_v2_unfiltered_records() {
        use crate::btree_v2::tests::{build_header, build_leaf};

        // 2D dataset 4x4, chunks 2x2; record: addr(8) + 2 scaled coords.
        let rank = 2;
        let record_size = (8 + 8 * rank) as u16;
        let mut records = Vec::new();
        for (addr, scaled) in [(0x400u64, [0u64, 0]), (0x500, [0, 1]), (0x600, [1, 0])] {
            let mut r = Vec::new();
            write_u64(&mut r, addr);
            write_u64(&mut r, scaled[0]);
            write_u64(&mut r, scaled[1]);
            records.push(r);
        }
        let record_refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let leaf = build_leaf(10, &record_refs);
        let leaf_off = 0x200usize;
        let header = build_header(10, record_size, 0, leaf_off as u64, 3, 3);

        let mut file = vec![0u8; 0x800];
        file[..header.len()].copy_from_slice(&header);
        file[leaf_off..leaf_off + leaf.len()].copy_from_slice(&leaf);

        let index = BTreeV2Index::read(&file, 0, &[4, 4], &[2, 2], 1, 8, 8).unwrap();
        let lookup = index.chunk_lookup();
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup[&vec![0, 0]].address, 0x400);
        assert_eq!(lookup[&vec![0, 2]].address, 0x500);
        assert_eq!(lookup[&vec![2, 0]].address, 0x600);
        assert_eq!(lookup[&vec![0, 0]].size, 4);
    }

    #[test]
    fn dispatch_empty_when_unallocated() {
        let layout = DataLayout::Chunked {
            chunk_dimensions: vec![10, 8],
            index_address: None,
            version: 3,
            index_type: None,
            single_chunk_filtered_size: None,
            single_chunk_filter_mask: None,
        };
        let index = build_chunk_index(&[], &layout, &[100], 8, 8, 8).unwrap();
        assert!(index.chunk_lookup().is_empty());
    }

    #[test]
    fn dispatch_rejects_unknown_index_type() {
        let layout = DataLayout::Chunked {
            chunk_dimensions: vec![10, 8],
            index_address: Some(0),
            version: 4,
            index_type: Some(9),
            single_chunk_filtered_size: None,
            single_chunk_filter_mask: None,
        };
        assert_eq!(
            build_chunk_index(&[], &layout, &[100], 8, 8, 8).err(),
            Some(FormatError::UnsupportedChunkIndex {
                version: 4,
                index_type: Some(9)
            })
        );
    }
}
