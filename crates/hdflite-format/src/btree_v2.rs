//! HDF5 B-tree v2 node traversal.
//!
//! Collects raw fixed-size records from a v2 B-tree; record decoding is up
//! to the caller (the B-tree v2 chunk index).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::util::{ensure_len, read_uint, read_var_uint};

/// Parsed B-tree v2 header (signature `BTHD`).
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeV2Header {
    /// Record type: 5/6 = links, 10 = non-filtered chunks, 11 = filtered
    /// chunks.
    pub tree_type: u8,
    /// Node size in bytes.
    pub node_size: u32,
    /// Record size in bytes.
    pub record_size: u16,
    /// Tree depth (0 = the root is a leaf).
    pub depth: u16,
    /// Address of the root node.
    pub root_node_address: u64,
    /// Number of records in the root node.
    pub num_records_in_root: u16,
    /// Total number of records in the tree.
    pub total_records: u64,
}

impl BTreeV2Header {
    /// Parse a B-tree v2 header at `offset`.
    pub fn parse(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<BTreeV2Header, FormatError> {
        ensure_len(data, offset, 16)?;
        if &data[offset..offset + 4] != b"BTHD" {
            return Err(FormatError::InvalidBTreeV2Signature);
        }
        let version = data[offset + 4];
        if version != 0 {
            return Err(FormatError::InvalidBTreeV2Version(version));
        }

        let tree_type = data[offset + 5];
        let node_size = LittleEndian::read_u32(&data[offset + 6..offset + 10]);
        let record_size = LittleEndian::read_u16(&data[offset + 10..offset + 12]);
        let depth = LittleEndian::read_u16(&data[offset + 12..offset + 14]);
        // split percent(1) + merge percent(1) at offset+14.

        let mut pos = offset + 16;
        let root_node_address = read_uint(data, pos, offset_size)?;
        pos += offset_size as usize;
        ensure_len(data, pos, 2)?;
        let num_records_in_root = LittleEndian::read_u16(&data[pos..pos + 2]);
        pos += 2;
        let total_records = read_uint(data, pos, length_size)?;

        Ok(BTreeV2Header {
            tree_type,
            node_size,
            record_size,
            depth,
            root_node_address,
            num_records_in_root,
            total_records,
        })
    }
}

/// Collect all raw records by traversing the tree from the root, in key
/// order.
pub fn collect_records(
    data: &[u8],
    header: &BTreeV2Header,
    offset_size: u8,
) -> Result<Vec<Vec<u8>>, FormatError> {
    if header.total_records == 0 || header.num_records_in_root == 0 {
        return Ok(Vec::new());
    }

    let max_leaf_records = max_records_in_leaf(header.node_size, header.record_size);
    let mut records = Vec::with_capacity(header.total_records as usize);

    if header.depth == 0 {
        collect_leaf(
            data,
            header.root_node_address as usize,
            header.num_records_in_root,
            header.record_size,
            &mut records,
        )?;
    } else {
        collect_internal(
            data,
            header.root_node_address as usize,
            header.num_records_in_root,
            header.depth,
            header.record_size,
            offset_size,
            max_leaf_records,
            &mut records,
        )?;
    }
    Ok(records)
}

/// Records that fit a leaf node: signature(4) + version(1) + type(1) +
/// checksum(4) leaves node_size - 10 bytes of record space.
fn max_records_in_leaf(node_size: u32, record_size: u16) -> u64 {
    if node_size <= 10 || record_size == 0 {
        return 0;
    }
    ((node_size - 10) / record_size as u32) as u64
}

/// Width in bytes of a count field bounded by `max_count`.
fn count_field_width(max_count: u64) -> usize {
    if max_count == 0 {
        return 1;
    }
    let bits = 64 - max_count.leading_zeros() as usize;
    bits.div_ceil(8)
}

fn collect_leaf(
    data: &[u8],
    offset: usize,
    num_records: u16,
    record_size: u16,
    out: &mut Vec<Vec<u8>>,
) -> Result<(), FormatError> {
    ensure_len(data, offset, 6)?;
    if &data[offset..offset + 4] != b"BTLF" {
        return Err(FormatError::InvalidBTreeV2Signature);
    }
    let rs = record_size as usize;
    let pos = offset + 6;
    ensure_len(data, pos, num_records as usize * rs)?;
    for i in 0..num_records as usize {
        out.push(data[pos + i * rs..pos + (i + 1) * rs].to_vec());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn collect_internal(
    data: &[u8],
    offset: usize,
    num_records: u16,
    depth: u16,
    record_size: u16,
    offset_size: u8,
    max_leaf_records: u64,
    out: &mut Vec<Vec<u8>>,
) -> Result<(), FormatError> {
    ensure_len(data, offset, 6)?;
    if &data[offset..offset + 4] != b"BTIN" {
        return Err(FormatError::InvalidBTreeV2Signature);
    }

    let nr = num_records as usize;
    let rs = record_size as usize;
    let records_start = offset + 6;
    ensure_len(data, records_start, nr * rs)?;
    let mut pos = records_start + nr * rs;

    // Child pointer: address + record count (+ total count below depth 1).
    let child_depth = depth - 1;
    let max_child_records = if child_depth == 0 {
        max_leaf_records
    } else {
        max_leaf_records.saturating_mul(2)
    };
    let count_width = count_field_width(max_child_records);
    let total_width = if depth > 1 {
        count_field_width(subtree_record_bound(max_leaf_records, child_depth))
    } else {
        0
    };

    let mut children = Vec::with_capacity(nr + 1);
    for _ in 0..=nr {
        let addr = read_uint(data, pos, offset_size)?;
        pos += offset_size as usize;
        let child_records = read_var_uint(data, pos, count_width)? as u16;
        pos += count_width + total_width;
        children.push((addr, child_records));
    }

    // Child and record order interleaves: child[0], record[0], child[1], ...
    for (i, &(child_addr, child_records)) in children.iter().enumerate() {
        if child_depth == 0 {
            collect_leaf(data, child_addr as usize, child_records, record_size, out)?;
        } else {
            collect_internal(
                data,
                child_addr as usize,
                child_records,
                child_depth,
                record_size,
                offset_size,
                max_leaf_records,
                out,
            )?;
        }
        if i < nr {
            let start = records_start + i * rs;
            out.push(data[start..start + rs].to_vec());
        }
    }
    Ok(())
}

/// Loose upper bound on records in a subtree of the given depth, used only
/// to size the variable-width count fields.
fn subtree_record_bound(max_leaf_records: u64, depth: u16) -> u64 {
    let mut total = max_leaf_records;
    for _ in 0..depth {
        total = total.saturating_mul(max_leaf_records.max(2));
    }
    total
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_header(
        tree_type: u8,
        record_size: u16,
        depth: u16,
        root_addr: u64,
        num_root: u16,
        total: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BTHD");
        buf.push(0);
        buf.push(tree_type);
        buf.extend_from_slice(&512u32.to_le_bytes()); // node size
        buf.extend_from_slice(&record_size.to_le_bytes());
        buf.extend_from_slice(&depth.to_le_bytes());
        buf.push(85); // split percent
        buf.push(40); // merge percent
        buf.extend_from_slice(&root_addr.to_le_bytes());
        buf.extend_from_slice(&num_root.to_le_bytes());
        buf.extend_from_slice(&total.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // checksum
        buf
    }

    pub(crate) fn build_leaf(tree_type: u8, records: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BTLF");
        buf.push(0);
        buf.push(tree_type);
        for rec in records {
            buf.extend_from_slice(rec);
        }
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf
    }

    #[test]
    fn header_fields() {
        let data = build_header(10, 16, 0, 0x1000, 3, 3);
        let hdr = BTreeV2Header::parse(&data, 0, 8, 8).unwrap();
        assert_eq!(hdr.tree_type, 10);
        assert_eq!(hdr.record_size, 16);
        assert_eq!(hdr.depth, 0);
        assert_eq!(hdr.root_node_address, 0x1000);
        assert_eq!(hdr.total_records, 3);
    }

    #[test]
    fn root_leaf_records() {
        let r1 = [1u8; 16];
        let r2 = [2u8; 16];
        let leaf = build_leaf(10, &[&r1, &r2]);
        let leaf_offset = 128usize;
        let header = build_header(10, 16, 0, leaf_offset as u64, 2, 2);

        let mut file = vec![0u8; 512];
        file[..header.len()].copy_from_slice(&header);
        file[leaf_offset..leaf_offset + leaf.len()].copy_from_slice(&leaf);

        let hdr = BTreeV2Header::parse(&file, 0, 8, 8).unwrap();
        let records = collect_records(&file, &hdr, 8).unwrap();
        assert_eq!(records, vec![r1.to_vec(), r2.to_vec()]);
    }

    #[test]
    fn one_level_internal() {
        // Internal root with one record separating two leaves.
        let rs = 16u16;
        let l1 = build_leaf(10, &[&[1u8; 16][..], &[2u8; 16][..]]);
        let l2 = build_leaf(10, &[&[4u8; 16][..]]);
        let l1_off = 0x100usize;
        let l2_off = 0x200usize;

        let max_leaf = max_records_in_leaf(512, rs);
        let count_width = count_field_width(max_leaf);

        let mut root = Vec::new();
        root.extend_from_slice(b"BTIN");
        root.push(0);
        root.push(10);
        root.extend_from_slice(&[3u8; 16]); // separating record
        // child pointers: addr + record count
        root.extend_from_slice(&(l1_off as u64).to_le_bytes());
        root.extend_from_slice(&2u64.to_le_bytes()[..count_width]);
        root.extend_from_slice(&(l2_off as u64).to_le_bytes());
        root.extend_from_slice(&1u64.to_le_bytes()[..count_width]);
        root.extend_from_slice(&0u32.to_le_bytes());
        let root_off = 0x300usize;

        let header = build_header(10, rs, 1, root_off as u64, 1, 3);
        let mut file = vec![0u8; 0x400];
        file[..header.len()].copy_from_slice(&header);
        file[l1_off..l1_off + l1.len()].copy_from_slice(&l1);
        file[l2_off..l2_off + l2.len()].copy_from_slice(&l2);
        file[root_off..root_off + root.len()].copy_from_slice(&root);

        let hdr = BTreeV2Header::parse(&file, 0, 8, 8).unwrap();
        let records = collect_records(&file, &hdr, 8).unwrap();
        assert_eq!(
            records,
            vec![
                [1u8; 16].to_vec(),
                [2u8; 16].to_vec(),
                [3u8; 16].to_vec(),
                [4u8; 16].to_vec(),
            ]
        );
    }

    #[test]
    fn empty_tree() {
        let data = build_header(10, 16, 0, u64::MAX, 0, 0);
        let hdr = BTreeV2Header::parse(&data, 0, 8, 8).unwrap();
        assert!(collect_records(&data, &hdr, 8).unwrap().is_empty());
    }

    #[test]
    fn bad_signature() {
        let mut data = build_header(10, 16, 0, 0, 0, 0);
        data[1] = b'X';
        assert_eq!(
            BTreeV2Header::parse(&data, 0, 8, 8),
            Err(FormatError::InvalidBTreeV2Signature)
        );
    }

    #[test]
    fn bad_version() {
        let mut data = build_header(10, 16, 0, 0, 0, 0);
        data[4] = 3;
        assert_eq!(
            BTreeV2Header::parse(&data, 0, 8, 8),
            Err(FormatError::InvalidBTreeV2Version(3))
        );
    }
}
