//! Group navigation: symbol-table (old-style) and link-message (new-style)
//! groups, plus `/`-separated path resolution.
//!
//! Old-style groups index their children through a B-tree v1 of symbol
//! table nodes, with names in a local heap. New-style groups carry link
//! messages directly in the object header (compact storage). Dense link
//! storage (fractal heap + B-tree v2) is not supported and fails with
//! [`FormatError::UnsupportedDenseGroup`].

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::superblock::Superblock;
use crate::util::{ensure_len, read_uint};

/// A resolved group child: name plus object header address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Name of the child object.
    pub name: String,
    /// Address of the child's object header.
    pub address: u64,
}

// ---------------------------------------------------------------------------
// Old-style groups: local heap + B-tree v1 + SNOD
// ---------------------------------------------------------------------------

/// Symbol Table message (type 0x0011): the B-tree and heap addresses of an
/// old-style group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    /// Address of the group's B-tree v1 (node type 0).
    pub btree_address: u64,
    /// Address of the group's local heap.
    pub heap_address: u64,
}

impl SymbolTable {
    /// Parse a symbol table message from raw message bytes.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<SymbolTable, FormatError> {
        let os = offset_size as usize;
        Ok(SymbolTable {
            btree_address: read_uint(data, 0, offset_size)?,
            heap_address: read_uint(data, os, offset_size)?,
        })
    }
}

/// Local heap header: locates the data segment holding link names.
struct LocalHeap {
    segment_address: u64,
    segment_size: u64,
}

impl LocalHeap {
    fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<LocalHeap, FormatError> {
        let ls = length_size as usize;
        ensure_len(file_data, offset, 8 + ls * 2 + offset_size as usize)?;
        if &file_data[offset..offset + 4] != b"HEAP" {
            return Err(FormatError::InvalidLocalHeap);
        }
        if file_data[offset + 4] != 0 {
            return Err(FormatError::InvalidLocalHeapVersion(file_data[offset + 4]));
        }
        let segment_size = read_uint(file_data, offset + 8, length_size)?;
        // The free list offset sits between size and address.
        let segment_address = read_uint(file_data, offset + 8 + ls * 2, offset_size)?;
        Ok(LocalHeap {
            segment_address,
            segment_size,
        })
    }

    /// Read the null-terminated string at `name_offset` in the data
    /// segment.
    fn read_name(&self, file_data: &[u8], name_offset: u64) -> Result<String, FormatError> {
        let start = (self.segment_address as usize)
            .checked_add(name_offset as usize)
            .ok_or(FormatError::InvalidLocalHeap)?;
        let segment_end = (self.segment_address + self.segment_size) as usize;
        let end = segment_end.min(file_data.len());
        if start >= end {
            return Err(FormatError::InvalidLocalHeap);
        }
        let terminator = file_data[start..end]
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::InvalidLocalHeap)?;
        std::str::from_utf8(&file_data[start..start + terminator])
            .map(String::from)
            .map_err(|_| FormatError::InvalidLocalHeap)
    }
}

/// Collect the SNOD addresses under a group B-tree (node type 0).
fn collect_symbol_nodes(
    file_data: &[u8],
    btree_address: u64,
    offset_size: u8,
    out: &mut Vec<u64>,
) -> Result<(), FormatError> {
    let offset = btree_address as usize;
    let os = offset_size as usize;
    ensure_len(file_data, offset, 8 + os * 2)?;
    if &file_data[offset..offset + 4] != b"TREE" {
        return Err(FormatError::InvalidBTreeSignature);
    }
    if file_data[offset + 4] != 0 {
        return Err(FormatError::InvalidBTreeNodeType(file_data[offset + 4]));
    }
    let level = file_data[offset + 5];
    let entries = LittleEndian::read_u16(&file_data[offset + 6..offset + 8]) as usize;

    // Keys are heap name offsets, one offset_size each, interleaved with
    // the child addresses.
    let mut pos = offset + 8 + os * 2;
    ensure_len(file_data, pos, entries * os * 2 + os)?;

    let mut children = Vec::with_capacity(entries);
    for _ in 0..entries {
        pos += os; // key
        children.push(read_uint(file_data, pos, offset_size)?);
        pos += os;
    }

    for child in children {
        if level == 0 {
            out.push(child);
        } else {
            collect_symbol_nodes(file_data, child, offset_size, out)?;
        }
    }
    Ok(())
}

/// Resolve the children of an old-style group.
pub fn symbol_table_entries(
    file_data: &[u8],
    table: &SymbolTable,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<GroupEntry>, FormatError> {
    let heap = LocalHeap::parse(
        file_data,
        table.heap_address as usize,
        offset_size,
        length_size,
    )?;

    let mut snod_addresses = Vec::new();
    collect_symbol_nodes(file_data, table.btree_address, offset_size, &mut snod_addresses)?;

    let os = offset_size as usize;
    // Entry: name offset + header address + cache type(4) + reserved(4)
    // + scratch(16).
    let entry_size = os * 2 + 24;

    let mut entries = Vec::new();
    for snod in snod_addresses {
        let offset = snod as usize;
        ensure_len(file_data, offset, 8)?;
        if &file_data[offset..offset + 4] != b"SNOD" {
            return Err(FormatError::InvalidSymbolTableSignature);
        }
        if file_data[offset + 4] != 1 {
            return Err(FormatError::InvalidSymbolTableVersion(file_data[offset + 4]));
        }
        let count = LittleEndian::read_u16(&file_data[offset + 6..offset + 8]) as usize;
        ensure_len(file_data, offset + 8, count * entry_size)?;

        let mut pos = offset + 8;
        for _ in 0..count {
            let name_offset = read_uint(file_data, pos, offset_size)?;
            let address = read_uint(file_data, pos + os, offset_size)?;
            entries.push(GroupEntry {
                name: heap.read_name(file_data, name_offset)?,
                address,
            });
            pos += entry_size;
        }
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// New-style groups: link info + link messages
// ---------------------------------------------------------------------------

/// Link Info message (type 0x0002): tells compact and dense link storage
/// apart. A defined fractal heap address means the group's links live in a
/// fractal heap indexed by B-tree v2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Address of the fractal heap for dense storage, when defined.
    pub fractal_heap_address: Option<u64>,
}

impl LinkInfo {
    /// Parse a link info message from raw message bytes.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkInfo, FormatError> {
        ensure_len(data, 0, 2)?;
        if data[0] != 0 {
            return Err(FormatError::InvalidLinkInfoVersion(data[0]));
        }
        let flags = data[1];

        let mut pos = 2;
        // Maximum creation index (flags bit 0).
        if flags & 0x01 != 0 {
            pos += 8;
        }

        let os = offset_size as usize;
        ensure_len(data, pos, os)?;
        let defined = !data[pos..pos + os].iter().all(|&b| b == 0xFF);
        let address = read_uint(data, pos, offset_size)?;
        // The name-index B-tree v2 address (and optionally a
        // creation-order index address) follow; the heap address alone
        // decides the storage kind.

        Ok(LinkInfo {
            fractal_heap_address: defined.then_some(address),
        })
    }
}

/// Decode the hard-link entries among a header's link messages. Soft and
/// external links are skipped during traversal.
fn link_entries(
    header: &ObjectHeader,
    offset_size: u8,
) -> Result<Vec<GroupEntry>, FormatError> {
    let mut entries = Vec::new();
    for msg in &header.messages {
        if msg.msg_type != MessageType::Link {
            continue;
        }
        if let Some(entry) = parse_hard_link(&msg.data, offset_size)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Parse a link message, returning its entry for hard links and `None`
/// otherwise.
fn parse_hard_link(data: &[u8], offset_size: u8) -> Result<Option<GroupEntry>, FormatError> {
    ensure_len(data, 0, 2)?;
    if data[0] != 1 {
        return Err(FormatError::InvalidLinkVersion(data[0]));
    }
    let flags = data[1];
    // Flag bits 0-1 give the width of the name length field.
    let name_width = 1u8 << (flags & 0x03);
    let mut pos = 2;

    let link_type = if flags & 0x08 != 0 {
        ensure_len(data, pos, 1)?;
        let t = data[pos];
        pos += 1;
        t
    } else {
        0 // hard link
    };
    if flags & 0x04 != 0 {
        pos += 8; // creation order
    }
    if flags & 0x10 != 0 {
        pos += 1; // character set
    }

    let name_len = read_uint(data, pos, name_width)? as usize;
    pos += name_width as usize;
    ensure_len(data, pos, name_len)?;
    let name = String::from_utf8_lossy(&data[pos..pos + name_len]).into_owned();
    pos += name_len;

    match link_type {
        0 => {
            let address = read_uint(data, pos, offset_size)?;
            Ok(Some(GroupEntry { name, address }))
        }
        1 | 64 => Ok(None), // soft / external
        t => Err(FormatError::InvalidLinkType(t)),
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Resolve the children of a group object header, old- or new-style.
///
/// New-style groups whose link info points at a fractal heap store their
/// links densely; that storage is refused rather than read as empty.
pub fn group_entries(
    file_data: &[u8],
    header: &ObjectHeader,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<GroupEntry>, FormatError> {
    if let Some(msg) = header.find_message(MessageType::SymbolTable) {
        let table = SymbolTable::parse(&msg.data, offset_size)?;
        symbol_table_entries(file_data, &table, offset_size, length_size)
    } else if header.has_message(MessageType::Link)
        || header.has_message(MessageType::LinkInfo)
    {
        if let Some(msg) = header.find_message(MessageType::LinkInfo) {
            let info = LinkInfo::parse(&msg.data, offset_size)?;
            if info.fractal_heap_address.is_some() {
                return Err(FormatError::UnsupportedDenseGroup);
            }
        }
        link_entries(header, offset_size)
    } else {
        Ok(Vec::new())
    }
}

/// True if the header describes a group rather than a dataset.
pub fn is_group(header: &ObjectHeader) -> bool {
    header.has_message(MessageType::SymbolTable)
        || header.has_message(MessageType::LinkInfo)
        || (header.has_message(MessageType::Link)
            && !header.has_message(MessageType::DataLayout))
}

/// Resolve a `/`-separated path from the root group to an object header
/// address.
pub fn resolve_path(
    file_data: &[u8],
    superblock: &Superblock,
    path: &str,
) -> Result<u64, FormatError> {
    let os = superblock.offset_size;
    let ls = superblock.length_size;

    let mut address = superblock.root_group_address;
    let components = path.split('/').filter(|c| !c.is_empty());

    for component in components {
        let header = ObjectHeader::parse(file_data, address as usize, os, ls)?;
        let entries = group_entries(file_data, &header, os, ls)?;
        address = entries
            .iter()
            .find(|e| e.name == component)
            .map(|e| e.address)
            .ok_or_else(|| FormatError::PathNotFound(path.to_string()))?;
    }
    Ok(address)
}
