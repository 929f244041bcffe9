//! End-to-end reads over a hand-assembled HDF5 file: superblock, root
//! group with symbol-table storage, one contiguous and one chunked
//! dataset.

use hdflite::{DType, File};

const ROOT_HEADER: u64 = 0x60;
const GROUP_BTREE: u64 = 0x100;
const HEAP_HEADER: u64 = 0x180;
const HEAP_SEGMENT: u64 = 0x1C0;
const SNOD: u64 = 0x200;
const VALS_HEADER: u64 = 0x280;
const VALS_DATA: u64 = 0x300;
const GRID_HEADER: u64 = 0x400;
const CHUNK_BTREE: u64 = 0x500;
const CHUNK_DATA: u64 = 0x600;

fn put(file: &mut [u8], offset: u64, bytes: &[u8]) {
    let at = offset as usize;
    file[at..at + bytes.len()].copy_from_slice(bytes);
}

fn u64le(v: u64) -> [u8; 8] {
    v.to_le_bytes()
}

fn superblock_v0() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&[0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n']);
    b.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]); // versions + sizes
    b.extend_from_slice(&4u16.to_le_bytes()); // group leaf k
    b.extend_from_slice(&16u16.to_le_bytes()); // group internal k
    b.extend_from_slice(&0u32.to_le_bytes()); // consistency flags
    b.extend_from_slice(&u64le(0)); // base address
    b.extend_from_slice(&u64le(u64::MAX)); // free space
    b.extend_from_slice(&u64le(0x1000)); // eof
    b.extend_from_slice(&u64le(u64::MAX)); // driver info
    b.extend_from_slice(&u64le(0)); // root link name offset
    b.extend_from_slice(&u64le(ROOT_HEADER)); // root header address
    b.extend_from_slice(&[0u8; 24]); // cache type + reserved + scratch
    b
}

fn v1_header(messages: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (msg_type, data) in messages {
        body.extend_from_slice(&msg_type.to_le_bytes());
        body.extend_from_slice(&(data.len() as u16).to_le_bytes());
        body.extend_from_slice(&[0u8; 4]); // flags + reserved
        body.extend_from_slice(data);
    }
    let mut b = Vec::new();
    b.push(1); // version
    b.push(0);
    b.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    b.extend_from_slice(&1u32.to_le_bytes()); // reference count
    b.extend_from_slice(&(body.len() as u32).to_le_bytes());
    b.extend_from_slice(&[0u8; 4]); // pad to 8-byte alignment
    b.extend_from_slice(&body);
    b
}

fn dataspace_message(dims: &[u64]) -> Vec<u8> {
    let mut b = vec![1, dims.len() as u8, 0, 0, 0, 0, 0, 0];
    for &d in dims {
        b.extend_from_slice(&u64le(d));
    }
    b
}

fn int_datatype_message(size: u32, signed: bool, precision: u16) -> Vec<u8> {
    let bits = if signed { 0x08 } else { 0x00 };
    let mut b = vec![0x10, bits, 0, 0];
    b.extend_from_slice(&size.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&precision.to_le_bytes());
    b
}

fn contiguous_layout_message(address: u64, size: u64) -> Vec<u8> {
    let mut b = vec![3, 1];
    b.extend_from_slice(&u64le(address));
    b.extend_from_slice(&u64le(size));
    b
}

fn chunked_layout_message(btree: u64, chunk_dims: &[u32]) -> Vec<u8> {
    let mut b = vec![3, 2, chunk_dims.len() as u8];
    b.extend_from_slice(&u64le(btree));
    for &d in chunk_dims {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

/// B-tree v1 leaf of chunk records: (offset coords, address, size).
fn chunk_btree_leaf(chunks: &[(Vec<u64>, u64, u32)], rank: usize) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(b"TREE");
    b.push(1);
    b.push(0);
    b.extend_from_slice(&(chunks.len() as u16).to_le_bytes());
    b.extend_from_slice(&u64le(u64::MAX));
    b.extend_from_slice(&u64le(u64::MAX));
    for (coords, address, size) in chunks {
        b.extend_from_slice(&size.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes()); // filter mask
        for d in 0..=rank {
            b.extend_from_slice(&u64le(coords.get(d).copied().unwrap_or(0)));
        }
        b.extend_from_slice(&u64le(*address));
    }
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    for _ in 0..=rank {
        b.extend_from_slice(&u64le(u64::MAX));
    }
    b
}

fn build_test_file() -> Vec<u8> {
    let mut file = vec![0u8; 0x1000];

    put(&mut file, 0, &superblock_v0());

    // Root group: one symbol table message.
    let mut symbol_table = Vec::new();
    symbol_table.extend_from_slice(&u64le(GROUP_BTREE));
    symbol_table.extend_from_slice(&u64le(HEAP_HEADER));
    put(&mut file, ROOT_HEADER, &v1_header(&[(0x0011, symbol_table)]));

    // Group B-tree: one leaf pointing at the SNOD.
    let mut btree = Vec::new();
    btree.extend_from_slice(b"TREE");
    btree.push(0);
    btree.push(0);
    btree.extend_from_slice(&1u16.to_le_bytes());
    btree.extend_from_slice(&u64le(u64::MAX));
    btree.extend_from_slice(&u64le(u64::MAX));
    btree.extend_from_slice(&u64le(0)); // key
    btree.extend_from_slice(&u64le(SNOD));
    btree.extend_from_slice(&u64le(0)); // final key
    put(&mut file, GROUP_BTREE, &btree);

    // Local heap: names "vals" (offset 0) and "grid" (offset 8).
    let mut heap = Vec::new();
    heap.extend_from_slice(b"HEAP");
    heap.extend_from_slice(&[0u8; 4]);
    heap.extend_from_slice(&u64le(0x40)); // segment size
    heap.extend_from_slice(&u64le(0)); // free list head
    heap.extend_from_slice(&u64le(HEAP_SEGMENT));
    put(&mut file, HEAP_HEADER, &heap);
    put(&mut file, HEAP_SEGMENT, b"vals\0\0\0\0grid\0");

    // SNOD with both children.
    let mut snod = Vec::new();
    snod.extend_from_slice(b"SNOD");
    snod.push(1);
    snod.push(0);
    snod.extend_from_slice(&2u16.to_le_bytes());
    for (name_offset, address) in [(0u64, VALS_HEADER), (8, GRID_HEADER)] {
        snod.extend_from_slice(&u64le(name_offset));
        snod.extend_from_slice(&u64le(address));
        snod.extend_from_slice(&[0u8; 24]);
    }
    put(&mut file, SNOD, &snod);

    // "vals": contiguous i32 dataset of shape [4].
    put(
        &mut file,
        VALS_HEADER,
        &v1_header(&[
            (0x0001, dataspace_message(&[4])),
            (0x0003, int_datatype_message(4, true, 32)),
            (0x0008, contiguous_layout_message(VALS_DATA, 16)),
        ]),
    );
    let mut vals = Vec::new();
    for v in [10i32, 20, 30, 40] {
        vals.extend_from_slice(&v.to_le_bytes());
    }
    put(&mut file, VALS_DATA, &vals);

    // "grid": chunked u8 dataset of shape [4,4], chunks [2,2].
    put(
        &mut file,
        GRID_HEADER,
        &v1_header(&[
            (0x0001, dataspace_message(&[4, 4])),
            (0x0003, int_datatype_message(1, false, 8)),
            (0x0008, chunked_layout_message(CHUNK_BTREE, &[2, 2, 1])),
        ]),
    );
    let chunk_records: Vec<(Vec<u64>, u64, u32)> = vec![
        (vec![0, 0, 0], CHUNK_DATA, 4),
        (vec![0, 2, 0], CHUNK_DATA + 0x10, 4),
        (vec![2, 0, 0], CHUNK_DATA + 0x20, 4),
        (vec![2, 2, 0], CHUNK_DATA + 0x30, 4),
    ];
    put(&mut file, CHUNK_BTREE, &chunk_btree_leaf(&chunk_records, 2));
    for (i, payload) in [
        [0u8, 1, 2, 3],
        [4, 5, 6, 7],
        [8, 9, 10, 11],
        [12, 13, 14, 15],
    ]
    .iter()
    .enumerate()
    {
        put(&mut file, CHUNK_DATA + (i as u64) * 0x10, payload);
    }

    file
}

#[test]
fn root_group_listing() {
    let file = File::from_bytes(build_test_file()).unwrap();
    let root = file.root();
    assert_eq!(root.datasets().unwrap(), vec!["vals", "grid"]);
    assert!(root.groups().unwrap().is_empty());
}

#[test]
fn contiguous_dataset_reads() {
    let file = File::from_bytes(build_test_file()).unwrap();
    let vals = file.dataset("vals").unwrap();
    assert_eq!(vals.path(), "/vals");
    assert_eq!(vals.shape().unwrap(), vec![4]);
    assert_eq!(vals.dtype().unwrap(), DType::Int32);
    assert!(!vals.is_chunked().unwrap());
    assert_eq!(vals.read_i32().unwrap(), vec![10, 20, 30, 40]);
    assert_eq!(vals.read_f64().unwrap(), vec![10.0, 20.0, 30.0, 40.0]);
}

#[test]
fn chunked_dataset_full_read() {
    let file = File::from_bytes(build_test_file()).unwrap();
    let grid = file.dataset("grid").unwrap();
    assert_eq!(grid.shape().unwrap(), vec![4, 4]);
    assert_eq!(grid.dtype().unwrap(), DType::UInt8);
    assert!(grid.is_chunked().unwrap());
    assert_eq!(
        grid.read_raw().unwrap(),
        vec![0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15]
    );
}

#[test]
fn chunked_dataset_slices_and_chunks() {
    let file = File::from_bytes(build_test_file()).unwrap();
    let grid = file.dataset("grid").unwrap();

    assert_eq!(grid.slice_raw(&[1, 1], &[2, 2]).unwrap(), vec![5, 2, 7, 8]);
    assert_eq!(
        grid.slice_raw(&[0, 0], &[4, 4]).unwrap(),
        grid.read_raw().unwrap()
    );

    assert_eq!(grid.raw_chunk(&[0, 2]).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(
        grid.decompressed_chunk(&[0, 2]).unwrap(),
        grid.raw_chunk(&[0, 2]).unwrap()
    );
    assert_eq!(grid.storage_in_bytes().unwrap(), 16);
    assert!(!grid.is_empty_chunked().unwrap());
    assert!(grid.filters().unwrap().is_empty());
}

#[test]
fn chunk_level_errors() {
    let file = File::from_bytes(build_test_file()).unwrap();

    // Chunk accessors on a contiguous dataset are refused.
    let vals = file.dataset("vals").unwrap();
    assert!(matches!(
        vals.raw_chunk(&[0]),
        Err(hdflite::Error::NotChunked(_))
    ));

    // Unknown chunk offsets surface the dataset path.
    let grid = file.dataset("grid").unwrap();
    let err = grid.raw_chunk(&[1, 1]).unwrap_err();
    assert!(err.to_string().contains("/grid"));
}

#[test]
fn path_errors() {
    let file = File::from_bytes(build_test_file()).unwrap();
    assert!(file.dataset("missing").is_err());
    assert!(matches!(
        file.dataset("vals"),
        Ok(_)
    ));
    // The root group resolved as a dataset is refused.
    assert!(matches!(
        file.dataset("/"),
        Err(hdflite::Error::NotADataset(_))
    ));
}

#[test]
fn group_handle_navigation() {
    let file = File::from_bytes(build_test_file()).unwrap();
    let root = file.group("/").unwrap();
    let vals = root.dataset("vals").unwrap();
    assert_eq!(vals.read_i32().unwrap(), vec![10, 20, 30, 40]);
    assert!(root.dataset("nope").is_err());
}

#[test]
fn not_an_hdf5_file() {
    assert!(File::from_bytes(vec![0u8; 128]).is_err());
}
