//! Backing storage for HDF5 readers.
//!
//! The format layer consumes whole files as `&[u8]`; implementors of
//! [`Hdf5Read`] decide where those bytes live: an owned vector, a borrowed
//! slice, a slurped file, or (with the `mmap` feature) a memory-mapped
//! file.

use std::io::{self, Read, Seek, SeekFrom};

/// Read-only access to an HDF5 file's bytes.
pub trait Hdf5Read {
    /// The entire file content as one byte slice.
    fn as_bytes(&self) -> &[u8];

    /// Length of the backing data in bytes.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// True if the backing data is empty.
    fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Map a byte range: a bounds-checked view of `size` bytes at
    /// `address`. Returns `None` when the range falls outside the file.
    fn map(&self, address: u64, size: usize) -> Option<&[u8]> {
        let start = usize::try_from(address).ok()?;
        self.as_bytes().get(start..start.checked_add(size)?)
    }
}

// ---------------------------------------------------------------------------
// MemoryReader: owned bytes
// ---------------------------------------------------------------------------

/// In-memory backing storage over an owned byte vector.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    /// Wrap an owned byte vector.
    pub fn new(data: Vec<u8>) -> MemoryReader {
        MemoryReader { data }
    }

    /// Consume the reader and return the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Hdf5Read for MemoryReader {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// BorrowedReader: zero-copy over &[u8]
// ---------------------------------------------------------------------------

/// Zero-copy backing storage over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct BorrowedReader<'a> {
    data: &'a [u8],
}

impl<'a> BorrowedReader<'a> {
    /// Wrap a borrowed byte slice.
    pub fn new(data: &'a [u8]) -> BorrowedReader<'a> {
        BorrowedReader { data }
    }
}

impl Hdf5Read for BorrowedReader<'_> {
    fn as_bytes(&self) -> &[u8] {
        self.data
    }
}

// ---------------------------------------------------------------------------
// FileReader: slurps a file into memory
// ---------------------------------------------------------------------------

/// File-backed storage that reads the entire file into memory on open.
#[derive(Debug)]
pub struct FileReader {
    data: Vec<u8>,
}

impl FileReader {
    /// Open a file and read all of its contents.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> io::Result<FileReader> {
        FileReader::from_file(std::fs::File::open(path)?)
    }

    /// Read all contents of an already-opened file.
    pub fn from_file(mut file: std::fs::File) -> io::Result<FileReader> {
        let len = file.seek(SeekFrom::End(0))? as usize;
        file.seek(SeekFrom::Start(0))?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(FileReader { data })
    }

    /// Consume the reader and return the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Hdf5Read for FileReader {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(feature = "mmap")]
pub mod mmap;

#[cfg(feature = "mmap")]
pub use mmap::MmapReader;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_reader_basics() {
        let reader = MemoryReader::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.as_bytes(), &[1, 2, 3, 4, 5]);
        assert_eq!(reader.len(), 5);
        assert!(!reader.is_empty());
        assert_eq!(reader.into_inner(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn memory_reader_empty() {
        let reader = MemoryReader::new(Vec::new());
        assert!(reader.is_empty());
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn map_in_and_out_of_bounds() {
        let reader = MemoryReader::new(vec![10, 20, 30, 40, 50]);
        assert_eq!(reader.map(1, 3), Some(&[20, 30, 40][..]));
        assert_eq!(reader.map(0, 5), Some(&[10, 20, 30, 40, 50][..]));
        assert_eq!(reader.map(4, 2), None);
        assert_eq!(reader.map(5, 1), None);
        assert_eq!(reader.map(u64::MAX, 1), None);
    }

    #[test]
    fn borrowed_reader_zero_copy() {
        let data = [42u8, 43, 44];
        let reader = BorrowedReader::new(&data);
        assert_eq!(reader.as_bytes().as_ptr(), data.as_ptr());
        assert_eq!(reader.len(), 3);
    }

    #[test]
    fn file_reader_roundtrip() {
        let path = std::env::temp_dir().join("hdflite_io_file_reader.bin");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&[0x89, 0x48, 0x44, 0x46]).unwrap();
        }
        let reader = FileReader::open(&path).unwrap();
        assert_eq!(reader.as_bytes(), &[0x89, 0x48, 0x44, 0x46]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn file_reader_missing_file() {
        assert!(FileReader::open("/tmp/hdflite_io_does_not_exist_7712.bin").is_err());
    }
}
