//! Memory-mapped backing storage via `memmap2`.

use std::fs;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::Hdf5Read;

/// Read-only memory-mapped file.
///
/// `as_bytes` returns a slice straight into the mapping, so reads never
/// copy. The caller must ensure the file is not modified by another
/// process while the mapping is alive.
pub struct MmapReader {
    _file: fs::File,
    mmap: Mmap,
}

impl MmapReader {
    /// Open a file and memory-map it for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<MmapReader> {
        let file = fs::File::open(path)?;
        // SAFETY: read-only mapping; the caller is responsible for keeping
        // the file unmodified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(MmapReader { _file: file, mmap })
    }

    /// Hint to the kernel that the given range will be needed soon
    /// (`madvise(MADV_WILLNEED)`). A no-op off Unix.
    #[cfg(unix)]
    pub fn advise_willneed(&self, offset: usize, len: usize) {
        let len = len.min(self.mmap.len().saturating_sub(offset));
        if len == 0 {
            return;
        }
        // SAFETY: the advised range lies within our valid mapping.
        unsafe {
            let ptr = self.mmap.as_ptr().add(offset);
            libc::madvise(ptr as *mut libc::c_void, len, libc::MADV_WILLNEED);
        }
    }

    #[cfg(not(unix))]
    pub fn advise_willneed(&self, _offset: usize, _len: usize) {}
}

impl Hdf5Read for MmapReader {
    fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}
