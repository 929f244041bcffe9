//! Lazy file, group, and dataset handles.
//!
//! Opening a [`File`] parses only the superblock; object headers are
//! parsed when a path is resolved and cached by address. Dataset reads
//! parse the dataset's metadata messages on demand.

use std::cell::RefCell;
use std::collections::HashMap;

use hdflite_format::chunk_index::{build_chunk_index, ChunkIndex};
use hdflite_format::chunked::ChunkedDatasetReader;
use hdflite_format::data_layout::DataLayout;
use hdflite_format::data_read;
use hdflite_format::dataspace::Dataspace;
use hdflite_format::datatype::Datatype;
use hdflite_format::filter_message::FilterSpec;
use hdflite_format::group;
use hdflite_format::message_type::MessageType;
use hdflite_format::object_header::ObjectHeader;
use hdflite_format::superblock::{find_signature, Superblock};
use hdflite_io::Hdf5Read;

use crate::error::Error;
use crate::types::{classify, DType};

/// An open HDF5 file over any [`Hdf5Read`] backing storage.
///
/// The file handle owns the backing storage; datasets and groups borrow
/// views from it and never outlive it.
pub struct File<R: Hdf5Read> {
    reader: R,
    superblock: Superblock,
    header_cache: RefCell<HashMap<u64, ObjectHeader>>,
}

impl File<hdflite_io::MemoryReader> {
    /// Open a file held in an in-memory byte vector.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, Error> {
        File::open(hdflite_io::MemoryReader::new(data))
    }
}

#[cfg(feature = "mmap")]
impl File<hdflite_io::MmapReader> {
    /// Open a file through a read-only memory mapping. The recommended
    /// way to open large files.
    pub fn open_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Error> {
        File::open(hdflite_io::MmapReader::open(path)?)
    }
}

impl<R: Hdf5Read> File<R> {
    /// Open a file over any backing storage. Parses the superblock only.
    pub fn open(reader: R) -> Result<Self, Error> {
        let data = reader.as_bytes();
        let signature_offset = find_signature(data)?;
        let superblock = Superblock::parse(data, signature_offset)?;
        log::debug!(
            "opened HDF5 file: superblock v{}, {} bytes",
            superblock.version,
            data.len()
        );
        Ok(File {
            reader,
            superblock,
            header_cache: RefCell::new(HashMap::new()),
        })
    }

    /// The raw file bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.reader.as_bytes()
    }

    /// The parsed superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// A handle to the root group.
    pub fn root(&self) -> Group<'_, R> {
        Group {
            file: self,
            address: self.superblock.root_group_address,
            path: String::from("/"),
        }
    }

    /// Resolve a `/`-separated path to a dataset handle.
    pub fn dataset(&self, path: &str) -> Result<Dataset<'_, R>, Error> {
        let address = group::resolve_path(self.as_bytes(), &self.superblock, path)?;
        let header = self.header_at(address)?;
        if !header.has_message(MessageType::DataLayout) {
            return Err(Error::NotADataset(path.to_string()));
        }
        Ok(Dataset {
            file: self,
            header,
            path: normalize(path),
        })
    }

    /// Resolve a `/`-separated path to a group handle.
    pub fn group(&self, path: &str) -> Result<Group<'_, R>, Error> {
        let address = group::resolve_path(self.as_bytes(), &self.superblock, path)?;
        Ok(Group {
            file: self,
            address,
            path: normalize(path),
        })
    }

    fn header_at(&self, address: u64) -> Result<ObjectHeader, Error> {
        if let Some(header) = self.header_cache.borrow().get(&address) {
            return Ok(header.clone());
        }
        let header = ObjectHeader::parse(
            self.as_bytes(),
            address as usize,
            self.superblock.offset_size,
            self.superblock.length_size,
        )?;
        self.header_cache
            .borrow_mut()
            .insert(address, header.clone());
        Ok(header)
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A handle to a group within an open file.
pub struct Group<'f, R: Hdf5Read> {
    file: &'f File<R>,
    address: u64,
    path: String,
}

impl<'f, R: Hdf5Read> Group<'f, R> {
    /// The group's absolute path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Names of the datasets directly in this group.
    pub fn datasets(&self) -> Result<Vec<String>, Error> {
        self.children_where(|h| h.has_message(MessageType::DataLayout))
    }

    /// Names of the subgroups directly in this group.
    pub fn groups(&self) -> Result<Vec<String>, Error> {
        self.children_where(group::is_group)
    }

    /// A dataset in this group by name.
    pub fn dataset(&self, name: &str) -> Result<Dataset<'f, R>, Error> {
        let address = self.child_address(name)?;
        let header = self.file.header_at(address)?;
        if !header.has_message(MessageType::DataLayout) {
            return Err(Error::NotADataset(self.child_path(name)));
        }
        Ok(Dataset {
            file: self.file,
            header,
            path: self.child_path(name),
        })
    }

    /// A subgroup of this group by name.
    pub fn group(&self, name: &str) -> Result<Group<'f, R>, Error> {
        Ok(Group {
            file: self.file,
            address: self.child_address(name)?,
            path: self.child_path(name),
        })
    }

    fn child_path(&self, name: &str) -> String {
        if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        }
    }

    fn child_address(&self, name: &str) -> Result<u64, Error> {
        self.entries()?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.address)
            .ok_or_else(|| {
                Error::Format(hdflite_format::error::FormatError::PathNotFound(
                    self.child_path(name),
                ))
            })
    }

    fn entries(&self) -> Result<Vec<group::GroupEntry>, Error> {
        let header = self.file.header_at(self.address)?;
        Ok(group::group_entries(
            self.file.as_bytes(),
            &header,
            self.file.superblock.offset_size,
            self.file.superblock.length_size,
        )?)
    }

    fn children_where(
        &self,
        keep: impl Fn(&ObjectHeader) -> bool,
    ) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for entry in self.entries()? {
            let header = self.file.header_at(entry.address)?;
            if keep(&header) {
                names.push(entry.name);
            }
        }
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// A handle to a dataset within an open file.
pub struct Dataset<'f, R: Hdf5Read> {
    file: &'f File<R>,
    header: ObjectHeader,
    path: String,
}

impl<'f, R: Hdf5Read> Dataset<'f, R> {
    /// The dataset's absolute path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The dataset shape.
    pub fn shape(&self) -> Result<Vec<u64>, Error> {
        Ok(self.dataspace()?.dimensions)
    }

    /// The simplified element type.
    pub fn dtype(&self) -> Result<DType, Error> {
        Ok(classify(&self.datatype()?))
    }

    /// Element size in bytes.
    pub fn element_size(&self) -> Result<u32, Error> {
        Ok(self.datatype()?.size())
    }

    /// True if the dataset uses chunked storage.
    pub fn is_chunked(&self) -> Result<bool, Error> {
        Ok(matches!(self.layout()?, DataLayout::Chunked { .. }))
    }

    // ----- whole-dataset reads -----

    /// The dataset's raw bytes, row-major.
    pub fn read_raw(&self) -> Result<Vec<u8>, Error> {
        let expected = self.byte_len()?;
        match self.layout()? {
            layout @ (DataLayout::Compact { .. } | DataLayout::Contiguous { .. }) => {
                Ok(data_read::read_raw(self.file.as_bytes(), &layout, expected)?)
            }
            DataLayout::Chunked { .. } => {
                self.with_chunked(|reader| Ok(reader.data_buffer()?))
            }
        }
    }

    /// All values as `f64`.
    pub fn read_f64(&self) -> Result<Vec<f64>, Error> {
        Ok(data_read::read_as_f64(&self.read_raw()?, &self.datatype()?)?)
    }

    /// All values as `f32`.
    pub fn read_f32(&self) -> Result<Vec<f32>, Error> {
        Ok(data_read::read_as_f32(&self.read_raw()?, &self.datatype()?)?)
    }

    /// All values as `i32`.
    pub fn read_i32(&self) -> Result<Vec<i32>, Error> {
        Ok(data_read::read_as_i32(&self.read_raw()?, &self.datatype()?)?)
    }

    /// All values as `i64`.
    pub fn read_i64(&self) -> Result<Vec<i64>, Error> {
        Ok(data_read::read_as_i64(&self.read_raw()?, &self.datatype()?)?)
    }

    /// All values as `u64`.
    pub fn read_u64(&self) -> Result<Vec<u64>, Error> {
        Ok(data_read::read_as_u64(&self.read_raw()?, &self.datatype()?)?)
    }

    /// All values as fixed-length strings.
    pub fn read_string(&self) -> Result<Vec<String>, Error> {
        Ok(data_read::read_as_strings(
            &self.read_raw()?,
            &self.datatype()?,
        )?)
    }

    // ----- chunked dataset surface -----

    /// Raw bytes of a rectangular hyperslab, row-major. Chunked datasets
    /// only.
    pub fn slice_raw(&self, offset: &[u64], shape: &[u64]) -> Result<Vec<u8>, Error> {
        self.with_chunked(|reader| Ok(reader.slice_data_buffer(offset, shape)?))
    }

    /// On-disk (possibly compressed) bytes of the chunk at `chunk_offset`.
    pub fn raw_chunk(&self, chunk_offset: &[u64]) -> Result<Vec<u8>, Error> {
        self.with_chunked(|reader| Ok(reader.raw_chunk_buffer(chunk_offset)?.to_vec()))
    }

    /// Decoded bytes of the chunk at `chunk_offset`.
    pub fn decompressed_chunk(&self, chunk_offset: &[u64]) -> Result<Vec<u8>, Error> {
        self.with_chunked(|reader| Ok(reader.decompressed_chunk(chunk_offset)?))
    }

    /// The dataset's filters, in encode order. Chunked datasets only.
    pub fn filters(&self) -> Result<Vec<FilterSpec>, Error> {
        self.with_chunked(|reader| Ok(reader.filters()?))
    }

    /// Total on-disk chunk storage in bytes. Chunked datasets only.
    pub fn storage_in_bytes(&self) -> Result<u64, Error> {
        self.with_chunked(|reader| Ok(reader.storage_in_bytes()))
    }

    /// True if no chunk was ever written. Chunked datasets only.
    pub fn is_empty_chunked(&self) -> Result<bool, Error> {
        self.with_chunked(|reader| Ok(reader.is_empty()))
    }

    // ----- message plumbing -----

    fn with_chunked<T>(
        &self,
        f: impl FnOnce(
            &ChunkedDatasetReader<'_, Box<dyn ChunkIndex + Send + Sync>>,
        ) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let layout = self.layout()?;
        let DataLayout::Chunked {
            chunk_dimensions, ..
        } = &layout
        else {
            return Err(Error::NotChunked(self.path.clone()));
        };

        let dims = self.dataspace()?.dimensions;
        let elem_size = self.datatype()?.size();
        let superblock = &self.file.superblock;
        let index = build_chunk_index(
            self.file.as_bytes(),
            &layout,
            &dims,
            elem_size,
            superblock.offset_size,
            superblock.length_size,
        )?;

        let rank = dims.len();
        let spatial = chunk_dimensions.get(..rank).ok_or_else(|| {
            Error::Format(hdflite_format::error::FormatError::InvalidChunkIndex(
                "chunk dimensionality below dataset rank".into(),
            ))
        })?;

        let reader = ChunkedDatasetReader::new(
            self.file.as_bytes(),
            &self.header,
            self.path.clone(),
            dims,
            spatial,
            elem_size,
            index,
        )?;
        f(&reader)
    }

    fn byte_len(&self) -> Result<usize, Error> {
        let elements = self.dataspace()?.num_elements();
        let bytes = elements
            .checked_mul(self.datatype()?.size() as u64)
            .ok_or(hdflite_format::error::FormatError::DimensionOverflow)?;
        usize::try_from(bytes).map_err(|_| {
            Error::Format(hdflite_format::error::FormatError::DatasetTooLarge { bytes })
        })
    }

    fn message(&self, msg_type: MessageType, name: &'static str) -> Result<&[u8], Error> {
        self.header
            .find_message(msg_type)
            .map(|m| m.data.as_slice())
            .ok_or(Error::MissingMessage(name))
    }

    fn dataspace(&self) -> Result<Dataspace, Error> {
        Ok(Dataspace::parse(
            self.message(MessageType::Dataspace, "dataspace")?,
            self.file.superblock.length_size,
        )?)
    }

    fn datatype(&self) -> Result<Datatype, Error> {
        Ok(Datatype::parse(
            self.message(MessageType::Datatype, "datatype")?,
        )?)
    }

    fn layout(&self) -> Result<DataLayout, Error> {
        Ok(DataLayout::parse(
            self.message(MessageType::DataLayout, "data layout")?,
            self.file.superblock.offset_size,
            self.file.superblock.length_size,
        )?)
    }
}
