//! Read-only HDF5 file access.
//!
//! Open a file, navigate its group hierarchy, and read dataset values:
//!
//! ```no_run
//! use hdflite::File;
//!
//! # fn main() -> Result<(), hdflite::Error> {
//! let file = File::open_path("measurements.h5")?;
//! let dataset = file.dataset("run1/temperature")?;
//! println!("shape: {:?}", dataset.shape()?);
//! let values = dataset.read_f64()?;
//! # Ok(())
//! # }
//! ```
//!
//! Chunked datasets additionally expose hyperslab reads
//! ([`Dataset::slice_raw`]) and per-chunk access; full-dataset reads of
//! chunked data decode chunks in parallel.

mod error;
mod file;
mod types;

pub use error::Error;
pub use file::{Dataset, File, Group};
pub use types::{classify, DType};

pub use hdflite_format as format;
pub use hdflite_io as io;
