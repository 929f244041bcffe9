//! Error type for the high-level API.

use std::fmt;

use hdflite_format::error::FormatError;

/// Errors from opening files and accessing objects.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the filesystem.
    Io(std::io::Error),
    /// Low-level format parsing or read error.
    Format(FormatError),
    /// The object at the given path is not a dataset.
    NotADataset(String),
    /// A chunk-level operation was called on a non-chunked dataset.
    NotChunked(String),
    /// A required header message was not found.
    MissingMessage(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Format(e) => write!(f, "HDF5 format error: {e}"),
            Error::NotADataset(path) => write!(f, "not a dataset: {path}"),
            Error::NotChunked(path) => write!(f, "not a chunked dataset: {path}"),
            Error::MissingMessage(name) => write!(f, "missing required {name} message"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Error {
        Error::Format(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}
