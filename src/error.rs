//! Error types for h5view operations.

use thiserror::Error;

/// All errors that can occur while opening and reading an HDF5 file.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from opening or mapping the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer does not start with the HDF5 signature.
    #[error("not an HDF5 file (bad signature)")]
    NotHdf5File,

    /// A structure version outside the implemented set.
    #[error("unsupported {what} version: {version}")]
    UnsupportedVersion { what: &'static str, version: u8 },

    /// A valid HDF5 layout feature this decoder does not handle
    /// (non-8-byte offsets, live free-space manager, ...).
    #[error("unsupported file layout: {0}")]
    UnsupportedLayout(&'static str),

    /// A structural invariant of the on-disk format is violated.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// A path component was absent at every tried resolution strategy,
    /// or a chunk offset addresses no stored chunk.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A recognized but unimplemented filter configuration.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// A datatype class other than fixed-point or floating-point.
    #[error("unsupported datatype class: {0}")]
    UnsupportedDatatype(u8),

    /// A v2 B-tree record type outside the implemented set.
    #[error("unsupported v2 B-tree type: {0}")]
    UnsupportedBTreeType(u8),

    /// LZ4 or bitshuffle decompression produced a size mismatch.
    #[error("decompression failed: {0}")]
    DecompressionError(String),

    /// The v3 superblock flags mark the file as open for writing.
    #[error("file is marked as open for writing")]
    FileBusy,

    /// A known, documented gap in the decoder.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// A caller-provided buffer or offset tuple does not match the
    /// dataset's geometry.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
