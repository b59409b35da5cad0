//! h5view: a read-only decoder for the subset of the HDF5 container
//! format produced by area detectors.
//!
//! Given a memory-mapped file, resolve a slash-separated path (e.g.
//! `/entry/data/data_000001`) to a dataset, inspect its shape, type
//! and chunking, and read raw pixel data chunk by chunk — including
//! transparent LZ4 and bitshuffle+LZ4 decompression.
//!
//! The decoder is a pure byte-level interpreter: every structure is an
//! immutable view into one shared buffer, so datasets and resolutions
//! over the same open file may run concurrently from multiple threads.
//!
//! ```no_run
//! use h5view::{Dataset, H5File};
//!
//! let file = H5File::open("series_master.h5").unwrap();
//! let dataset = Dataset::open(&file, "/entry/data/data_000001").unwrap();
//! println!("{:?} x {} bytes", dataset.shape(), dataset.element_size());
//! let frame = dataset.read(&[0, 0, 0]).unwrap();
//! # let _ = frame;
//! ```

pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod chunk_index;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod file;
pub mod fractal_heap;
pub mod local_heap;
pub mod messages;
pub mod object_header;
pub mod path;
#[cfg(feature = "plugin")]
pub mod plugin;
pub mod resolver;
pub mod superblock;
pub mod symbol_table;
pub mod view;

pub use dataset::Dataset;
pub use error::{Error, Result};
pub use file::H5File;
pub use messages::DatatypeClass;
pub use path::H5Path;
pub use resolver::ResolvedPath;
pub use superblock::Superblock;
