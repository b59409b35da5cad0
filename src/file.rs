//! Process-level file acquisition: memory-mapping a path into a
//! read-only buffer and tracking its containing directory so relative
//! external links can be resolved.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::Result;
use crate::superblock::Superblock;

enum FileData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

struct Inner {
    data: FileData,
    directory: PathBuf,
}

/// An open HDF5 file: one immutable buffer shared by every view and
/// dataset derived from it. Cloning is cheap (reference counted).
#[derive(Clone)]
pub struct H5File {
    inner: Arc<Inner>,
}

impl H5File {
    /// Opens and memory-maps the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(H5File {
            inner: Arc::new(Inner {
                data: FileData::Mapped(mmap),
                directory,
            }),
        })
    }

    /// Wraps an in-memory buffer (tests, received bytes).
    pub fn from_bytes(data: Vec<u8>) -> Self {
        H5File {
            inner: Arc::new(Inner {
                data: FileData::Owned(data),
                directory: PathBuf::from("."),
            }),
        }
    }

    /// The whole file content.
    pub fn bytes(&self) -> &[u8] {
        match &self.inner.data {
            FileData::Mapped(m) => m,
            FileData::Owned(v) => v,
        }
    }

    /// Directory the file was opened from; external link targets with
    /// relative names resolve against it.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Opens an external-link target: absolute names as-is, relative
    /// names against this file's directory.
    pub fn open_sibling(&self, name: &str) -> Result<H5File> {
        let target = Path::new(name);
        if target.is_absolute() {
            H5File::open(target)
        } else {
            H5File::open(self.inner.directory.join(target))
        }
    }

    /// Reads and validates this file's superblock.
    pub fn superblock(&self) -> Result<Superblock<'_>> {
        Superblock::read(self.bytes())
    }
}

impl std::fmt::Debug for H5File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H5File")
            .field("len", &self.bytes().len())
            .field("directory", &self.inner.directory)
            .finish()
    }
}
