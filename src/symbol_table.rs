//! Symbol table entries and nodes ("SNOD"): the group records of
//! old-style (superblock v0) files.

use crate::error::{Error, Result};
use crate::object_header::ObjectHeader;
use crate::view::ByteView;

pub const SIG_SNOD: &[u8; 4] = b"SNOD";

/// Size in bytes of one symbol table entry with 8-byte offsets.
pub const ENTRY_SIZE: usize = 40;

/// The cache-type tag of a symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// No cached metadata; the entry names a dataset or link-bearing object.
    Data,
    /// Cached group metadata: the scratch space holds B-tree and heap addresses.
    Group,
    /// Cached symbolic link: the scratch space holds the link-value heap offset.
    Link,
}

/// One symbol table entry: a name offset, an object header address, and
/// a cache-type-dependent scratch space.
#[derive(Clone, Copy)]
pub struct SymbolTableEntry<'f> {
    view: ByteView<'f>,
    cache_type: CacheType,
}

impl<'f> SymbolTableEntry<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        let cache_type = match view.read_u32(16)? {
            0 => CacheType::Data,
            1 => CacheType::Group,
            2 => CacheType::Link,
            t => {
                return Err(Error::CorruptFile(format!(
                    "invalid symbol table cache type {t} at 0x{address:x}"
                )));
            }
        };
        Ok(SymbolTableEntry { view, cache_type })
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    /// Offset of the entry's name in the owning group's local heap.
    pub fn name_offset(&self) -> Result<u64> {
        self.view.read_u64(0)
    }

    pub fn object_header_address(&self) -> Result<u64> {
        self.view.read_u64(8)
    }

    pub fn object_header(&self) -> Result<ObjectHeader<'f>> {
        ObjectHeader::parse(self.view.file_data(), self.object_header_address()?)
    }

    /// B-tree address from the scratch space. Group entries only.
    pub fn btree_address(&self) -> Result<u64> {
        self.require_cache(CacheType::Group)?;
        self.view.read_u64(24)
    }

    /// Local heap address from the scratch space. Group entries only.
    pub fn heap_address(&self) -> Result<u64> {
        self.require_cache(CacheType::Group)?;
        self.view.read_u64(32)
    }

    /// Heap offset of the link value. Link entries only.
    pub fn link_value_offset(&self) -> Result<u32> {
        self.require_cache(CacheType::Link)?;
        self.view.read_u32(24)
    }

    fn require_cache(&self, wanted: CacheType) -> Result<()> {
        if self.cache_type != wanted {
            return Err(Error::CorruptFile(format!(
                "symbol table entry at 0x{:x} has cache type {:?}, expected {wanted:?}",
                self.view.base(),
                self.cache_type
            )));
        }
        Ok(())
    }
}

/// A symbol table node: the leaf payload of an old-style group B-tree.
#[derive(Clone, Copy)]
pub struct SymbolTableNode<'f> {
    view: ByteView<'f>,
    n_symbols: usize,
}

impl<'f> SymbolTableNode<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        view.check_signature(0, SIG_SNOD)?;
        let version = view.read_u8(4)?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                what: "symbol table node",
                version,
            });
        }
        let n_symbols = view.read_u16(6)? as usize;
        Ok(SymbolTableNode { view, n_symbols })
    }

    pub fn len(&self) -> usize {
        self.n_symbols
    }

    pub fn is_empty(&self) -> bool {
        self.n_symbols == 0
    }

    pub fn entry(&self, i: usize) -> Result<SymbolTableEntry<'f>> {
        if i >= self.n_symbols {
            return Err(Error::CorruptFile(format!(
                "symbol table entry index {i} out of {}",
                self.n_symbols
            )));
        }
        SymbolTableEntry::parse(self.view.file_data(), self.view.base() + (8 + i * ENTRY_SIZE) as u64)
    }
}
