//! Fixed-array and extensible-array chunk indices (v4 data layouts,
//! index types 3 and 4).
//!
//! Both map a linear chunk number to a chunk address. Their headers
//! and pages carry Jenkins lookup3 checksums which are validated as a
//! structural integrity check.

use crate::checksum::lookup3;
use crate::error::{Error, Result};
use crate::view::{ByteView, is_undefined};

pub const SIG_FAHD: &[u8; 4] = b"FAHD";
pub const SIG_FADB: &[u8; 4] = b"FADB";
pub const SIG_EAHD: &[u8; 4] = b"EAHD";
pub const SIG_EAIB: &[u8; 4] = b"EAIB";

/// One chunk-index entry: where the chunk lives and, for filtered
/// clients, how many bytes it occupies on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub address: u64,
    pub stored_size: Option<u64>,
    pub filter_mask: u32,
}

fn parse_entry(view: ByteView<'_>, offset: usize, entry_size: usize, filtered: bool) -> Result<ChunkEntry> {
    let address = view.read_u64(offset)?;
    if is_undefined(address) {
        return Err(Error::PathNotFound("chunk is not stored in the file".into()));
    }
    if !filtered {
        return Ok(ChunkEntry {
            address,
            stored_size: None,
            filter_mask: 0,
        });
    }
    let size_width = entry_size.checked_sub(12).filter(|w| (1..=8).contains(w)).ok_or_else(|| {
        Error::CorruptFile(format!(
            "filtered chunk entry of {entry_size} bytes cannot hold a size field"
        ))
    })?;
    Ok(ChunkEntry {
        address,
        stored_size: Some(view.read_uint(offset + 8, size_width)?),
        filter_mask: view.read_u32(offset + 8 + size_width)?,
    })
}

fn validate_checksum(view: ByteView<'_>, covered: usize, what: &str) -> Result<()> {
    let stored = view.read_u32(covered)?;
    let computed = lookup3(view.bytes(0, covered)?, 0);
    if stored != computed {
        return Err(Error::CorruptFile(format!(
            "{what} checksum mismatch at 0x{:x}: stored 0x{stored:08x}, computed 0x{computed:08x}",
            view.base()
        )));
    }
    Ok(())
}

fn client_is_filtered(client_id: u8, what: &str) -> Result<bool> {
    match client_id {
        0 => Ok(false),
        1 => Ok(true),
        c => Err(Error::CorruptFile(format!("invalid {what} client id {c}"))),
    }
}

// ---------------------------------------------------------------------------
// Fixed array
// ---------------------------------------------------------------------------

/// A fixed array: entry count is set at creation, entries live in one
/// data block, paged once the count exceeds `1 << page_bits`.
pub struct FixedArray<'f> {
    data_block: ByteView<'f>,
    filtered: bool,
    entry_size: usize,
    num_entries: u64,
    per_page: u64,
    num_pages: u64,
    bitmap_size: usize,
}

impl<'f> FixedArray<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        view.check_signature(0, SIG_FAHD)?;
        validate_checksum(view, 24, "fixed array header")?;
        let version = view.read_u8(4)?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "fixed array",
                version,
            });
        }
        let filtered = client_is_filtered(view.read_u8(5)?, "fixed array")?;
        let entry_size = view.read_u8(6)? as usize;
        let page_bits = view.read_u8(7)?;
        let num_entries = view.read_u64(8)?;
        let data_block_address = view.read_u64(16)?;
        if entry_size == 0 || page_bits >= 64 {
            return Err(Error::CorruptFile(format!(
                "implausible fixed array geometry at 0x{address:x}"
            )));
        }

        let data_block = ByteView::new(data, data_block_address)?;
        data_block.check_signature(0, SIG_FADB)?;
        if data_block.read_u64(6)? != address {
            return Err(Error::CorruptFile(format!(
                "fixed array data block at 0x{data_block_address:x} does not point back to its header"
            )));
        }

        let per_page = 1u64 << page_bits;
        let (num_pages, bitmap_size, inline_entries) = if num_entries > per_page {
            let pages = num_entries.div_ceil(per_page);
            (pages, ((pages + 7) / 8) as usize, 0u64)
        } else {
            (0, 0, num_entries)
        };
        // The data-block checksum covers the prefix and any inline entries.
        let covered = 14 + bitmap_size + (inline_entries as usize) * entry_size;
        validate_checksum(data_block, covered, "fixed array data block")?;

        Ok(FixedArray {
            data_block,
            filtered,
            entry_size,
            num_entries,
            per_page,
            num_pages,
            bitmap_size,
        })
    }

    pub fn len(&self) -> u64 {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn entry(&self, index: u64) -> Result<ChunkEntry> {
        if index >= self.num_entries {
            return Err(Error::PathNotFound(format!(
                "chunk {index} is out of range for a {}-chunk dataset",
                self.num_entries
            )));
        }
        if self.num_pages == 0 {
            let offset = 14 + (index as usize) * self.entry_size;
            return parse_entry(self.data_block, offset, self.entry_size, self.filtered);
        }

        let page = index / self.per_page;
        let full_page_size = (self.per_page as usize) * self.entry_size + 4;
        let page_start = 14 + self.bitmap_size + 4 + (page as usize) * full_page_size;
        let mut page_size = full_page_size;
        if page == self.num_pages - 1 && self.num_entries % self.per_page != 0 {
            page_size = (self.num_entries % self.per_page) as usize * self.entry_size + 4;
        }
        let page_view = self.data_block.at(page_start)?;
        validate_checksum(page_view, page_size - 4, "fixed array page")?;
        let in_page = (index % self.per_page) as usize;
        parse_entry(page_view, in_page * self.entry_size, self.entry_size, self.filtered)
    }
}

// ---------------------------------------------------------------------------
// Extensible array
// ---------------------------------------------------------------------------

/// An extensible array, supported only as far as its index block. The
/// secondary/data-block paging of grown arrays is a documented gap.
pub struct ExtensibleArray<'f> {
    index_block: ByteView<'f>,
    filtered: bool,
    entry_size: usize,
    index_block_entries: u64,
    max_index_set: u64,
}

impl<'f> ExtensibleArray<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        view.check_signature(0, SIG_EAHD)?;
        validate_checksum(view, 68, "extensible array header")?;
        let version = view.read_u8(4)?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "extensible array",
                version,
            });
        }
        let filtered = client_is_filtered(view.read_u8(5)?, "extensible array")?;
        let entry_size = view.read_u8(6)? as usize;
        let index_block_entries = view.read_u8(8)? as u64;
        let max_index_set = view.read_u64(44)?;
        let index_block_address = view.read_u64(60)?;
        if entry_size == 0 {
            return Err(Error::CorruptFile(format!(
                "zero extensible array entry size at 0x{address:x}"
            )));
        }

        let index_block = ByteView::new(data, index_block_address)?;
        index_block.check_signature(0, SIG_EAIB)?;
        if index_block.read_u64(6)? != address {
            return Err(Error::CorruptFile(format!(
                "extensible array index block at 0x{index_block_address:x} does not point back to its header"
            )));
        }

        Ok(ExtensibleArray {
            index_block,
            filtered,
            entry_size,
            index_block_entries,
            max_index_set,
        })
    }

    /// Highest element index that has ever been stored, plus one.
    pub fn len(&self) -> u64 {
        self.max_index_set
    }

    pub fn is_empty(&self) -> bool {
        self.max_index_set == 0
    }

    pub fn entry(&self, index: u64) -> Result<ChunkEntry> {
        if index >= self.max_index_set {
            return Err(Error::PathNotFound(format!(
                "chunk {index} is out of range for a {}-chunk dataset",
                self.max_index_set
            )));
        }
        if index >= self.index_block_entries {
            return Err(Error::NotImplemented(
                "extensible array elements outside the index block",
            ));
        }
        let offset = 14 + (index as usize) * self.entry_size;
        parse_entry(self.index_block, offset, self.entry_size, self.filtered)
    }
}
