//! Superblock: the fixed file-level header locating the root group.
//!
//! Versions 0 (old-style, root as a symbol table entry) and 2/3
//! (new-style, root as an object header address) are supported.
//! Detector files only ever use 8-byte offsets and a zero base
//! address; anything else is rejected as unsupported rather than
//! guessed at.

use log::debug;

use crate::error::{Error, Result};
use crate::object_header::ObjectHeader;
use crate::path::H5Path;
use crate::resolver::{ResolvedPath, ResolverV0, ResolverV2};
use crate::symbol_table::SymbolTableEntry;
use crate::view::{ByteView, is_undefined};

/// The 8-byte HDF5 file signature.
pub const HDF5_SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n";

enum Root<'f> {
    /// v0: the root group's symbol table entry inside the superblock.
    SymbolTable(SymbolTableEntry<'f>),
    /// v2/v3: address of the root group's object header.
    HeaderAddress(u64),
}

/// A validated superblock.
pub struct Superblock<'f> {
    data: &'f [u8],
    pub version: u8,
    root: Root<'f>,
}

impl<'f> Superblock<'f> {
    /// Validates the signature and version and locates the root group.
    pub fn read(data: &'f [u8]) -> Result<Self> {
        if data.len() < 9 || data[..8] != HDF5_SIGNATURE {
            return Err(Error::NotHdf5File);
        }
        let view = ByteView::new(data, 0)?;
        let version = view.read_u8(8)?;
        debug!("superblock version {version}");
        match version {
            0 => Self::read_v0(data, view),
            2 | 3 => Self::read_v2_v3(data, view, version),
            v => Err(Error::UnsupportedVersion {
                what: "superblock",
                version: v,
            }),
        }
    }

    fn read_v0(data: &'f [u8], view: ByteView<'f>) -> Result<Self> {
        if view.read_u8(13)? != 8 || view.read_u8(14)? != 8 {
            return Err(Error::UnsupportedLayout("only 8-byte offsets and lengths"));
        }
        if view.read_u64(24)? != 0 {
            return Err(Error::UnsupportedLayout("non-zero file base address"));
        }
        if !is_undefined(view.read_u64(32)?) {
            return Err(Error::UnsupportedLayout("file with a free-space manager"));
        }
        if !is_undefined(view.read_u64(48)?) {
            return Err(Error::UnsupportedLayout("file with a driver information block"));
        }
        // The root symbol table entry follows the four address fields.
        let root = SymbolTableEntry::parse(data, 24 + 4 * 8)?;
        Ok(Superblock {
            data,
            version: 0,
            root: Root::SymbolTable(root),
        })
    }

    fn read_v2_v3(data: &'f [u8], view: ByteView<'f>, version: u8) -> Result<Self> {
        if view.read_u8(9)? != 8 || view.read_u8(10)? != 8 {
            return Err(Error::UnsupportedLayout("only 8-byte offsets and lengths"));
        }
        let consistency = view.read_u8(11)?;
        if version == 3 && consistency & 0x01 != 0 {
            return Err(Error::FileBusy);
        }
        if view.read_u64(12)? != 0 {
            return Err(Error::UnsupportedLayout("non-zero file base address"));
        }
        if !is_undefined(view.read_u64(20)?) {
            return Err(Error::UnsupportedLayout("superblock extension"));
        }
        let root_address = view.read_u64(36)?;
        Ok(Superblock {
            data,
            version,
            root: Root::HeaderAddress(root_address),
        })
    }

    /// Resolves `path` against this file's root group.
    pub fn resolve(&self, path: &H5Path) -> Result<ResolvedPath<'f>> {
        match &self.root {
            Root::SymbolTable(entry) => ResolverV0::new(self.data, *entry).resolve(path),
            Root::HeaderAddress(address) => {
                let root = ObjectHeader::parse(self.data, *address)?;
                ResolverV2::new(self.data, root).resolve(path)
            }
        }
    }

    /// The root group's object header.
    pub fn root_header(&self) -> Result<ObjectHeader<'f>> {
        match &self.root {
            Root::SymbolTable(entry) => entry.object_header(),
            Root::HeaderAddress(address) => ObjectHeader::parse(self.data, *address),
        }
    }
}
