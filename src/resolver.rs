//! Path resolution: walking a slash-separated path component by
//! component from a root container to an object header.
//!
//! Old-style (v0) files step through symbol-table entries backed by a
//! v1 B-tree and local heap, falling back to scanning the container's
//! object header for link messages. New-style (v2/v3) files only have
//! the header scan, with dense groups indirecting through a link-info
//! message into a fractal heap and v2 B-tree.
//!
//! An expected miss (name absent in one lookup strategy) is an
//! `Option::None`, never an error; only a component absent everywhere
//! becomes `PathNotFound`.

use log::debug;

use crate::btree_v1;
use crate::btree_v2::BTreeV2;
use crate::error::{Error, Result};
use crate::fractal_heap::FractalHeap;
use crate::local_heap::LocalHeap;
use crate::messages::{LinkInfoMsg, LinkMsg, LinkTarget, SymbolTableMsg};
use crate::object_header::{MSG_LINK, MSG_LINK_INFO, MSG_SYMBOL_TABLE, ObjectHeader};
use crate::path::H5Path;
use crate::symbol_table::{CacheType, SymbolTableEntry};
use crate::view::ByteView;

/// Soft links may chain; a cycle would otherwise recurse forever.
const MAX_LINK_DEPTH: usize = 32;

/// The outcome of resolving a path against one file.
pub enum ResolvedPath<'f> {
    /// The path named an object in this file.
    Object(ObjectHeader<'f>),
    /// The path crossed an external link; the caller must reopen.
    External { file: String, path: H5Path },
}

// ---------------------------------------------------------------------------
// Shared link-message lookup
// ---------------------------------------------------------------------------

/// Finds `name` among a header's link messages, following a link-info
/// indirection into dense storage when present.
fn find_link_in_header<'f>(
    data: &'f [u8],
    header: &ObjectHeader<'f>,
    name: &str,
) -> Result<Option<LinkMsg>> {
    for msg in header.messages() {
        match msg.msg_type {
            MSG_LINK => {
                let link = LinkMsg::parse(msg.body)?;
                if link.name == name {
                    return Ok(Some(link));
                }
            }
            MSG_LINK_INFO => {
                let info = LinkInfoMsg::parse(msg.body)?;
                if let Some(link) = find_dense_link(data, &info, name)? {
                    return Ok(Some(link));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Looks `name` up in a dense group: v2 B-tree by name hash, then the
/// fractal heap object the record points at.
fn find_dense_link<'f>(
    data: &'f [u8],
    info: &LinkInfoMsg,
    name: &str,
) -> Result<Option<LinkMsg>> {
    let (Some(heap_address), Some(btree_address)) =
        (info.fractal_heap_address, info.btree_address)
    else {
        return Ok(None);
    };
    let heap = FractalHeap::parse(data, heap_address)?;
    let btree = BTreeV2::parse(data, btree_address)?;
    let Some(record_address) = btree.record_address_by_name(name)? else {
        return Ok(None);
    };
    // Name-index record: hash (4 bytes), then the heap id.
    let record = ByteView::new(data, record_address)?;
    let heap_id = record.bytes(4, heap.heap_id_length)?;
    let link = LinkMsg::parse(ByteView::new(heap.read_object(heap_id)?, 0)?)?;
    if link.name != name {
        // Hash collision with a different name; treat as a miss.
        debug!("dense-link hash collision: wanted {name:?}, found {:?}", link.name);
        return Ok(None);
    }
    Ok(Some(link))
}

// ---------------------------------------------------------------------------
// v0 resolver
// ---------------------------------------------------------------------------

/// The container a v0 resolution step works from.
#[derive(Clone)]
enum Container<'f> {
    Entry(SymbolTableEntry<'f>),
    Header(ObjectHeader<'f>),
}

impl<'f> Container<'f> {
    fn object_header(&self) -> Result<ObjectHeader<'f>> {
        match self {
            Container::Entry(e) => e.object_header(),
            Container::Header(h) => Ok(h.clone()),
        }
    }

    /// B-tree and heap addresses when this container is an old-style
    /// group: from the entry's cached scratch space, or from a symbol
    /// table message in the object header.
    fn group_addresses(&self) -> Result<Option<(u64, u64)>> {
        if let Container::Entry(e) = self {
            if e.cache_type() == CacheType::Group {
                return Ok(Some((e.btree_address()?, e.heap_address()?)));
            }
        }
        let header = self.object_header()?;
        match header.find(MSG_SYMBOL_TABLE) {
            Some(msg) => {
                let stab = SymbolTableMsg::parse(msg.body)?;
                Ok(Some((stab.btree_address, stab.heap_address)))
            }
            None => Ok(None),
        }
    }
}

/// Path resolver for superblock-v0 files, seeded with the root group's
/// symbol table entry.
pub struct ResolverV0<'f> {
    data: &'f [u8],
    root: SymbolTableEntry<'f>,
}

impl<'f> ResolverV0<'f> {
    pub fn new(data: &'f [u8], root: SymbolTableEntry<'f>) -> Self {
        ResolverV0 { data, root }
    }

    pub fn resolve(&self, path: &H5Path) -> Result<ResolvedPath<'f>> {
        self.resolve_in(Container::Entry(self.root), path, 0)
    }

    fn resolve_in(
        &self,
        container: Container<'f>,
        path: &H5Path,
        depth: usize,
    ) -> Result<ResolvedPath<'f>> {
        if depth > MAX_LINK_DEPTH {
            return Err(Error::CorruptFile("link chain nests too deeply".into()));
        }
        let mut parent = if path.is_absolute() {
            Container::Entry(self.root)
        } else {
            container
        };
        let components = path.components();
        for (idx, name) in components.iter().enumerate() {
            let remaining = || H5Path::from_components(&components[idx + 1..]);
            debug!("v0 resolve step {idx}: {name}");

            // Old-style group lookup first.
            if let Some((btree_address, heap_address)) = parent.group_addresses()? {
                let heap = LocalHeap::parse(self.data, heap_address)?;
                match btree_v1::find_link(self.data, btree_address, &heap, name)? {
                    Some(entry) if entry.cache_type() == CacheType::Link => {
                        // Cached symbolic link: its value lives in the
                        // group's local heap.
                        let target = heap.string_at(entry.link_value_offset()? as u64)?;
                        let rewritten = H5Path::new(target).join(&remaining());
                        debug!("v0 cached link {name} -> {rewritten}");
                        return self.resolve_in(parent, &rewritten, depth + 1);
                    }
                    Some(entry) => {
                        parent = Container::Entry(entry);
                        continue;
                    }
                    None => {}
                }
            }

            // Fall back to link messages in the object header.
            let header = parent.object_header()?;
            let link = find_link_in_header(self.data, &header, name)?
                .ok_or_else(|| Error::PathNotFound(name.clone()))?;
            match link.target {
                LinkTarget::Hard { address } => {
                    parent = Container::Header(ObjectHeader::parse(self.data, address)?);
                }
                LinkTarget::Soft { path: target } => {
                    let rewritten = H5Path::new(&target).join(&remaining());
                    debug!("v0 soft link {name} -> {rewritten}");
                    return self.resolve_in(parent, &rewritten, depth + 1);
                }
                LinkTarget::External { file, path: target } => {
                    return Ok(ResolvedPath::External {
                        file,
                        path: H5Path::new(&target).join(&remaining()),
                    });
                }
            }
        }
        Ok(ResolvedPath::Object(parent.object_header()?))
    }
}

// ---------------------------------------------------------------------------
// v2 resolver
// ---------------------------------------------------------------------------

/// Path resolver for superblock-v2/v3 files, seeded with the root
/// group's object header.
pub struct ResolverV2<'f> {
    data: &'f [u8],
    root: ObjectHeader<'f>,
}

impl<'f> ResolverV2<'f> {
    pub fn new(data: &'f [u8], root: ObjectHeader<'f>) -> Self {
        ResolverV2 { data, root }
    }

    pub fn resolve(&self, path: &H5Path) -> Result<ResolvedPath<'f>> {
        self.resolve_in(self.root.clone(), path, 0)
    }

    fn resolve_in(
        &self,
        container: ObjectHeader<'f>,
        path: &H5Path,
        depth: usize,
    ) -> Result<ResolvedPath<'f>> {
        if depth > MAX_LINK_DEPTH {
            return Err(Error::CorruptFile("link chain nests too deeply".into()));
        }
        let mut parent = if path.is_absolute() {
            self.root.clone()
        } else {
            container
        };
        let components = path.components();
        for (idx, name) in components.iter().enumerate() {
            let remaining = || H5Path::from_components(&components[idx + 1..]);
            debug!("v2 resolve step {idx}: {name}");
            let link = find_link_in_header(self.data, &parent, name)?
                .ok_or_else(|| Error::PathNotFound(name.clone()))?;
            match link.target {
                LinkTarget::Hard { address } => {
                    parent = ObjectHeader::parse(self.data, address)?;
                }
                LinkTarget::Soft { path: target } => {
                    // Soft links resolve relative to the group that
                    // defines them, not to their target.
                    let rewritten = H5Path::new(&target).join(&remaining());
                    debug!("v2 soft link {name} -> {rewritten}");
                    return self.resolve_in(parent, &rewritten, depth + 1);
                }
                LinkTarget::External { file, path: target } => {
                    return Ok(ResolvedPath::External {
                        file,
                        path: H5Path::new(&target).join(&remaining()),
                    });
                }
            }
        }
        Ok(ResolvedPath::Object(parent))
    }
}
