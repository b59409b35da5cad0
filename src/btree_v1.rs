//! Version 1 B-trees ("TREE"): the link index of old-style groups and
//! the chunk index of v3 chunked datasets.
//!
//! Both uses share the node shape (type, level, entry count, sibling
//! pointers, interleaved keys and child pointers); they differ in the
//! key format and the comparison rule.

use crate::error::{Error, Result};
use crate::local_heap::LocalHeap;
use crate::symbol_table::{SymbolTableEntry, SymbolTableNode};
use crate::view::ByteView;

pub const SIG_TREE: &[u8; 4] = b"TREE";

const NODE_HEADER: usize = 24; // signature, type, level, entries, two siblings

/// Node types stored in the on-disk header.
const NODE_TYPE_GROUP: u8 = 0;
const NODE_TYPE_CHUNK: u8 = 1;

/// The located raw bytes of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub address: u64,
    /// On-disk (possibly compressed) byte count.
    pub stored_size: u32,
    pub filter_mask: u32,
}

struct Node<'f> {
    view: ByteView<'f>,
    level: u8,
    entries: usize,
}

fn parse_node<'f>(data: &'f [u8], address: u64, expected_type: u8) -> Result<Node<'f>> {
    let view = ByteView::new(data, address)?;
    view.check_signature(0, SIG_TREE)?;
    let node_type = view.read_u8(4)?;
    if node_type != expected_type {
        return Err(Error::CorruptFile(format!(
            "B-tree node at 0x{address:x} has type {node_type}, expected {expected_type}"
        )));
    }
    let level = view.read_u8(5)?;
    let entries = view.read_u16(6)? as usize;
    Ok(Node {
        view,
        level,
        entries,
    })
}

// ---------------------------------------------------------------------------
// Group-name lookup
// ---------------------------------------------------------------------------

/// Looks up `name` in an old-style group B-tree.
///
/// Returns `Ok(None)` when the name is simply absent — the resolver
/// falls back to scanning the object header in that case. Structural
/// breakage is `CorruptFile`.
pub fn find_link<'f>(
    data: &'f [u8],
    btree_address: u64,
    heap: &LocalHeap<'f>,
    name: &str,
) -> Result<Option<SymbolTableEntry<'f>>> {
    let mut node = parse_node(data, btree_address, NODE_TYPE_GROUP)?;

    // Group keys are heap offsets of names; entry i sits between key i
    // and key i+1. Descend along the last child whose right key bounds
    // the target.
    while node.level > 0 {
        let mut descended = false;
        for i in 1..=node.entries {
            let key_offset = node.view.read_u64(NODE_HEADER + i * 16)?;
            let key = heap.string_at(key_offset)?;
            if name <= key {
                let child = node.view.read_u64(NODE_HEADER + 8 + (i - 1) * 16)?;
                node = parse_node(data, child, NODE_TYPE_GROUP)?;
                descended = true;
                break;
            }
        }
        if !descended {
            return Ok(None); // greater than every key in the tree
        }
    }

    let mut snod_address = None;
    for i in 1..=node.entries {
        let key_offset = node.view.read_u64(NODE_HEADER + i * 16)?;
        if name <= heap.string_at(key_offset)? {
            snod_address = Some(node.view.read_u64(NODE_HEADER + 8 + (i - 1) * 16)?);
            break;
        }
    }
    let Some(snod_address) = snod_address else {
        return Ok(None);
    };

    let snod = SymbolTableNode::parse(data, snod_address)?;
    for i in 0..snod.len() {
        let entry = snod.entry(i)?;
        if heap.string_at(entry.name_offset()?)? == name {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Chunk lookup
// ---------------------------------------------------------------------------

/// True if `a >= b` comparing dimension offsets from the last backward.
fn offsets_ge(a: &[u64], b: &[u64]) -> bool {
    for i in (0..a.len()).rev() {
        if a[i] < b[i] {
            return false;
        }
        if a[i] > b[i] {
            return true;
        }
    }
    true
}

/// Looks up the chunk whose offset tuple equals `offsets` (already
/// padded to the on-disk key dimensionality).
pub fn find_chunk(data: &[u8], btree_address: u64, offsets: &[u64]) -> Result<Option<ChunkLocation>> {
    let ndims = offsets.len();
    let key_size = 8 + ndims * 8;
    let stride = key_size + 8;
    let mut node = parse_node(data, btree_address, NODE_TYPE_CHUNK)?;

    let read_key = |node: &Node<'_>, i: usize| -> Result<Vec<u64>> {
        let base = NODE_HEADER + i * stride + 8;
        let mut key = Vec::with_capacity(ndims);
        for d in 0..ndims {
            key.push(node.view.read_u64(base + d * 8)?);
        }
        Ok(key)
    };

    while node.level > 0 {
        let mut descended = false;
        for i in (0..node.entries).rev() {
            let key = read_key(&node, i)?;
            if offsets_ge(offsets, &key) {
                let child = node.view.read_u64(NODE_HEADER + i * stride + key_size)?;
                node = parse_node(data, child, NODE_TYPE_CHUNK)?;
                descended = true;
                break;
            }
        }
        if !descended {
            return Ok(None); // below the smallest key in the tree
        }
    }

    for i in 0..node.entries {
        let key = read_key(&node, i)?;
        if key == offsets {
            let base = NODE_HEADER + i * stride;
            return Ok(Some(ChunkLocation {
                address: node.view.read_u64(base + key_size)?,
                stored_size: node.view.read_u32(base)?,
                filter_mask: node.view.read_u32(base + 4)?,
            }));
        }
    }
    Ok(None)
}
