//! Version 2 B-trees ("BTHD"): record-generic index used for dense
//! group links (type 5, keyed by name hash) and v4 chunk indices
//! (types 10 and 11, keyed by chunk offset tuples).
//!
//! Node capacities are not stored per node; they are derived from the
//! header's node size and record size, and the per-depth widths of the
//! child-pointer count fields are computed from the record maxima.

use crate::checksum::name_hash;
use crate::error::{Error, Result};
use crate::view::ByteView;

pub const SIG_BTHD: &[u8; 4] = b"BTHD";
pub const SIG_BTLF: &[u8; 4] = b"BTLF";
pub const SIG_BTIN: &[u8; 4] = b"BTIN";

/// Link-name index records: hash + fractal heap id.
pub const TREE_TYPE_NAME_INDEX: u8 = 5;
/// Chunk records without filters: address + offsets.
pub const TREE_TYPE_CHUNK: u8 = 10;
/// Chunk records with filters: address + size + mask + offsets.
pub const TREE_TYPE_CHUNK_FILTERED: u8 = 11;

/// Signature, version, type and trailing checksum of every node.
const NODE_OVERHEAD: usize = 10;
/// Records start right after signature + version + type.
const RECORDS_OFFSET: usize = 6;

/// Bytes needed to store `value` as an unsigned little-endian integer.
///
/// Equivalent to `floor(log2(v)/8) + 1` but computed on integers, and
/// total at zero.
fn bytes_needed(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    (64 - value.leading_zeros() as usize - 1) / 8 + 1
}

/// A chunk record found in a type 10/11 tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeV2Chunk {
    pub address: u64,
    /// Stored byte count; only filtered records (type 11) carry one.
    pub stored_size: Option<u64>,
    pub filter_mask: u32,
}

#[derive(Clone, Copy)]
struct Node<'f> {
    view: ByteView<'f>,
    num_records: usize,
    depth: usize,
}

/// A parsed v2 B-tree header with the derived sizing tables.
pub struct BTreeV2<'f> {
    data: &'f [u8],
    pub tree_type: u8,
    pub record_size: usize,
    root_address: u64,
    records_in_root: usize,
    pub total_records: u64,
    depth: usize,
    num_records_width: usize,
    /// Width of the cumulative-count field, indexed by child depth.
    total_records_width: Vec<usize>,
}

impl<'f> BTreeV2<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        view.check_signature(0, SIG_BTHD)?;
        let version = view.read_u8(4)?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "v2 B-tree header",
                version,
            });
        }
        let tree_type = view.read_u8(5)?;
        let node_size = view.read_u32(6)? as usize;
        let record_size = view.read_u16(10)? as usize;
        let depth = view.read_u16(12)? as usize;
        let root_address = view.read_u64(16)?;
        let records_in_root = view.read_u16(24)? as usize;
        let total_records = view.read_u64(26)?;

        if record_size == 0 || node_size <= NODE_OVERHEAD + record_size {
            return Err(Error::CorruptFile(format!(
                "implausible v2 B-tree geometry: node {node_size}, record {record_size}"
            )));
        }

        let max_leaf_records = ((node_size - NODE_OVERHEAD) / record_size) as u64;
        let num_records_width = bytes_needed(max_leaf_records);

        let mut total_records_width = vec![0usize; depth + 1];
        if depth > 1 {
            let mut cumulative_max = max_leaf_records;
            for d in 2..=depth {
                let child_multiplet = 8 + num_records_width + total_records_width[d - 1];
                let usable = node_size
                    .checked_sub(NODE_OVERHEAD + child_multiplet)
                    .ok_or_else(|| {
                        Error::CorruptFile(format!(
                            "v2 B-tree node size {node_size} cannot hold depth-{d} pointers"
                        ))
                    })?;
                let max_records = usable as u64 / (record_size + child_multiplet) as u64;
                cumulative_max = (max_records + 1) * cumulative_max + max_records;
                total_records_width[d] = bytes_needed(cumulative_max);
            }
        }

        Ok(BTreeV2 {
            data,
            tree_type,
            record_size,
            root_address,
            records_in_root,
            total_records,
            depth,
            num_records_width,
            total_records_width,
        })
    }

    fn root(&self) -> Result<Node<'f>> {
        let view = ByteView::new(self.data, self.root_address)?;
        let sig = if self.depth == 0 { SIG_BTLF } else { SIG_BTIN };
        view.check_signature(0, sig)?;
        Ok(Node {
            view,
            num_records: self.records_in_root,
            depth: self.depth,
        })
    }

    /// Width of one child-pointer multiplet below a node at `depth`.
    fn multiplet_size(&self, depth: usize) -> usize {
        8 + self.num_records_width + self.total_records_width[depth]
    }

    fn child(&self, parent: &Node<'f>, i: usize) -> Result<Node<'f>> {
        let base = RECORDS_OFFSET
            + self.record_size * parent.num_records
            + i * self.multiplet_size(parent.depth);
        let address = parent.view.read_u64(base)?;
        let num_records = parent
            .view
            .read_uint(base + 8, self.num_records_width)? as usize;
        let view = ByteView::new(self.data, address)?;
        let sig = if parent.depth == 1 { SIG_BTLF } else { SIG_BTIN };
        view.check_signature(0, sig)?;
        Ok(Node {
            view,
            num_records,
            depth: parent.depth - 1,
        })
    }

    fn child_total_records(&self, parent: &Node<'f>, i: usize) -> Result<u64> {
        if parent.depth == 1 {
            let base = RECORDS_OFFSET
                + self.record_size * parent.num_records
                + i * self.multiplet_size(parent.depth);
            return self
                .parent_count(parent, base + 8, self.num_records_width);
        }
        let base = RECORDS_OFFSET
            + self.record_size * parent.num_records
            + i * self.multiplet_size(parent.depth)
            + 8
            + self.num_records_width;
        self.parent_count(parent, base, self.total_records_width[parent.depth])
    }

    fn parent_count(&self, parent: &Node<'f>, offset: usize, width: usize) -> Result<u64> {
        parent.view.read_uint(offset, width)
    }

    fn record_address(&self, node: &Node<'f>, i: usize) -> u64 {
        node.view.base() + (RECORDS_OFFSET + i * self.record_size) as u64
    }

    /// Address of the `index`-th record, counting a node's own records
    /// before descending into its children.
    pub fn record_address_by_index(&self, index: u64) -> Result<u64> {
        let root = self.root()?;
        self.record_by_index_in(&root, index)
    }

    fn record_by_index_in(&self, node: &Node<'f>, index: u64) -> Result<u64> {
        if index < node.num_records as u64 {
            return Ok(self.record_address(node, index as usize));
        }
        if node.depth == 0 {
            return Err(Error::CorruptFile(format!(
                "v2 B-tree record index {index} beyond leaf capacity"
            )));
        }
        let mut lower = node.num_records as u64;
        for i in 0..=node.num_records {
            let upper = lower + self.child_total_records(node, i)?;
            if index < upper {
                let child = self.child(node, i)?;
                return self.record_by_index_in(&child, index - lower);
            }
            lower = upper;
        }
        Err(Error::CorruptFile(
            "v2 B-tree cumulative record counts do not cover the index".into(),
        ))
    }

    /// Address of the record whose leading u32 equals the lookup3 hash
    /// of `name`, or `None` if no branch holds it.
    pub fn record_address_by_name(&self, name: &str) -> Result<Option<u64>> {
        if self.tree_type != TREE_TYPE_NAME_INDEX {
            return Err(Error::UnsupportedBTreeType(self.tree_type));
        }
        let root = self.root()?;
        self.record_by_hash_in(&root, name_hash(name))
    }

    fn record_by_hash_in(&self, node: &Node<'f>, hash: u32) -> Result<Option<u64>> {
        for i in 0..node.num_records {
            let record_hash = node.view.read_u32(RECORDS_OFFSET + i * self.record_size)?;
            if hash < record_hash {
                if node.depth == 0 {
                    return Ok(None);
                }
                let child = self.child(node, i)?;
                return self.record_by_hash_in(&child, hash);
            }
            if hash == record_hash {
                return Ok(Some(self.record_address(node, i)));
            }
        }
        if node.depth == 0 {
            return Ok(None);
        }
        let child = self.child(node, node.num_records)?;
        self.record_by_hash_in(&child, hash)
    }

    /// Looks up the chunk record whose offset tuple equals `offsets`.
    /// Only tree types 10 and 11 store chunk records.
    pub fn find_chunk(&self, offsets: &[u64]) -> Result<Option<BTreeV2Chunk>> {
        if self.tree_type != TREE_TYPE_CHUNK && self.tree_type != TREE_TYPE_CHUNK_FILTERED {
            return Err(Error::UnsupportedBTreeType(self.tree_type));
        }
        let ndims = offsets.len();
        let size_width = if self.tree_type == TREE_TYPE_CHUNK_FILTERED {
            let fixed = 8 + 4 + ndims * 8;
            self.record_size
                .checked_sub(fixed)
                .filter(|w| (1..=8).contains(w))
                .ok_or_else(|| {
                    Error::CorruptFile(format!(
                        "filtered chunk record size {} cannot hold {ndims} dimensions",
                        self.record_size
                    ))
                })?
        } else {
            if self.record_size != 8 + ndims * 8 {
                return Err(Error::CorruptFile(format!(
                    "chunk record size {} does not match {ndims} dimensions",
                    self.record_size
                )));
            }
            0
        };
        let root = self.root()?;
        self.chunk_in(&root, offsets, size_width)
    }

    fn chunk_offsets(&self, node: &Node<'f>, i: usize, ndims: usize, size_width: usize) -> Result<Vec<u64>> {
        let mut base = RECORDS_OFFSET + i * self.record_size + 8;
        if size_width > 0 {
            base += size_width + 4;
        }
        let mut offs = Vec::with_capacity(ndims);
        for d in 0..ndims {
            offs.push(node.view.read_u64(base + d * 8)?);
        }
        Ok(offs)
    }

    fn chunk_in(
        &self,
        node: &Node<'f>,
        offsets: &[u64],
        size_width: usize,
    ) -> Result<Option<BTreeV2Chunk>> {
        for i in 0..node.num_records {
            let record = self.chunk_offsets(node, i, offsets.len(), size_width)?;
            match cmp_offsets(offsets, &record) {
                std::cmp::Ordering::Less => {
                    if node.depth == 0 {
                        return Ok(None);
                    }
                    let child = self.child(node, i)?;
                    return self.chunk_in(&child, offsets, size_width);
                }
                std::cmp::Ordering::Equal => {
                    let base = RECORDS_OFFSET + i * self.record_size;
                    let address = node.view.read_u64(base)?;
                    let (stored_size, filter_mask) = if size_width > 0 {
                        (
                            Some(node.view.read_uint(base + 8, size_width)?),
                            node.view.read_u32(base + 8 + size_width)?,
                        )
                    } else {
                        (None, 0)
                    };
                    return Ok(Some(BTreeV2Chunk {
                        address,
                        stored_size,
                        filter_mask,
                    }));
                }
                std::cmp::Ordering::Greater => continue,
            }
        }
        if node.depth == 0 {
            return Ok(None);
        }
        let child = self.child(node, node.num_records)?;
        self.chunk_in(&child, offsets, size_width)
    }
}

/// Compares offset tuples from the last dimension backward, the order
/// chunk keys are sorted in on disk.
fn cmp_offsets(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    for i in (0..a.len()).rev() {
        match a[i].cmp(&b[i]) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}
