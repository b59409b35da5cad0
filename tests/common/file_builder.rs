//! Builders for synthetic in-memory HDF5 file images.
//!
//! Each builder writes exactly the structures the decoder reads:
//! superblocks v0/v2/v3, v1/v2 object headers, old-style groups
//! (TREE/SNOD/HEAP), new-style compact and dense groups, chunked
//! datasets with every supported chunk index, and the LZ4 and
//! bitshuffle+LZ4 chunk containers.

#![allow(dead_code)]

use std::collections::BTreeMap;

use h5view::checksum::lookup3;

pub const UNDEF: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Compression containers
// ---------------------------------------------------------------------------

fn push_be_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Encodes the LZ4 block-stream container: 8-byte BE total, 4-byte BE
/// block size, then per-block [BE compressed size][payload]. Blocks
/// that do not shrink are stored raw.
pub fn lz4_container(raw: &[u8], block_bytes: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(raw.len() as u64).to_be_bytes());
    push_be_u32(&mut out, block_bytes as u32);
    for block in raw.chunks(block_bytes) {
        let compressed = lz4_flex::block::compress(block);
        if compressed.len() >= block.len() {
            push_be_u32(&mut out, block.len() as u32);
            out.extend_from_slice(block);
        } else {
            push_be_u32(&mut out, compressed.len() as u32);
            out.extend_from_slice(&compressed);
        }
    }
    out
}

/// Forward bitshuffle of one block (`n_elems` must be a multiple of 8).
fn transpose_bits(raw: &[u8], n_elems: usize, elem_size: usize) -> Vec<u8> {
    assert_eq!(n_elems % 8, 0);
    let nb = n_elems / 8;
    let mut out = vec![0u8; raw.len()];
    for i in 0..n_elems {
        for j in 0..elem_size {
            let byte = raw[i * elem_size + j];
            for b in 0..8 {
                if byte >> b & 1 != 0 {
                    out[(j * 8 + b) * nb + i / 8] |= 1 << (i % 8);
                }
            }
        }
    }
    out
}

/// Encodes the bitshuffle+LZ4 container.
pub fn bshuf_lz4_container(raw: &[u8], elem_size: usize, block_bytes: usize) -> Vec<u8> {
    assert_eq!(raw.len() % elem_size, 0);
    assert_eq!((block_bytes / elem_size) % 8, 0);
    let total_elems = raw.len() / elem_size;
    let elems_per_block = block_bytes / elem_size;

    let mut out = Vec::new();
    out.extend_from_slice(&(raw.len() as u64).to_be_bytes());
    push_be_u32(&mut out, block_bytes as u32);

    let mut push_block = |out: &mut Vec<u8>, start: usize, n: usize| {
        let plain = &raw[start * elem_size..(start + n) * elem_size];
        let shuffled = transpose_bits(plain, n, elem_size);
        let compressed = lz4_flex::block::compress(&shuffled);
        push_be_u32(out, compressed.len() as u32);
        out.extend_from_slice(&compressed);
    };

    let mut done = 0usize;
    while total_elems - done >= elems_per_block {
        push_block(&mut out, done, elems_per_block);
        done += elems_per_block;
    }
    let tail = (total_elems - done) & !7;
    if tail > 0 {
        push_block(&mut out, done, tail);
        done += tail;
    }
    out.extend_from_slice(&raw[done * elem_size..]);
    out
}

// ---------------------------------------------------------------------------
// File image with a bump allocator
// ---------------------------------------------------------------------------

/// A growable file image. The first 0x800 bytes are reserved for the
/// superblock; everything else is bump-allocated.
pub struct FileImage {
    pub buf: Vec<u8>,
    next: usize,
}

impl FileImage {
    pub fn new() -> Self {
        FileImage {
            buf: vec![0u8; 0x800],
            next: 0x800,
        }
    }

    pub fn alloc(&mut self, size: usize) -> usize {
        let at = self.next;
        let end = at + size;
        if self.buf.len() < end {
            self.buf.resize(end.next_multiple_of(0x100), 0);
        }
        self.next = end.next_multiple_of(8);
        at
    }

    pub fn write(&mut self, at: usize, bytes: &[u8]) {
        if self.buf.len() < at + bytes.len() {
            self.buf.resize((at + bytes.len()).next_multiple_of(0x100), 0);
        }
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn put(&mut self, bytes: &[u8]) -> u64 {
        let at = self.alloc(bytes.len());
        self.write(at, bytes);
        at as u64
    }
}

impl Default for FileImage {
    fn default() -> Self {
        FileImage::new()
    }
}

// ---------------------------------------------------------------------------
// Header messages
// ---------------------------------------------------------------------------

pub const MSG_DATASPACE: u16 = 0x01;
pub const MSG_LINK_INFO: u16 = 0x02;
pub const MSG_DATATYPE: u16 = 0x03;
pub const MSG_LINK: u16 = 0x06;
pub const MSG_DATA_LAYOUT: u16 = 0x08;
pub const MSG_FILTER_PIPELINE: u16 = 0x0B;
pub const MSG_SYMBOL_TABLE: u16 = 0x11;

pub const FILTER_LZ4: u16 = 32004;
pub const FILTER_BITSHUFFLE: u16 = 32008;

pub fn dataspace_v1(dims: &[u64]) -> Vec<u8> {
    let mut body = vec![1u8, dims.len() as u8, 0, 0, 0, 0, 0, 0];
    for &d in dims {
        body.extend_from_slice(&d.to_le_bytes());
    }
    body
}

pub fn dataspace_v2(dims: &[u64]) -> Vec<u8> {
    let mut body = vec![2u8, dims.len() as u8, 0, 1];
    for &d in dims {
        body.extend_from_slice(&d.to_le_bytes());
    }
    body
}

pub fn datatype_fixed(size: u32, signed: bool) -> Vec<u8> {
    let mut body = vec![0x10u8, if signed { 0x08 } else { 0x00 }, 0, 0];
    body.extend_from_slice(&size.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes()); // bit offset
    body.extend_from_slice(&((size * 8) as u16).to_le_bytes()); // precision
    body.extend_from_slice(&[0u8; 4]);
    body
}

pub fn datatype_float(size: u32) -> Vec<u8> {
    let mut body = vec![0x11u8, 0x20, 0x3F, 0x00];
    body.extend_from_slice(&size.to_le_bytes());
    body.extend_from_slice(&[0u8; 8]); // float properties, unread
    body
}

pub fn layout_v3_contiguous(address: u64, size: u64) -> Vec<u8> {
    let mut body = vec![3u8, 1];
    body.extend_from_slice(&address.to_le_bytes());
    body.extend_from_slice(&size.to_le_bytes());
    body
}

pub fn layout_v3_chunked(btree_address: u64, dims_with_elem: &[u64]) -> Vec<u8> {
    let mut body = vec![3u8, 2, dims_with_elem.len() as u8];
    body.extend_from_slice(&btree_address.to_le_bytes());
    for &d in dims_with_elem {
        body.extend_from_slice(&(d as u32).to_le_bytes());
    }
    body
}

pub fn layout_v4_chunked(index_type: u8, index_address: u64, dims_with_elem: &[u64]) -> Vec<u8> {
    let mut body = vec![4u8, 2, 0, dims_with_elem.len() as u8, 8];
    for &d in dims_with_elem {
        body.extend_from_slice(&d.to_le_bytes());
    }
    body.push(index_type);
    match index_type {
        3 => body.push(10), // page bits
        4 => body.extend_from_slice(&[32, 16, 4, 16, 10]), // creation parameters
        5 => {
            body.extend_from_slice(&2048u32.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.push(100);
            body.push(40);
        }
        _ => panic!("unsupported index type in builder"),
    }
    body.extend_from_slice(&index_address.to_le_bytes());
    body
}

pub fn filter_pipeline_v1(id: u16, name: &str, client_data: &[i32]) -> Vec<u8> {
    let mut body = vec![1u8, 1, 0, 0, 0, 0, 0, 0];
    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    while name_bytes.len() % 8 != 0 {
        name_bytes.push(0);
    }
    body.extend_from_slice(&id.to_le_bytes());
    body.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes()); // flags: optional
    body.extend_from_slice(&(client_data.len() as u16).to_le_bytes());
    body.extend_from_slice(&name_bytes);
    for &v in client_data {
        body.extend_from_slice(&v.to_le_bytes());
    }
    if client_data.len() % 2 == 1 {
        body.extend_from_slice(&[0u8; 4]);
    }
    body
}

pub fn filter_pipeline_v2(id: u16, name: &str, client_data: &[i32]) -> Vec<u8> {
    let mut body = vec![2u8, 1];
    body.extend_from_slice(&id.to_le_bytes());
    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    if id >= 256 {
        body.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    } else {
        name_bytes.clear();
    }
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&(client_data.len() as u16).to_le_bytes());
    body.extend_from_slice(&name_bytes);
    for &v in client_data {
        body.extend_from_slice(&v.to_le_bytes());
    }
    body
}

/// Client data of the lz4 filter: nominal block size.
pub fn lz4_filter_v1(block_bytes: usize) -> Vec<u8> {
    filter_pipeline_v1(FILTER_LZ4, "lz4", &[block_bytes as i32])
}

/// Client data of the bitshuffle filter: version pair, element size,
/// block size in elements, inner compressor (2 = LZ4).
pub fn bshuf_filter_v1(elem_size: usize, block_bytes: usize) -> Vec<u8> {
    filter_pipeline_v1(
        FILTER_BITSHUFFLE,
        "bshuf",
        &[0, 3, elem_size as i32, (block_bytes / elem_size) as i32, 2],
    )
}

pub fn lz4_filter_v2(block_bytes: usize) -> Vec<u8> {
    filter_pipeline_v2(FILTER_LZ4, "lz4", &[block_bytes as i32])
}

pub fn bshuf_filter_v2(elem_size: usize, block_bytes: usize) -> Vec<u8> {
    filter_pipeline_v2(
        FILTER_BITSHUFFLE,
        "bshuf",
        &[0, 3, elem_size as i32, (block_bytes / elem_size) as i32, 2],
    )
}

pub fn symbol_table_msg(btree: u64, heap: u64) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&btree.to_le_bytes());
    body.extend_from_slice(&heap.to_le_bytes());
    body
}

pub fn link_info_msg(heap: u64, btree: u64) -> Vec<u8> {
    let mut body = vec![0u8, 0];
    body.extend_from_slice(&heap.to_le_bytes());
    body.extend_from_slice(&btree.to_le_bytes());
    body
}

pub fn link_msg_hard(name: &str, address: u64) -> Vec<u8> {
    let mut body = vec![1u8, 0x08, 0x00];
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(&address.to_le_bytes());
    body
}

pub fn link_msg_soft(name: &str, target: &str) -> Vec<u8> {
    let mut body = vec![1u8, 0x08, 0x01];
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(&(target.len() as u16).to_le_bytes());
    body.extend_from_slice(target.as_bytes());
    body
}

pub fn link_msg_external(name: &str, file: &str, path: &str) -> Vec<u8> {
    let mut body = vec![1u8, 0x08, 64];
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    let value_len = 1 + file.len() + 1 + path.len() + 1;
    body.extend_from_slice(&(value_len as u16).to_le_bytes());
    body.push(0); // external link version/flags marker
    body.extend_from_slice(file.as_bytes());
    body.push(0);
    body.extend_from_slice(path.as_bytes());
    body.push(0);
    body
}

// ---------------------------------------------------------------------------
// Object headers
// ---------------------------------------------------------------------------

/// Writes a v1 object header; message bodies are padded to 8 bytes.
pub fn object_header_v1(img: &mut FileImage, messages: &[(u16, Vec<u8>)]) -> u64 {
    let mut msg_bytes = Vec::new();
    for (msg_type, body) in messages {
        let mut body = body.clone();
        while body.len() % 8 != 0 {
            body.push(0);
        }
        msg_bytes.extend_from_slice(&msg_type.to_le_bytes());
        msg_bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
        msg_bytes.push(0);
        msg_bytes.extend_from_slice(&[0, 0, 0]);
        msg_bytes.extend_from_slice(&body);
    }
    let mut header = Vec::with_capacity(16 + msg_bytes.len());
    header.push(1);
    header.push(0);
    header.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&(msg_bytes.len() as u32).to_le_bytes());
    header.extend_from_slice(&[0u8; 4]);
    header.extend_from_slice(&msg_bytes);
    img.put(&header)
}

/// Writes a v2 ("OHDR") object header.
pub fn object_header_v2(img: &mut FileImage, messages: &[(u16, Vec<u8>)]) -> u64 {
    let mut msg_bytes = Vec::new();
    for (msg_type, body) in messages {
        msg_bytes.push(*msg_type as u8);
        msg_bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
        msg_bytes.push(0);
        msg_bytes.extend_from_slice(body);
    }
    let (flags, size_field): (u8, Vec<u8>) = if msg_bytes.len() <= u8::MAX as usize {
        (0x00, vec![msg_bytes.len() as u8])
    } else {
        (0x01, (msg_bytes.len() as u16).to_le_bytes().to_vec())
    };
    let mut header = Vec::new();
    header.extend_from_slice(b"OHDR");
    header.push(2);
    header.push(flags);
    header.extend_from_slice(&size_field);
    header.extend_from_slice(&msg_bytes);
    let checksum = lookup3(&header, 0);
    header.extend_from_slice(&checksum.to_le_bytes());
    img.put(&header)
}

// ---------------------------------------------------------------------------
// Old-style (v0) groups
// ---------------------------------------------------------------------------

pub struct GroupV0 {
    pub header: u64,
    pub btree: u64,
    pub heap: u64,
}

pub enum V0Child {
    Group(String, GroupV0),
    Object(String, u64),
    SoftLink(String, String),
}

impl V0Child {
    fn name(&self) -> &str {
        match self {
            V0Child::Group(n, _) | V0Child::Object(n, _) | V0Child::SoftLink(n, _) => n,
        }
    }
}

/// Builds an old-style group: local heap, one symbol table node, a
/// single-leaf v1 B-tree, and the group's object header. Extra raw
/// messages (e.g. link messages) can be appended to the header.
pub fn group_v0(
    img: &mut FileImage,
    children: Vec<V0Child>,
    extra_messages: &[(u16, Vec<u8>)],
) -> GroupV0 {
    let mut children = children;
    children.sort_by(|a, b| a.name().cmp(b.name()));

    // Heap data segment: the empty string, child names, link targets.
    let mut segment = vec![0u8];
    let mut name_offsets = BTreeMap::new();
    for child in &children {
        name_offsets.insert(child.name().to_string(), segment.len() as u64);
        segment.extend_from_slice(child.name().as_bytes());
        segment.push(0);
    }
    let mut target_offsets = BTreeMap::new();
    for child in &children {
        if let V0Child::SoftLink(name, target) = child {
            target_offsets.insert(name.clone(), segment.len() as u64);
            segment.extend_from_slice(target.as_bytes());
            segment.push(0);
        }
    }
    let segment_addr = img.put(&segment);

    let mut heap_header = Vec::new();
    heap_header.extend_from_slice(b"HEAP");
    heap_header.extend_from_slice(&[0, 0, 0, 0]);
    heap_header.extend_from_slice(&(segment.len() as u64).to_le_bytes());
    heap_header.extend_from_slice(&UNDEF.to_le_bytes());
    heap_header.extend_from_slice(&segment_addr.to_le_bytes());
    let heap = img.put(&heap_header);

    // Symbol table node with all children.
    let mut snod = Vec::new();
    snod.extend_from_slice(b"SNOD");
    snod.push(1);
    snod.push(0);
    snod.extend_from_slice(&(children.len() as u16).to_le_bytes());
    for child in &children {
        let name_offset = name_offsets[child.name()];
        let (header, cache, scratch0, scratch1) = match child {
            V0Child::Group(_, g) => (g.header, 1u32, g.btree, g.heap),
            V0Child::Object(_, header) => (*header, 0, 0, 0),
            V0Child::SoftLink(name, _) => (UNDEF, 2, target_offsets[name], 0),
        };
        snod.extend_from_slice(&name_offset.to_le_bytes());
        snod.extend_from_slice(&header.to_le_bytes());
        snod.extend_from_slice(&cache.to_le_bytes());
        snod.extend_from_slice(&0u32.to_le_bytes());
        snod.extend_from_slice(&scratch0.to_le_bytes());
        snod.extend_from_slice(&scratch1.to_le_bytes());
    }
    let snod_addr = img.put(&snod);

    // Single-leaf B-tree: the right key bounds every stored name.
    let max_name_offset = children
        .last()
        .map(|c| name_offsets[c.name()])
        .unwrap_or(0);
    let mut tree = Vec::new();
    tree.extend_from_slice(b"TREE");
    tree.push(0); // group node
    tree.push(0); // leaf
    tree.extend_from_slice(&1u16.to_le_bytes());
    tree.extend_from_slice(&UNDEF.to_le_bytes());
    tree.extend_from_slice(&UNDEF.to_le_bytes());
    tree.extend_from_slice(&0u64.to_le_bytes()); // left key: the empty string
    tree.extend_from_slice(&snod_addr.to_le_bytes());
    tree.extend_from_slice(&max_name_offset.to_le_bytes());
    let btree = img.put(&tree);

    let mut messages = vec![(MSG_SYMBOL_TABLE, symbol_table_msg(btree, heap))];
    messages.extend_from_slice(extra_messages);
    let header = object_header_v1(img, &messages);
    GroupV0 {
        header,
        btree,
        heap,
    }
}

/// Writes the v0 superblock pointing at `root` and returns the image.
pub fn finish_v0(mut img: FileImage, root: &GroupV0) -> Vec<u8> {
    let mut sb = Vec::new();
    sb.extend_from_slice(b"\x89HDF\r\n\x1a\n");
    sb.extend_from_slice(&[0, 0, 0, 0, 0]); // versions
    sb.push(8); // offset size
    sb.push(8); // length size
    sb.push(0);
    sb.extend_from_slice(&4u16.to_le_bytes()); // group leaf K
    sb.extend_from_slice(&16u16.to_le_bytes()); // group internal K
    sb.extend_from_slice(&0u32.to_le_bytes()); // consistency flags
    sb.extend_from_slice(&0u64.to_le_bytes()); // base address
    sb.extend_from_slice(&UNDEF.to_le_bytes()); // free space
    sb.extend_from_slice(&(img.buf.len() as u64).to_le_bytes()); // eof
    sb.extend_from_slice(&UNDEF.to_le_bytes()); // driver info
    // Root symbol table entry.
    sb.extend_from_slice(&0u64.to_le_bytes());
    sb.extend_from_slice(&root.header.to_le_bytes());
    sb.extend_from_slice(&1u32.to_le_bytes());
    sb.extend_from_slice(&0u32.to_le_bytes());
    sb.extend_from_slice(&root.btree.to_le_bytes());
    sb.extend_from_slice(&root.heap.to_le_bytes());
    img.write(0, &sb);
    img.buf
}

/// Writes a v2 or v3 superblock pointing at a root object header.
pub fn finish_v2(mut img: FileImage, version: u8, root_header: u64) -> Vec<u8> {
    let mut sb = Vec::new();
    sb.extend_from_slice(b"\x89HDF\r\n\x1a\n");
    sb.push(version);
    sb.push(8);
    sb.push(8);
    sb.push(0); // consistency flags
    sb.extend_from_slice(&0u64.to_le_bytes()); // base address
    sb.extend_from_slice(&UNDEF.to_le_bytes()); // extension
    sb.extend_from_slice(&(img.buf.len() as u64).to_le_bytes()); // eof
    sb.extend_from_slice(&root_header.to_le_bytes());
    let checksum = lookup3(&sb, 0);
    sb.extend_from_slice(&checksum.to_le_bytes());
    img.write(0, &sb);
    img.buf
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub enum FilterKind {
    None,
    Lz4 { block_bytes: usize },
    Bshuf { block_bytes: usize },
}

/// Encodes one chunk's raw bytes per the filter.
pub fn encode_chunk(raw: &[u8], elem_size: usize, filter: FilterKind) -> Vec<u8> {
    match filter {
        FilterKind::None => raw.to_vec(),
        FilterKind::Lz4 { block_bytes } => lz4_container(raw, block_bytes),
        FilterKind::Bshuf { block_bytes } => bshuf_lz4_container(raw, elem_size, block_bytes),
    }
}

fn filter_message_v1(elem_size: usize, filter: FilterKind) -> Option<Vec<u8>> {
    match filter {
        FilterKind::None => None,
        FilterKind::Lz4 { block_bytes } => Some(lz4_filter_v1(block_bytes)),
        FilterKind::Bshuf { block_bytes } => Some(bshuf_filter_v1(elem_size, block_bytes)),
    }
}

fn filter_message_v2(elem_size: usize, filter: FilterKind) -> Option<Vec<u8>> {
    match filter {
        FilterKind::None => None,
        FilterKind::Lz4 { block_bytes } => Some(lz4_filter_v2(block_bytes)),
        FilterKind::Bshuf { block_bytes } => Some(bshuf_filter_v2(elem_size, block_bytes)),
    }
}

/// Offsets of chunk number `i` in a row-major chunk grid.
fn chunk_offsets(index: usize, dims: &[u64], chunk: &[u64]) -> Vec<u64> {
    let counts: Vec<u64> = dims
        .iter()
        .zip(chunk)
        .map(|(&d, &c)| d.div_ceil(c))
        .collect();
    let mut offsets = vec![0u64; dims.len()];
    let mut rest = index as u64;
    for d in (0..dims.len()).rev() {
        offsets[d] = (rest % counts[d]) * chunk[d];
        rest /= counts[d];
    }
    offsets
}

/// Stores chunk payloads and returns (stored sizes, addresses).
fn store_chunks(
    img: &mut FileImage,
    chunks: &[Vec<u8>],
    elem_size: usize,
    filter: FilterKind,
) -> Vec<(u32, u64)> {
    chunks
        .iter()
        .map(|raw| {
            let stored = encode_chunk(raw, elem_size, filter);
            let address = img.put(&stored);
            (stored.len() as u32, address)
        })
        .collect()
}

/// A chunked dataset indexed by a v1 B-tree (layout v3), old-style.
pub fn chunked_dataset_btree_v1(
    img: &mut FileImage,
    dims: &[u64],
    chunk: &[u64],
    elem_size: usize,
    chunks: &[Vec<u8>],
    filter: FilterKind,
) -> u64 {
    let stored = store_chunks(img, chunks, elem_size, filter);

    // Leaf chunk node: keys carry (size, mask, offsets + element dim).
    let mut tree = Vec::new();
    tree.extend_from_slice(b"TREE");
    tree.push(1); // chunk node
    tree.push(0); // leaf
    tree.extend_from_slice(&(stored.len() as u16).to_le_bytes());
    tree.extend_from_slice(&UNDEF.to_le_bytes());
    tree.extend_from_slice(&UNDEF.to_le_bytes());
    for (i, (size, address)) in stored.iter().enumerate() {
        tree.extend_from_slice(&size.to_le_bytes());
        tree.extend_from_slice(&0u32.to_le_bytes());
        for off in chunk_offsets(i, dims, chunk) {
            tree.extend_from_slice(&off.to_le_bytes());
        }
        tree.extend_from_slice(&0u64.to_le_bytes()); // element-size dim
        tree.extend_from_slice(&address.to_le_bytes());
    }
    // Bounding key after the last entry.
    tree.extend_from_slice(&0u32.to_le_bytes());
    tree.extend_from_slice(&0u32.to_le_bytes());
    for &d in dims {
        tree.extend_from_slice(&d.to_le_bytes());
    }
    tree.extend_from_slice(&0u64.to_le_bytes());
    let btree = img.put(&tree);

    let mut layout_dims: Vec<u64> = chunk.to_vec();
    layout_dims.push(elem_size as u64);
    let mut messages = vec![
        (MSG_DATASPACE, dataspace_v1(dims)),
        (MSG_DATATYPE, datatype_fixed(elem_size as u32, false)),
        (MSG_DATA_LAYOUT, layout_v3_chunked(btree, &layout_dims)),
    ];
    if let Some(body) = filter_message_v1(elem_size, filter) {
        messages.push((MSG_FILTER_PIPELINE, body));
    }
    object_header_v1(img, &messages)
}

/// A compact dataset: the raw bytes live inside the layout message.
pub fn compact_dataset_v1(
    img: &mut FileImage,
    dims: &[u64],
    datatype: Vec<u8>,
    data: &[u8],
) -> u64 {
    let mut layout = vec![3u8, 0];
    layout.extend_from_slice(&(data.len() as u16).to_le_bytes());
    layout.extend_from_slice(data);
    object_header_v1(
        img,
        &[
            (MSG_DATASPACE, dataspace_v1(dims)),
            (MSG_DATATYPE, datatype),
            (MSG_DATA_LAYOUT, layout),
        ],
    )
}

/// A contiguous dataset with a v1 object header.
pub fn contiguous_dataset_v1(
    img: &mut FileImage,
    dims: &[u64],
    datatype: Vec<u8>,
    data: &[u8],
) -> u64 {
    let address = img.put(data);
    object_header_v1(
        img,
        &[
            (MSG_DATASPACE, dataspace_v1(dims)),
            (MSG_DATATYPE, datatype),
            (
                MSG_DATA_LAYOUT,
                layout_v3_contiguous(address, data.len() as u64),
            ),
        ],
    )
}

fn fixed_array_entries(stored: &[(u32, u64)], filtered: bool) -> (usize, Vec<u8>) {
    let entry_size = if filtered { 16 } else { 8 };
    let mut entries = Vec::new();
    for (size, address) in stored {
        entries.extend_from_slice(&address.to_le_bytes());
        if filtered {
            entries.extend_from_slice(&size.to_le_bytes());
            entries.extend_from_slice(&0u32.to_le_bytes()); // filter mask
        }
    }
    (entry_size, entries)
}

/// Writes a fixed-array chunk index, returning the header address.
pub fn fixed_array_index(img: &mut FileImage, stored: &[(u32, u64)], filtered: bool) -> u64 {
    let (entry_size, entries) = fixed_array_entries(stored, filtered);

    let header_at = img.alloc(28);
    let mut dblock = Vec::new();
    dblock.extend_from_slice(b"FADB");
    dblock.push(0);
    dblock.push(filtered as u8);
    dblock.extend_from_slice(&(header_at as u64).to_le_bytes());
    dblock.extend_from_slice(&entries);
    let checksum = lookup3(&dblock, 0);
    dblock.extend_from_slice(&checksum.to_le_bytes());
    let dblock_addr = img.put(&dblock);

    let mut header = Vec::new();
    header.extend_from_slice(b"FAHD");
    header.push(0);
    header.push(filtered as u8);
    header.push(entry_size as u8);
    header.push(10); // page bits: large enough to stay unpaged
    header.extend_from_slice(&(stored.len() as u64).to_le_bytes());
    header.extend_from_slice(&dblock_addr.to_le_bytes());
    let checksum = lookup3(&header, 0);
    header.extend_from_slice(&checksum.to_le_bytes());
    img.write(header_at, &header);
    header_at as u64
}

/// Writes an extensible-array chunk index whose index block holds
/// `index_block_entries` entries.
pub fn extensible_array_index(
    img: &mut FileImage,
    stored: &[(u32, u64)],
    filtered: bool,
    index_block_entries: u8,
) -> u64 {
    let (entry_size, _) = fixed_array_entries(stored, filtered);

    let header_at = img.alloc(72);
    let mut iblock = Vec::new();
    iblock.extend_from_slice(b"EAIB");
    iblock.push(0);
    iblock.push(filtered as u8);
    iblock.extend_from_slice(&(header_at as u64).to_le_bytes());
    for (size, address) in stored.iter().take(index_block_entries as usize) {
        iblock.extend_from_slice(&address.to_le_bytes());
        if filtered {
            iblock.extend_from_slice(&size.to_le_bytes());
            iblock.extend_from_slice(&0u32.to_le_bytes());
        }
    }
    let iblock_addr = img.put(&iblock);

    let mut header = vec![0u8; 68];
    header[0..4].copy_from_slice(b"EAHD");
    header[4] = 0;
    header[5] = filtered as u8;
    header[6] = entry_size as u8;
    header[7] = 32; // max element bits
    header[8] = index_block_entries;
    header[9] = 4; // min elements per data block
    header[10] = 4; // min pointers per secondary block
    header[11] = 10; // max data block element bits
    header[44..52].copy_from_slice(&(stored.len() as u64).to_le_bytes()); // max index set
    header[52..60].copy_from_slice(&(stored.len() as u64).to_le_bytes()); // realized
    header[60..68].copy_from_slice(&iblock_addr.to_le_bytes());
    let checksum = lookup3(&header, 0);
    header.extend_from_slice(&checksum.to_le_bytes());
    img.write(header_at, &header);
    header_at as u64
}

/// Writes a depth-0 v2 B-tree chunk index (type 10 or 11).
pub fn btree_v2_chunk_index(
    img: &mut FileImage,
    dims: &[u64],
    chunk: &[u64],
    stored: &[(u32, u64)],
    filtered: bool,
) -> u64 {
    let ndims = dims.len() + 1;
    let record_size = if filtered {
        8 + 4 + 4 + ndims * 8
    } else {
        8 + ndims * 8
    };

    let mut leaf = Vec::new();
    leaf.extend_from_slice(b"BTLF");
    leaf.push(0);
    leaf.push(if filtered { 11 } else { 10 });
    for (i, (size, address)) in stored.iter().enumerate() {
        leaf.extend_from_slice(&address.to_le_bytes());
        if filtered {
            leaf.extend_from_slice(&size.to_le_bytes());
            leaf.extend_from_slice(&0u32.to_le_bytes());
        }
        for off in chunk_offsets(i, dims, chunk) {
            leaf.extend_from_slice(&off.to_le_bytes());
        }
        leaf.extend_from_slice(&0u64.to_le_bytes());
    }
    let checksum = lookup3(&leaf, 0);
    leaf.extend_from_slice(&checksum.to_le_bytes());
    let leaf_addr = img.put(&leaf);

    let mut header = Vec::new();
    header.extend_from_slice(b"BTHD");
    header.push(0);
    header.push(if filtered { 11 } else { 10 });
    header.extend_from_slice(&2048u32.to_le_bytes());
    header.extend_from_slice(&(record_size as u16).to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes()); // depth
    header.push(100);
    header.push(40);
    header.extend_from_slice(&leaf_addr.to_le_bytes());
    header.extend_from_slice(&(stored.len() as u16).to_le_bytes());
    header.extend_from_slice(&(stored.len() as u64).to_le_bytes());
    let checksum = lookup3(&header, 0);
    header.extend_from_slice(&checksum.to_le_bytes());
    img.put(&header)
}

/// Chunk index flavors for v4 layouts.
#[derive(Clone, Copy)]
pub enum V4Index {
    FixedArray,
    /// Extensible array with the given index-block capacity.
    ExtensibleArray(u8),
    BTreeV2,
}

/// A chunked dataset with a v4 layout and a v2 object header.
pub fn chunked_dataset_v4(
    img: &mut FileImage,
    dims: &[u64],
    chunk: &[u64],
    elem_size: usize,
    chunks: &[Vec<u8>],
    filter: FilterKind,
    index: V4Index,
) -> u64 {
    let stored = store_chunks(img, chunks, elem_size, filter);
    let filtered = !matches!(filter, FilterKind::None);
    let (index_type, index_address) = match index {
        V4Index::FixedArray => (3u8, fixed_array_index(img, &stored, filtered)),
        V4Index::ExtensibleArray(capacity) => {
            (4, extensible_array_index(img, &stored, filtered, capacity))
        }
        V4Index::BTreeV2 => (5, btree_v2_chunk_index(img, dims, chunk, &stored, filtered)),
    };

    let mut layout_dims: Vec<u64> = chunk.to_vec();
    layout_dims.push(elem_size as u64);
    let mut messages = vec![
        (MSG_DATASPACE, dataspace_v2(dims)),
        (MSG_DATATYPE, datatype_fixed(elem_size as u32, false)),
        (
            MSG_DATA_LAYOUT,
            layout_v4_chunked(index_type, index_address, &layout_dims),
        ),
    ];
    if let Some(body) = filter_message_v2(elem_size, filter) {
        messages.push((MSG_FILTER_PIPELINE, body));
    }
    object_header_v2(img, &messages)
}

// ---------------------------------------------------------------------------
// New-style (v2) groups
// ---------------------------------------------------------------------------

/// A compact new-style group: link messages directly in the header.
pub fn group_v2_compact(img: &mut FileImage, links: &[Vec<u8>]) -> u64 {
    let messages: Vec<(u16, Vec<u8>)> = links
        .iter()
        .map(|body| (MSG_LINK, body.clone()))
        .collect();
    object_header_v2(img, &messages)
}

/// A dense new-style group: link messages in a fractal heap, indexed
/// by a name-hash v2 B-tree, referenced from a link-info message.
pub fn group_v2_dense(img: &mut FileImage, links: &[Vec<u8>]) -> u64 {
    const HEAP_ID_LEN: usize = 7;
    const MAX_HEAP_BITS: u16 = 16;

    // One root direct block holding every link message.
    let block_header = 13 + 2; // signature, version, heap address, block offset
    let mut payload = Vec::new();
    let mut ids: Vec<(u32, Vec<u8>)> = Vec::new();
    for body in links {
        let offset = (block_header + payload.len()) as u64;
        payload.extend_from_slice(body);
        // Heap id: type byte, 2-byte offset, 4-byte length.
        let mut id = vec![0u8; HEAP_ID_LEN];
        id[1..3].copy_from_slice(&(offset as u16).to_le_bytes());
        id[3..7].copy_from_slice(&(body.len() as u32).to_le_bytes());
        // Link name: the builder link bodies store it at byte 4.
        let name_len = body[3] as usize;
        let name = std::str::from_utf8(&body[4..4 + name_len]).unwrap();
        ids.push((h5view::checksum::name_hash(name), id));
    }

    let heap_at = img.alloc(144);
    let mut dblock = Vec::new();
    dblock.extend_from_slice(b"FHDB");
    dblock.push(0);
    dblock.extend_from_slice(&(heap_at as u64).to_le_bytes());
    dblock.extend_from_slice(&[0u8; 2]); // block offset
    dblock.extend_from_slice(&payload);
    let dblock_addr = img.put(&dblock);

    let mut heap = vec![0u8; 144];
    heap[0..4].copy_from_slice(b"FRHP");
    heap[4] = 0;
    heap[5..7].copy_from_slice(&(HEAP_ID_LEN as u16).to_le_bytes());
    heap[7..9].copy_from_slice(&0u16.to_le_bytes()); // no io filters
    heap[9] = 0;
    heap[70..78].copy_from_slice(&(links.len() as u64).to_le_bytes()); // managed objects
    heap[110..112].copy_from_slice(&4u16.to_le_bytes()); // table width
    heap[112..120].copy_from_slice(&512u64.to_le_bytes()); // starting block size
    heap[120..128].copy_from_slice(&4096u64.to_le_bytes()); // max direct block size
    heap[128..130].copy_from_slice(&MAX_HEAP_BITS.to_le_bytes());
    heap[132..140].copy_from_slice(&dblock_addr.to_le_bytes());
    heap[140..142].copy_from_slice(&0u16.to_le_bytes()); // root is direct
    img.write(heap_at, &heap);

    // Name-index B-tree: one leaf of (hash, heap id) records.
    ids.sort_by_key(|(hash, _)| *hash);
    let record_size = 4 + HEAP_ID_LEN;
    let mut leaf = Vec::new();
    leaf.extend_from_slice(b"BTLF");
    leaf.push(0);
    leaf.push(5); // name index
    for (hash, id) in &ids {
        leaf.extend_from_slice(&hash.to_le_bytes());
        leaf.extend_from_slice(id);
    }
    let checksum = lookup3(&leaf, 0);
    leaf.extend_from_slice(&checksum.to_le_bytes());
    let leaf_addr = img.put(&leaf);

    let mut btree = Vec::new();
    btree.extend_from_slice(b"BTHD");
    btree.push(0);
    btree.push(5);
    btree.extend_from_slice(&2048u32.to_le_bytes());
    btree.extend_from_slice(&(record_size as u16).to_le_bytes());
    btree.extend_from_slice(&0u16.to_le_bytes());
    btree.push(100);
    btree.push(40);
    btree.extend_from_slice(&leaf_addr.to_le_bytes());
    btree.extend_from_slice(&(ids.len() as u16).to_le_bytes());
    btree.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    let checksum = lookup3(&btree, 0);
    btree.extend_from_slice(&checksum.to_le_bytes());
    let btree_addr = img.put(&btree);

    object_header_v2(
        img,
        &[(MSG_LINK_INFO, link_info_msg(heap_at as u64, btree_addr))],
    )
}

// ---------------------------------------------------------------------------
// Frame data helpers
// ---------------------------------------------------------------------------

/// Synthetic u16 frames: frame `f` holds `value[i] = i` plus a per-
/// frame offset so frames differ.
pub fn u16_frames(frames: usize, ny: usize, nx: usize, frame_offset: u16) -> Vec<Vec<u8>> {
    (0..frames)
        .map(|f| {
            (0..ny * nx)
                .map(|i| (i as u16).wrapping_add(frame_offset * f as u16))
                .flat_map(|v| v.to_le_bytes())
                .collect()
        })
        .collect()
}
