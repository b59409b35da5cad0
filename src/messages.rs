//! Decoders for the header messages this crate consumes.
//!
//! Each decoder is a plain function of a message-body view; nothing
//! here touches the rest of the file except through addresses the
//! caller chooses to follow.

use crate::error::{Error, Result};
use crate::view::{ByteView, is_undefined};

/// Filter id of the LZ4 block-stream filter (non-standard, registered).
pub const FILTER_LZ4: u16 = 32004;
/// Filter id of the bitshuffle filter (non-standard, registered).
pub const FILTER_BITSHUFFLE: u16 = 32008;
/// Value of `client_data[4]` selecting LZ4 as bitshuffle's inner codec.
pub const BSHUF_COMPRESS_LZ4: i32 = 2;

// ---------------------------------------------------------------------------
// Dataspace (0x01)
// ---------------------------------------------------------------------------

/// Rank and per-dimension extents of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataspaceMsg {
    pub version: u8,
    pub dims: Vec<u64>,
    pub max_dims: Option<Vec<u64>>,
}

impl DataspaceMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        let version = body.read_u8(0)?;
        let rank = body.read_u8(1)? as usize;
        let flags = body.read_u8(2)?;
        let dims_start = match version {
            1 => 8,
            2 => 4,
            v => {
                return Err(Error::UnsupportedVersion {
                    what: "dataspace message",
                    version: v,
                });
            }
        };
        let mut dims = Vec::with_capacity(rank);
        for i in 0..rank {
            dims.push(body.read_u64(dims_start + i * 8)?);
        }
        let max_dims = if flags & 0x01 != 0 {
            let start = dims_start + rank * 8;
            let mut max = Vec::with_capacity(rank);
            for i in 0..rank {
                max.push(body.read_u64(start + i * 8)?);
            }
            Some(max)
        } else {
            None
        };
        Ok(DataspaceMsg {
            version,
            dims,
            max_dims,
        })
    }
}

// ---------------------------------------------------------------------------
// Datatype (0x03)
// ---------------------------------------------------------------------------

/// The two numeric datatype classes this decoder handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeClass {
    FixedPoint,
    FloatingPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatatypeMsg {
    pub class: DatatypeClass,
    pub version: u8,
    pub signed: bool,
    /// Element size in bytes.
    pub size: u32,
}

impl DatatypeMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        let b0 = body.read_u8(0)?;
        let class_id = b0 & 0x0F;
        let version = b0 >> 4;
        let (class, signed) = match class_id {
            0 => (DatatypeClass::FixedPoint, body.read_u8(1)? & 0x08 != 0),
            1 => (DatatypeClass::FloatingPoint, true),
            other => return Err(Error::UnsupportedDatatype(other)),
        };
        let size = body.read_u32(4)?;
        Ok(DatatypeMsg {
            class,
            version,
            signed,
            size,
        })
    }
}

// ---------------------------------------------------------------------------
// Filter pipeline (0x0B)
// ---------------------------------------------------------------------------

/// One entry of a filter pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u16,
    pub name: String,
    pub client_data: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipelineMsg {
    pub filters: Vec<Filter>,
}

/// Builtin filter names, indexed by the reserved ids below 256.
fn builtin_filter_name(id: u16) -> &'static str {
    match id {
        1 => "deflate",
        2 => "shuffle",
        3 => "fletcher32",
        4 => "szip",
        5 => "nbit",
        6 => "scaleoffset",
        _ => "",
    }
}

impl FilterPipelineMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        let version = body.read_u8(0)?;
        match version {
            1 => Self::parse_v1(body),
            2 => Self::parse_v2(body),
            v => Err(Error::UnsupportedVersion {
                what: "filter pipeline message",
                version: v,
            }),
        }
    }

    fn parse_v1(body: ByteView<'_>) -> Result<Self> {
        let n_filters = body.read_u8(1)? as usize;
        if body.read_u16(2)? != 0 || body.read_u32(4)? != 0 {
            return Err(Error::CorruptFile(
                "non-zero reserved bytes in filter pipeline".into(),
            ));
        }
        let mut filters = Vec::with_capacity(n_filters);
        let mut pos = 8usize;
        for _ in 0..n_filters {
            let id = body.read_u16(pos)?;
            let name_len = body.read_u16(pos + 2)? as usize;
            if name_len % 8 != 0 {
                return Err(Error::CorruptFile(format!(
                    "filter name length {name_len} is not padded to 8 bytes"
                )));
            }
            let n_client = body.read_u16(pos + 6)? as usize;
            let name_bytes = body.bytes(pos + 8, name_len)?;
            let name = cstr_prefix(name_bytes);
            let mut client_data = Vec::with_capacity(n_client);
            let values_start = pos + 8 + name_len;
            for i in 0..n_client {
                client_data.push(body.read_i32(values_start + i * 4)?);
            }
            pos = values_start + n_client * 4;
            if n_client % 2 == 1 {
                pos += 4;
            }
            filters.push(Filter {
                id,
                name,
                client_data,
            });
        }
        Ok(FilterPipelineMsg { filters })
    }

    fn parse_v2(body: ByteView<'_>) -> Result<Self> {
        let n_filters = body.read_u8(1)? as usize;
        let mut filters = Vec::with_capacity(n_filters);
        let mut pos = 2usize;
        for _ in 0..n_filters {
            let id = body.read_u16(pos)?;
            pos += 2;
            // The name length field is omitted for the reserved ids.
            let name_len = if id < 256 {
                0
            } else {
                let len = body.read_u16(pos)? as usize;
                pos += 2;
                len
            };
            let _flags = body.read_u16(pos)?;
            let n_client = body.read_u16(pos + 2)? as usize;
            pos += 4;
            let name = if name_len > 0 {
                cstr_prefix(body.bytes(pos, name_len)?)
            } else {
                builtin_filter_name(id).to_string()
            };
            pos += name_len;
            let mut client_data = Vec::with_capacity(n_client);
            for i in 0..n_client {
                client_data.push(body.read_i32(pos + i * 4)?);
            }
            pos += n_client * 4;
            filters.push(Filter {
                id,
                name,
                client_data,
            });
        }
        Ok(FilterPipelineMsg { filters })
    }
}

/// Bytes up to the first NUL (or the whole slice), as a lossy string.
fn cstr_prefix(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ---------------------------------------------------------------------------
// Data layout (0x08)
// ---------------------------------------------------------------------------

/// Chunk-index flavor selected by a v4 chunked layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndexType {
    FixedArray,
    ExtensibleArray,
    BTreeV2,
}

/// Where a dataset's raw bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayoutMsg {
    /// Data stored inline in the header message.
    Compact { data_address: u64, size: u32 },
    /// Data at a single file address.
    Contiguous { address: u64, size: u64 },
    /// v3 chunked storage indexed by a v1 B-tree. `dims` carries the
    /// chunk shape plus the trailing element-size dimension.
    ChunkedBTreeV1 { btree_address: u64, dims: Vec<u64> },
    /// v4 chunked storage with one of the newer chunk indexes.
    ChunkedIndexed {
        index: ChunkIndexType,
        index_address: u64,
        dims: Vec<u64>,
    },
}

impl DataLayoutMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        let version = body.read_u8(0)?;
        match version {
            3 => Self::parse_v3(body),
            4 => Self::parse_v4(body),
            v => Err(Error::UnsupportedVersion {
                what: "data layout message",
                version: v,
            }),
        }
    }

    fn parse_v3(body: ByteView<'_>) -> Result<Self> {
        let class = body.read_u8(1)?;
        match class {
            0 => {
                let size = body.read_u16(2)? as u32;
                Ok(DataLayoutMsg::Compact {
                    data_address: body.base() + 4,
                    size,
                })
            }
            1 => Ok(DataLayoutMsg::Contiguous {
                address: body.read_u64(2)?,
                size: body.read_u64(10)?,
            }),
            2 => {
                let dimensionality = body.read_u8(2)? as usize;
                let btree_address = body.read_u64(3)?;
                let mut dims = Vec::with_capacity(dimensionality);
                for i in 0..dimensionality {
                    dims.push(body.read_u32(11 + i * 4)? as u64);
                }
                Ok(DataLayoutMsg::ChunkedBTreeV1 {
                    btree_address,
                    dims,
                })
            }
            c => Err(Error::CorruptFile(format!("invalid layout class {c}"))),
        }
    }

    fn parse_v4(body: ByteView<'_>) -> Result<Self> {
        let class = body.read_u8(1)?;
        match class {
            0 => {
                let size = body.read_u16(2)? as u32;
                Ok(DataLayoutMsg::Compact {
                    data_address: body.base() + 4,
                    size,
                })
            }
            1 => Ok(DataLayoutMsg::Contiguous {
                address: body.read_u64(2)?,
                size: body.read_u64(10)?,
            }),
            2 => {
                let _flags = body.read_u8(2)?;
                let dimensionality = body.read_u8(3)? as usize;
                let dim_width = body.read_u8(4)? as usize;
                if !matches!(dim_width, 1 | 2 | 4 | 8) {
                    return Err(Error::CorruptFile(format!(
                        "invalid chunk dimension encoding width {dim_width}"
                    )));
                }
                let mut dims = Vec::with_capacity(dimensionality);
                let mut pos = 5usize;
                for _ in 0..dimensionality {
                    dims.push(body.read_uint(pos, dim_width)?);
                    pos += dim_width;
                }
                let index_type = body.read_u8(pos)?;
                pos += 1;
                let index = match index_type {
                    1 => return Err(Error::UnsupportedLayout("single-chunk index")),
                    2 => return Err(Error::UnsupportedLayout("implicit chunk index")),
                    3 => {
                        pos += 1; // page bits, repeated in the index header
                        ChunkIndexType::FixedArray
                    }
                    4 => {
                        pos += 5; // creation parameters, repeated in the index header
                        ChunkIndexType::ExtensibleArray
                    }
                    5 => {
                        pos += 4 + 2 + 1 + 1; // node size, record size, split/merge percent
                        ChunkIndexType::BTreeV2
                    }
                    t => {
                        return Err(Error::CorruptFile(format!("invalid chunk index type {t}")));
                    }
                };
                let index_address = body.read_u64(pos)?;
                Ok(DataLayoutMsg::ChunkedIndexed {
                    index,
                    index_address,
                    dims,
                })
            }
            3 => Err(Error::UnsupportedLayout("virtual dataset layout")),
            c => Err(Error::CorruptFile(format!("invalid layout class {c}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Link (0x06)
// ---------------------------------------------------------------------------

/// The three link flavors, each with exactly its own payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Hard { address: u64 },
    Soft { path: String },
    External { file: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMsg {
    pub name: String,
    pub target: LinkTarget,
}

impl LinkMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        let version = body.read_u8(0)?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                what: "link message",
                version,
            });
        }
        let flags = body.read_u8(1)?;
        let has_creation_order = flags & 0x04 != 0;
        let has_link_type = flags & 0x08 != 0;
        let has_charset = flags & 0x10 != 0;

        let mut pos = 2usize;
        let link_type = if has_link_type {
            let t = body.read_u8(pos)?;
            pos += 1;
            t
        } else {
            0
        };
        if has_creation_order {
            pos += 8;
        }
        if has_charset {
            pos += 1;
        }

        let name_len_width = 1usize << (flags & 0x03);
        let name_len = body.read_uint(pos, name_len_width)? as usize;
        pos += name_len_width;
        let name = String::from_utf8_lossy(body.bytes(pos, name_len)?).into_owned();
        pos += name_len;

        let target = match link_type {
            0 => LinkTarget::Hard {
                address: body.read_u64(pos)?,
            },
            1 => {
                let len = body.read_u16(pos)? as usize;
                let path = String::from_utf8_lossy(body.bytes(pos + 2, len)?).into_owned();
                LinkTarget::Soft { path }
            }
            64 => Self::parse_external(body, pos)?,
            t => {
                return Err(Error::CorruptFile(format!(
                    "invalid link type {t} for link '{name}'"
                )));
            }
        };
        Ok(LinkMsg { name, target })
    }

    fn parse_external(body: ByteView<'_>, pos: usize) -> Result<LinkTarget> {
        // The first byte of the value is a version/flags marker; the
        // rest is "<file>\0<path>\0".
        let total = body.read_u16(pos)? as usize;
        if total < 1 {
            return Err(Error::CorruptFile("empty external link value".into()));
        }
        let value = body.bytes(pos + 3, total - 1)?;
        if value.last() != Some(&0) {
            return Err(Error::CorruptFile(
                "external link path is not NUL-terminated".into(),
            ));
        }
        let sep = value[..value.len() - 1]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| {
                Error::CorruptFile("external link value is missing the file/path NUL".into())
            })?;
        let file = String::from_utf8_lossy(&value[..sep]).into_owned();
        let path = String::from_utf8_lossy(&value[sep + 1..value.len() - 1]).into_owned();
        Ok(LinkTarget::External { file, path })
    }
}

// ---------------------------------------------------------------------------
// Link info (0x02)
// ---------------------------------------------------------------------------

/// Pointers to the dense-link storage of a new-style group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfoMsg {
    pub fractal_heap_address: Option<u64>,
    pub btree_address: Option<u64>,
}

impl LinkInfoMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        let version = body.read_u8(0)?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "link info message",
                version,
            });
        }
        let flags = body.read_u8(1)?;
        // Tracking the max creation index shifts both addresses by 8.
        let base = if flags & 0x01 != 0 { 10 } else { 2 };
        let heap = body.read_u64(base)?;
        let btree = body.read_u64(base + 8)?;
        Ok(LinkInfoMsg {
            fractal_heap_address: (!is_undefined(heap)).then_some(heap),
            btree_address: (!is_undefined(btree)).then_some(btree),
        })
    }
}

// ---------------------------------------------------------------------------
// Symbol table (0x11)
// ---------------------------------------------------------------------------

/// B-tree and local-heap addresses of an old-style group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMsg {
    pub btree_address: u64,
    pub heap_address: u64,
}

impl SymbolTableMsg {
    pub fn parse(body: ByteView<'_>) -> Result<Self> {
        Ok(SymbolTableMsg {
            btree_address: body.read_u64(0)?,
            heap_address: body.read_u64(8)?,
        })
    }
}
