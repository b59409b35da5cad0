//! The consumer-facing dataset API: resolve a path (following external
//! links across files), report shape and type, and read raw chunk
//! bytes with transparent decompression.

use log::debug;

use crate::btree_v1;
use crate::btree_v2::BTreeV2;
use crate::chunk_index::{ChunkEntry, ExtensibleArray, FixedArray};
use crate::decode;
use crate::error::{Error, Result};
use crate::file::H5File;
use crate::messages::{
    BSHUF_COMPRESS_LZ4, ChunkIndexType, DataLayoutMsg, DataspaceMsg, DatatypeClass, DatatypeMsg,
    FILTER_BITSHUFFLE, FILTER_LZ4, Filter, FilterPipelineMsg,
};
use crate::object_header::{
    MSG_DATA_LAYOUT, MSG_DATASPACE, MSG_DATATYPE, MSG_FILTER_PIPELINE, ObjectHeader,
};
use crate::path::H5Path;
use crate::resolver::ResolvedPath;
use crate::view::{ByteView, is_undefined};

/// External links may chain across files; cap the hops.
const MAX_EXTERNAL_HOPS: usize = 16;

/// How the dataset's raw bytes are located.
#[derive(Debug, Clone)]
enum Layout {
    Compact {
        address: u64,
        size: u32,
    },
    Contiguous {
        address: u64,
        size: u64,
    },
    Chunked {
        index: ChunkIndexKind,
        /// Chunk shape including the trailing element-size dimension.
        dims: Vec<u64>,
    },
}

#[derive(Debug, Clone, Copy)]
enum ChunkIndexKind {
    BTreeV1 { address: u64 },
    FixedArray { address: u64 },
    ExtensibleArray { address: u64 },
    BTreeV2 { address: u64 },
}

/// An opened dataset: shape, type, chunking and filter state parsed
/// once; chunk lookups re-walk the on-disk index on every read.
#[derive(Debug)]
pub struct Dataset {
    file: H5File,
    header_address: u64,
    dims: Vec<u64>,
    datatype: DatatypeMsg,
    layout: Layout,
    filter: Option<Filter>,
}

impl Dataset {
    /// Resolves `path` in `file` and parses the dataset's object
    /// header. External links are followed by reopening the named
    /// file and resolving the remainder there.
    pub fn open(file: &H5File, path: &str) -> Result<Dataset> {
        let mut current = file.clone();
        let mut path = H5Path::new(path);
        let mut hops = 0usize;
        let header_address = loop {
            enum Step {
                Done(u64),
                Reopen(String, H5Path),
            }
            let step = {
                let superblock = current.superblock()?;
                match superblock.resolve(&path)? {
                    ResolvedPath::Object(header) => Step::Done(header.address()),
                    ResolvedPath::External { file, path } => Step::Reopen(file, path),
                }
            };
            match step {
                Step::Done(address) => break address,
                Step::Reopen(name, remaining) => {
                    hops += 1;
                    if hops > MAX_EXTERNAL_HOPS {
                        return Err(Error::CorruptFile(
                            "external link chain crosses too many files".into(),
                        ));
                    }
                    debug!("following external link into {name}: {remaining}");
                    current = current.open_sibling(&name)?;
                    path = remaining;
                }
            }
        };
        Self::from_header(current, header_address)
    }

    fn from_header(file: H5File, header_address: u64) -> Result<Dataset> {
        let data = file.bytes();
        let header = ObjectHeader::parse(data, header_address)?;

        let mut dims = None;
        let mut datatype = None;
        let mut layout = None;
        let mut filter = None;
        for msg in header.messages() {
            match msg.msg_type {
                MSG_DATASPACE => dims = Some(DataspaceMsg::parse(msg.body)?.dims),
                MSG_DATATYPE => datatype = Some(DatatypeMsg::parse(msg.body)?),
                MSG_DATA_LAYOUT => layout = Some(DataLayoutMsg::parse(msg.body)?),
                MSG_FILTER_PIPELINE => {
                    let pipeline = FilterPipelineMsg::parse(msg.body)?;
                    if pipeline.filters.len() > 1 {
                        return Err(Error::UnsupportedFilter(format!(
                            "pipeline with {} filters",
                            pipeline.filters.len()
                        )));
                    }
                    filter = pipeline.filters.into_iter().next();
                }
                _ => {}
            }
        }

        let dims = dims.ok_or_else(|| {
            Error::PathNotFound("object has no dataspace; not a dataset".into())
        })?;
        let datatype = datatype.ok_or_else(|| {
            Error::PathNotFound("object has no datatype; not a dataset".into())
        })?;
        let layout = match layout.ok_or_else(|| {
            Error::PathNotFound("object has no data layout; not a dataset".into())
        })? {
            DataLayoutMsg::Compact { data_address, size } => Layout::Compact {
                address: data_address,
                size,
            },
            DataLayoutMsg::Contiguous { address, size } => Layout::Contiguous { address, size },
            DataLayoutMsg::ChunkedBTreeV1 {
                btree_address,
                dims,
            } => Layout::Chunked {
                index: ChunkIndexKind::BTreeV1 {
                    address: btree_address,
                },
                dims,
            },
            DataLayoutMsg::ChunkedIndexed {
                index,
                index_address,
                dims,
            } => Layout::Chunked {
                index: match index {
                    ChunkIndexType::FixedArray => ChunkIndexKind::FixedArray {
                        address: index_address,
                    },
                    ChunkIndexType::ExtensibleArray => ChunkIndexKind::ExtensibleArray {
                        address: index_address,
                    },
                    ChunkIndexType::BTreeV2 => ChunkIndexKind::BTreeV2 {
                        address: index_address,
                    },
                },
                dims,
            },
        };

        if let Layout::Chunked { dims: chunk, .. } = &layout {
            if chunk.is_empty() || chunk.len() != dims.len() + 1 {
                return Err(Error::CorruptFile(format!(
                    "chunk rank {} does not fit dataset rank {}",
                    chunk.len(),
                    dims.len()
                )));
            }
        }
        if let Some(filter) = &filter {
            validate_filter(filter, &datatype)?;
        }

        Ok(Dataset {
            file,
            header_address,
            dims,
            datatype,
            layout,
            filter,
        })
    }

    /// Element count per dimension.
    pub fn shape(&self) -> &[u64] {
        &self.dims
    }

    /// Element size in bytes.
    pub fn element_size(&self) -> usize {
        self.datatype.size as usize
    }

    pub fn datatype_class(&self) -> DatatypeClass {
        self.datatype.class
    }

    pub fn is_signed(&self) -> bool {
        self.datatype.signed
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.layout, Layout::Chunked { .. })
    }

    /// Chunk shape without the synthetic element-size dimension, or
    /// `None` for non-chunked layouts.
    pub fn chunk_shape(&self) -> Option<&[u64]> {
        match &self.layout {
            Layout::Chunked { dims, .. } => Some(&dims[..dims.len() - 1]),
            _ => None,
        }
    }

    /// File address of the dataset's object header.
    pub fn header_address(&self) -> u64 {
        self.header_address
    }

    /// Id of the active compression filter, if any.
    pub fn filter_id(&self) -> Option<u16> {
        self.filter.as_ref().map(|f| f.id)
    }

    /// Byte count one `read` call produces: the chunk size for chunked
    /// layouts, the whole dataset otherwise.
    pub fn read_size(&self) -> usize {
        let elements: u64 = match self.chunk_shape() {
            Some(chunk) => chunk.iter().product(),
            None => self.dims.iter().product(),
        };
        elements as usize * self.element_size()
    }

    /// Reads the chunk at `chunk_offset` (per-dimension element
    /// offsets) into a freshly allocated buffer.
    pub fn read(&self, chunk_offset: &[u64]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.read_size()];
        self.read_into(chunk_offset, &mut out)?;
        Ok(out)
    }

    /// Reads the chunk at `chunk_offset` into `out`, which must be
    /// exactly [`Dataset::read_size`] bytes.
    pub fn read_into(&self, chunk_offset: &[u64], out: &mut [u8]) -> Result<()> {
        let expected = self.read_size();
        if out.len() != expected {
            return Err(Error::SizeMismatch {
                expected: expected as u64,
                actual: out.len() as u64,
            });
        }

        let data = self.file.bytes();
        let (address, stored_size) = match &self.layout {
            Layout::Compact { address, size } => (*address, *size as u64),
            Layout::Contiguous { address, size } => {
                if is_undefined(*address) {
                    return Err(Error::PathNotFound("dataset has no allocated data".into()));
                }
                (*address, *size)
            }
            Layout::Chunked { index, dims } => self.locate_chunk(data, index, dims, chunk_offset)?,
        };

        let view = ByteView::new(data, address)?;
        let stored = view.bytes(0, stored_size as usize)?;
        match self.filter.as_ref() {
            None => {
                if stored.len() != expected {
                    return Err(Error::CorruptFile(format!(
                        "unfiltered chunk holds {} bytes, expected {expected}",
                        stored.len()
                    )));
                }
                out.copy_from_slice(stored);
                Ok(())
            }
            Some(filter) if filter.id == FILTER_LZ4 => decode::lz4_decode(stored, out),
            Some(filter) if filter.id == FILTER_BITSHUFFLE => {
                let elem = filter.client_data[2] as usize;
                decode::bitshuffle_lz4_decode(stored, out, elem)
            }
            Some(filter) => Err(Error::UnsupportedFilter(format!("filter id {}", filter.id))),
        }
    }

    /// Finds the raw location of one chunk: `(address, stored bytes)`.
    fn locate_chunk(
        &self,
        data: &[u8],
        index: &ChunkIndexKind,
        chunk_dims: &[u64],
        chunk_offset: &[u64],
    ) -> Result<(u64, u64)> {
        let spatial = &chunk_dims[..chunk_dims.len() - 1];
        if chunk_offset.len() != spatial.len() {
            return Err(Error::SizeMismatch {
                expected: spatial.len() as u64,
                actual: chunk_offset.len() as u64,
            });
        }
        for (d, (&off, &chunk)) in chunk_offset.iter().zip(spatial).enumerate() {
            if chunk == 0 {
                return Err(Error::CorruptFile(format!("zero chunk extent in dim {d}")));
            }
            if off % chunk != 0 {
                return Err(Error::PathNotFound(format!(
                    "offset {off} in dim {d} is not aligned to the {chunk}-element chunk"
                )));
            }
            if off >= self.dims[d] {
                return Err(Error::PathNotFound(format!(
                    "offset {off} in dim {d} is past the {}-element extent",
                    self.dims[d]
                )));
            }
        }

        // On disk the chunk record carries one extra dimension (the
        // element size); pad the logical offsets with trailing zeros.
        let mut padded = chunk_offset.to_vec();
        padded.resize(chunk_dims.len(), 0);

        let nominal = self.read_size() as u64;
        match index {
            ChunkIndexKind::BTreeV1 { address } => {
                let hit = btree_v1::find_chunk(data, *address, &padded)?.ok_or_else(|| {
                    Error::PathNotFound(format!("no chunk stored at offset {chunk_offset:?}"))
                })?;
                Ok((hit.address, hit.stored_size as u64))
            }
            ChunkIndexKind::FixedArray { address } => {
                let array = FixedArray::parse(data, *address)?;
                let entry = array.entry(self.linear_chunk_index(spatial, chunk_offset))?;
                Ok(entry_location(entry, nominal))
            }
            ChunkIndexKind::ExtensibleArray { address } => {
                let array = ExtensibleArray::parse(data, *address)?;
                let entry = array.entry(self.linear_chunk_index(spatial, chunk_offset))?;
                Ok(entry_location(entry, nominal))
            }
            ChunkIndexKind::BTreeV2 { address } => {
                let tree = BTreeV2::parse(data, *address)?;
                let hit = tree.find_chunk(&padded)?.ok_or_else(|| {
                    Error::PathNotFound(format!("no chunk stored at offset {chunk_offset:?}"))
                })?;
                Ok((hit.address, hit.stored_size.unwrap_or(nominal)))
            }
        }
    }

    /// Row-major chunk number of the chunk starting at `chunk_offset`.
    fn linear_chunk_index(&self, spatial: &[u64], chunk_offset: &[u64]) -> u64 {
        let mut index = 0u64;
        for (d, (&off, &chunk)) in chunk_offset.iter().zip(spatial).enumerate() {
            let chunks_in_dim = self.dims[d].div_ceil(chunk);
            index = index * chunks_in_dim + off / chunk;
        }
        index
    }
}

fn entry_location(entry: ChunkEntry, nominal: u64) -> (u64, u64) {
    (entry.address, entry.stored_size.unwrap_or(nominal))
}

fn validate_filter(filter: &Filter, datatype: &DatatypeMsg) -> Result<()> {
    match filter.id {
        FILTER_LZ4 => Ok(()),
        FILTER_BITSHUFFLE => {
            if filter.client_data.len() < 5 {
                return Err(Error::UnsupportedFilter(format!(
                    "bitshuffle with {} client values",
                    filter.client_data.len()
                )));
            }
            if filter.client_data[4] != BSHUF_COMPRESS_LZ4 {
                return Err(Error::UnsupportedFilter(format!(
                    "bitshuffle sub-compression {}",
                    filter.client_data[4]
                )));
            }
            let elem = filter.client_data[2];
            if elem <= 0 {
                return Err(Error::CorruptFile(format!(
                    "bitshuffle element size {elem}"
                )));
            }
            if elem as u32 != datatype.size {
                return Err(Error::CorruptFile(format!(
                    "bitshuffle element size {elem} disagrees with the {}-byte datatype",
                    datatype.size
                )));
            }
            Ok(())
        }
        other => Err(Error::UnsupportedFilter(format!("filter id {other}"))),
    }
}
