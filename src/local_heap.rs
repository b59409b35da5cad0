//! Local heap ("HEAP"): the string store of old-style groups.

use crate::error::{Error, Result};
use crate::view::ByteView;

pub const SIG_HEAP: &[u8; 4] = b"HEAP";

/// A parsed local heap header plus a view of its data segment.
#[derive(Clone, Copy)]
pub struct LocalHeap<'f> {
    segment: ByteView<'f>,
    segment_size: u64,
}

impl<'f> LocalHeap<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        view.check_signature(0, SIG_HEAP)?;
        let version = view.read_u8(4)?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "local heap",
                version,
            });
        }
        let segment_size = view.read_u64(8)?;
        let segment_address = view.read_u64(24)?;
        Ok(LocalHeap {
            segment: ByteView::new(data, segment_address)?,
            segment_size,
        })
    }

    /// Reads the NUL-terminated string at `offset` within the data segment.
    pub fn string_at(&self, offset: u64) -> Result<&'f str> {
        if offset >= self.segment_size {
            return Err(Error::CorruptFile(format!(
                "heap string offset {offset} is past the data segment ({} bytes)",
                self.segment_size
            )));
        }
        self.segment.read_cstr(offset as usize)
    }
}
