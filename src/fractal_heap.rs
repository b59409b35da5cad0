//! Fractal heap ("FRHP"): the paged, row-addressed heap that stores a
//! dense group's link messages.
//!
//! The heap's address space is a doubling table: row 0 and row 1 hold
//! `width` blocks of the starting size, each later row doubles the
//! block size. Heap offsets include every block's own header, so an
//! object is located purely by row/column arithmetic.

use crate::error::{Error, Result};
use crate::view::ByteView;

pub const SIG_FRHP: &[u8; 4] = b"FRHP";
pub const SIG_FHDB: &[u8; 4] = b"FHDB";
pub const SIG_FHIB: &[u8; 4] = b"FHIB";

/// Depth guard against cyclic indirect-block graphs.
const MAX_INDIRECT_DEPTH: usize = 64;

pub struct FractalHeap<'f> {
    data: &'f [u8],
    pub heap_id_length: usize,
    filtered: bool,
    table_width: u64,
    starting_block_size: u64,
    max_direct_block_size: u64,
    max_heap_size_bits: u16,
    root_address: u64,
    root_rows: u16,
}

impl<'f> FractalHeap<'f> {
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        view.check_signature(0, SIG_FRHP)?;
        let version = view.read_u8(4)?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "fractal heap",
                version,
            });
        }
        let heap_id_length = view.read_u16(5)? as usize;
        let filtered = view.read_u16(7)? > 0;
        let table_width = view.read_u16(110)? as u64;
        let starting_block_size = view.read_u64(112)?;
        let max_direct_block_size = view.read_u64(120)?;
        let max_heap_size_bits = view.read_u16(128)?;
        let root_address = view.read_u64(132)?;
        let root_rows = view.read_u16(140)?;

        if table_width == 0
            || starting_block_size == 0
            || !starting_block_size.is_power_of_two()
            || !max_direct_block_size.is_power_of_two()
            || max_direct_block_size < starting_block_size
        {
            return Err(Error::CorruptFile(format!(
                "implausible fractal heap geometry at 0x{address:x}"
            )));
        }
        if heap_id_length == 0 {
            return Err(Error::CorruptFile("zero fractal heap id length".into()));
        }

        Ok(FractalHeap {
            data,
            heap_id_length,
            filtered,
            table_width,
            starting_block_size,
            max_direct_block_size,
            max_heap_size_bits,
            root_address,
            root_rows,
        })
    }

    fn block_offset_field_size(&self) -> usize {
        (self.max_heap_size_bits as usize).div_ceil(8)
    }

    /// Row of the doubling table containing `offset`.
    fn row(&self, offset: u64) -> u64 {
        let row0_span = self.table_width * self.starting_block_size;
        if offset < row0_span {
            0
        } else {
            1 + (offset / row0_span).ilog2() as u64
        }
    }

    fn row_offset(&self, row: u64) -> u64 {
        if row == 0 {
            0
        } else {
            self.table_width * self.starting_block_size * (1u64 << (row - 1))
        }
    }

    fn block_size(&self, row: u64) -> u64 {
        if row == 0 {
            self.starting_block_size
        } else {
            self.starting_block_size * (1u64 << (row - 1))
        }
    }

    /// Number of direct-block pointers an indirect block holds before
    /// its indirect-block pointers start.
    fn max_direct_blocks(&self) -> u64 {
        let doublings = (self.max_direct_block_size / self.starting_block_size).ilog2() as u64;
        (2 + doublings) * self.table_width
    }

    /// Decodes a managed heap id into (heap offset, object length).
    fn decode_id(&self, heap_id: &[u8]) -> Result<(u64, usize)> {
        if heap_id.len() != self.heap_id_length {
            return Err(Error::CorruptFile(format!(
                "heap id of {} bytes, expected {}",
                heap_id.len(),
                self.heap_id_length
            )));
        }
        let id_type = (heap_id[0] >> 4) & 0x3;
        if id_type != 0 {
            return Err(Error::NotImplemented("huge/tiny fractal heap objects"));
        }
        let offset_bytes = self.block_offset_field_size();
        let length_bytes = self
            .heap_id_length
            .checked_sub(1 + offset_bytes)
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                Error::CorruptFile("heap id too short for its offset field".into())
            })?;
        let read_le = |bytes: &[u8]| -> u64 {
            let mut v = 0u64;
            for (i, &b) in bytes.iter().enumerate().take(8) {
                v |= (b as u64) << (i * 8);
            }
            v
        };
        let offset = read_le(&heap_id[1..1 + offset_bytes]);
        let length = read_le(&heap_id[1 + offset_bytes..1 + offset_bytes + length_bytes]);
        Ok((offset, length as usize))
    }

    /// Reads the managed object named by `heap_id`.
    pub fn read_object(&self, heap_id: &[u8]) -> Result<&'f [u8]> {
        let (offset, length) = self.decode_id(heap_id)?;
        let root = ByteView::new(self.data, self.root_address)?;
        let object = if self.root_rows == 0 {
            root.check_signature(0, SIG_FHDB)?;
            root.at(offset as usize)?
        } else {
            self.locate_in_indirect(root, offset, 0)?
        };
        object.bytes(0, length)
    }

    fn locate_in_indirect(
        &self,
        block: ByteView<'f>,
        heap_offset: u64,
        depth: usize,
    ) -> Result<ByteView<'f>> {
        if depth > MAX_INDIRECT_DEPTH {
            return Err(Error::CorruptFile(
                "fractal heap indirect blocks nest too deeply".into(),
            ));
        }
        block.check_signature(0, SIG_FHIB)?;
        let row = self.row(heap_offset);
        let row_offset = self.row_offset(row);
        let block_size = self.block_size(row);
        let column = (heap_offset - row_offset) / block_size;
        let column_offset = row_offset + column * block_size;
        let block_number = row * self.table_width + column;
        let max_direct = self.max_direct_blocks();

        let pointers_start = 13 + self.block_offset_field_size();
        let direct_entry = 8 + if self.filtered { 12 } else { 0 };
        if block_number < max_direct {
            let ptr = pointers_start + block_number as usize * direct_entry;
            let child = ByteView::new(self.data, block.read_u64(ptr)?)?;
            child.check_signature(0, SIG_FHDB)?;
            child.at((heap_offset - column_offset) as usize)
        } else {
            let ptr = pointers_start
                + max_direct as usize * direct_entry
                + (block_number - max_direct) as usize * 8;
            let child = ByteView::new(self.data, block.read_u64(ptr)?)?;
            self.locate_in_indirect(child, heap_offset - column_offset, depth + 1)
        }
    }
}
