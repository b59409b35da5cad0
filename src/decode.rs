//! Chunk decompression: the LZ4 block-stream container and the
//! bitshuffle+LZ4 container.
//!
//! Both formats share an outer envelope written by the HDF5 filter
//! plugins: an 8-byte big-endian original (decompressed) size, a 4-byte
//! big-endian nominal block size in bytes, then a stream of per-block
//! sections each prefixed with a 4-byte big-endian compressed size.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Target uncompressed block size, in bytes, used when the container
/// header carries a zero block size.
const DEFAULT_BLOCK_BYTES: usize = 8192;

struct Container<'a> {
    payload: &'a [u8],
    total: usize,
    block_bytes: usize,
}

fn read_container_header(src: &[u8], expected_total: usize) -> Result<Container<'_>> {
    if src.len() < 12 {
        return Err(Error::CorruptFile(format!(
            "compressed chunk of {} bytes is too short for the container header",
            src.len()
        )));
    }
    let total = BigEndian::read_u64(&src[0..8]);
    let total = usize::try_from(total)
        .map_err(|_| Error::CorruptFile(format!("absurd decompressed size {total}")))?;
    if total != expected_total {
        return Err(Error::DecompressionError(format!(
            "container declares {total} decompressed bytes, expected {expected_total}"
        )));
    }
    let mut block_bytes = BigEndian::read_u32(&src[8..12]) as usize;
    if block_bytes == 0 || block_bytes > total {
        block_bytes = total;
    }
    Ok(Container {
        payload: &src[12..],
        total,
        block_bytes,
    })
}

fn take_block<'a>(payload: &mut &'a [u8]) -> Result<&'a [u8]> {
    if payload.len() < 4 {
        return Err(Error::CorruptFile(
            "compressed chunk truncated before a block header".into(),
        ));
    }
    let csize = BigEndian::read_u32(&payload[0..4]) as usize;
    let rest = &payload[4..];
    if csize > rest.len() {
        return Err(Error::CorruptFile(format!(
            "compressed block of {csize} bytes overruns the chunk ({} left)",
            rest.len()
        )));
    }
    *payload = &rest[csize..];
    Ok(&rest[..csize])
}

fn lz4_block_into(compressed: &[u8], dst: &mut [u8]) -> Result<()> {
    let written = lz4_flex::block::decompress_into(compressed, dst)
        .map_err(|e| Error::DecompressionError(e.to_string()))?;
    if written != dst.len() {
        return Err(Error::DecompressionError(format!(
            "block decompressed to {written} bytes, expected {}",
            dst.len()
        )));
    }
    Ok(())
}

/// Decodes an LZ4 block-stream container into `dst`.
///
/// `dst` must be exactly the decompressed size. A block whose
/// compressed size equals its plain size is stored uncompressed; the
/// final block may be shorter than the nominal block size.
pub fn lz4_decode(src: &[u8], dst: &mut [u8]) -> Result<()> {
    let container = read_container_header(src, dst.len())?;
    let mut payload = container.payload;
    let mut out_pos = 0usize;
    while out_pos < container.total {
        let plain = container.block_bytes.min(container.total - out_pos);
        let block = take_block(&mut payload)?;
        let out = &mut dst[out_pos..out_pos + plain];
        if block.len() == plain {
            out.copy_from_slice(block);
        } else {
            lz4_block_into(block, out)?;
        }
        out_pos += plain;
    }
    Ok(())
}

/// Decodes a bitshuffle+LZ4 container into `dst`.
///
/// `elem_size` comes from the filter's client data. Full blocks hold a
/// multiple-of-8 element count, each LZ4-compressed and bit-transposed;
/// the final sub-8-element remainder is stored raw.
pub fn bitshuffle_lz4_decode(src: &[u8], dst: &mut [u8], elem_size: usize) -> Result<()> {
    if elem_size == 0 {
        return Err(Error::CorruptFile("bitshuffle element size is zero".into()));
    }
    if dst.len() % elem_size != 0 {
        return Err(Error::CorruptFile(format!(
            "chunk of {} bytes is not a whole number of {elem_size}-byte elements",
            dst.len()
        )));
    }
    let container = read_container_header(src, dst.len())?;
    let total_elems = container.total / elem_size;

    let mut elems_per_block = container.block_bytes / elem_size;
    if elems_per_block == 0 {
        elems_per_block = ((DEFAULT_BLOCK_BYTES / elem_size) & !7).max(8);
    }
    if elems_per_block % 8 != 0 {
        return Err(Error::DecompressionError(format!(
            "bitshuffle block of {elems_per_block} elements is not a multiple of 8"
        )));
    }

    let mut payload = container.payload;
    let mut scratch = vec![0u8; elems_per_block * elem_size];
    let mut done = 0usize;
    while total_elems - done >= elems_per_block {
        decode_shuffled_block(&mut payload, dst, done, elems_per_block, elem_size, &mut scratch)?;
        done += elems_per_block;
    }
    let tail = (total_elems - done) & !7;
    if tail > 0 {
        decode_shuffled_block(&mut payload, dst, done, tail, elem_size, &mut scratch)?;
        done += tail;
    }
    // Fewer than 8 elements remain; they are stored verbatim.
    let leftover = (total_elems - done) * elem_size;
    if leftover > 0 {
        if payload.len() < leftover {
            return Err(Error::CorruptFile(
                "compressed chunk truncated in the raw remainder".into(),
            ));
        }
        dst[done * elem_size..].copy_from_slice(&payload[..leftover]);
    }
    Ok(())
}

fn decode_shuffled_block(
    payload: &mut &[u8],
    dst: &mut [u8],
    elem_start: usize,
    n_elems: usize,
    elem_size: usize,
    scratch: &mut [u8],
) -> Result<()> {
    let nbytes = n_elems * elem_size;
    let block = take_block(payload)?;
    lz4_block_into(block, &mut scratch[..nbytes])?;
    let start = elem_start * elem_size;
    untranspose_bits(
        &scratch[..nbytes],
        &mut dst[start..start + nbytes],
        n_elems,
        elem_size,
    );
    Ok(())
}

/// Undoes the bitshuffle transform for one block.
///
/// The shuffled layout groups, for each byte position `j` of the
/// element and each bit `b`, the b-th bits of byte j of all elements
/// into `n_elems / 8` packed bytes.
fn untranspose_bits(shuf: &[u8], out: &mut [u8], n_elems: usize, elem_size: usize) {
    debug_assert_eq!(n_elems % 8, 0);
    let nb = n_elems / 8;
    out.fill(0);
    for j in 0..elem_size {
        for b in 0..8 {
            let row = &shuf[(j * 8 + b) * nb..(j * 8 + b + 1) * nb];
            for (k, &byte) in row.iter().enumerate() {
                if byte == 0 {
                    continue;
                }
                for bit in 0..8 {
                    if byte >> bit & 1 != 0 {
                        out[(k * 8 + bit) * elem_size + j] |= 1 << b;
                    }
                }
            }
        }
    }
}
