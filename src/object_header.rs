//! Object header parsing, versions 1 and 2.
//!
//! An object header is the message list describing one HDF5 object. A
//! v1 header declares its message count up front and chains extra
//! space through continuation messages, exhausted depth-first via a
//! LIFO stack. A v2 header ("OHDR") is a flag-driven sequence of
//! chunks; continuation chunks carry an "OCHK" signature and a
//! trailing checksum.

use crate::error::{Error, Result};
use crate::view::{ByteView, is_undefined};

pub const SIG_OHDR: &[u8; 4] = b"OHDR";
pub const SIG_OCHK: &[u8; 4] = b"OCHK";

/// Header message type codes used by this decoder.
pub const MSG_NIL: u16 = 0x00;
pub const MSG_DATASPACE: u16 = 0x01;
pub const MSG_LINK_INFO: u16 = 0x02;
pub const MSG_DATATYPE: u16 = 0x03;
pub const MSG_LINK: u16 = 0x06;
pub const MSG_DATA_LAYOUT: u16 = 0x08;
pub const MSG_FILTER_PIPELINE: u16 = 0x0B;
pub const MSG_CONTINUATION: u16 = 0x10;
pub const MSG_SYMBOL_TABLE: u16 = 0x11;

/// Highest message type code defined by the format revisions we read.
const MAX_MSG_TYPE: u16 = 0x18;

/// One parsed header message: its type code and a view of its body.
#[derive(Clone, Copy)]
pub struct HeaderMessage<'f> {
    pub msg_type: u16,
    pub body: ByteView<'f>,
    pub size: usize,
}

/// An object header with its messages in on-disk order.
#[derive(Clone)]
pub struct ObjectHeader<'f> {
    view: ByteView<'f>,
    pub version: u8,
    messages: Vec<HeaderMessage<'f>>,
}

impl<'f> ObjectHeader<'f> {
    /// Parses the object header at `address`.
    pub fn parse(data: &'f [u8], address: u64) -> Result<Self> {
        let view = ByteView::new(data, address)?;
        let b0 = view.read_u8(0)?;
        let b1 = view.read_u8(1)?;
        if b0 == 1 && b1 == 0 {
            return Self::parse_v1(view);
        }
        if view.bytes(0, 4)? == SIG_OHDR {
            let version = view.read_u8(4)?;
            if version != 2 {
                return Err(Error::UnsupportedVersion {
                    what: "object header",
                    version,
                });
            }
            return Self::parse_v2(view);
        }
        Err(Error::UnsupportedVersion {
            what: "object header",
            version: b0,
        })
    }

    /// File address of the header.
    pub fn address(&self) -> u64 {
        self.view.base()
    }

    pub fn messages(&self) -> &[HeaderMessage<'f>] {
        &self.messages
    }

    /// First message of the given type, if any.
    pub fn find(&self, msg_type: u16) -> Option<&HeaderMessage<'f>> {
        self.messages.iter().find(|m| m.msg_type == msg_type)
    }

    fn parse_v1(view: ByteView<'f>) -> Result<Self> {
        let num_messages = view.read_u16(2)? as usize;
        let header_size = view.read_u32(8)? as u64;

        let data = view.file_data();
        // Messages start after the 12-byte prefix plus 4 alignment bytes.
        let mut msg_addr = view.base() + 16;
        let mut block_size = header_size;
        let mut used = 0u64;
        let mut pending: Vec<(u64, u64)> = Vec::new();
        let mut messages = Vec::with_capacity(num_messages);

        for idx in 0..num_messages {
            let msg = ByteView::new(data, msg_addr)?;
            let msg_type = msg.read_u16(0)?;
            let size = msg.read_u16(2)? as u64;
            if msg_type > MAX_MSG_TYPE {
                return Err(Error::CorruptFile(format!(
                    "message type 0x{msg_type:x} at 0x{msg_addr:x} is out of range"
                )));
            }
            if size % 8 != 0 {
                return Err(Error::CorruptFile(format!(
                    "message size {size} at 0x{msg_addr:x} is not a multiple of 8"
                )));
            }
            if msg.bytes(5, 3)? != [0, 0, 0] {
                return Err(Error::CorruptFile(format!(
                    "non-zero reserved bytes in message header at 0x{msg_addr:x}"
                )));
            }
            let body = msg.at(8)?;
            if msg_type == MSG_CONTINUATION {
                let cont_addr = body.read_u64(0)?;
                let cont_size = body.read_u64(8)?;
                if !is_undefined(cont_addr) {
                    pending.push((cont_addr, cont_size));
                }
            }
            messages.push(HeaderMessage {
                msg_type,
                body,
                size: size as usize,
            });

            if idx + 1 == num_messages {
                break;
            }
            used += size + 8;
            if used > block_size {
                return Err(Error::CorruptFile(format!(
                    "messages overrun the header block at 0x{msg_addr:x}"
                )));
            }
            if used == block_size {
                let (addr, size) = pending.pop().ok_or_else(|| {
                    Error::CorruptFile(
                        "header block exhausted with messages remaining and no continuation"
                            .into(),
                    )
                })?;
                msg_addr = addr;
                block_size = size;
                used = 0;
            } else {
                msg_addr += size + 8;
            }
        }

        Ok(ObjectHeader {
            view,
            version: 1,
            messages,
        })
    }

    fn parse_v2(view: ByteView<'f>) -> Result<Self> {
        let flags = view.read_u8(5)?;
        let mut pos = 6usize;
        if flags & 0x20 != 0 {
            pos += 16; // access/modification/change/birth times
        }
        if flags & 0x10 != 0 {
            pos += 4; // max-compact / min-dense attribute counts
        }
        let size_width = 1usize << (flags & 0x03);
        let chunk0_size = view.read_uint(pos, size_width)? as usize;
        pos += size_width;
        let tracks_order = flags & 0x04 != 0;

        let mut messages = Vec::new();
        let mut pending: Vec<(u64, u64)> = Vec::new();
        Self::parse_v2_block(
            view.at(pos)?,
            chunk0_size,
            tracks_order,
            &mut messages,
            &mut pending,
        )?;

        let data = view.file_data();
        while let Some((addr, declared)) = pending.pop() {
            let chunk = ByteView::new(data, addr)?;
            chunk.check_signature(0, SIG_OCHK)?;
            // Declared size covers the signature and a trailing checksum.
            let body_len = declared.checked_sub(8).ok_or_else(|| {
                Error::CorruptFile(format!(
                    "continuation chunk at 0x{addr:x} declares only {declared} bytes"
                ))
            })? as usize;
            Self::parse_v2_block(
                chunk.at(4)?,
                body_len,
                tracks_order,
                &mut messages,
                &mut pending,
            )?;
        }

        Ok(ObjectHeader {
            view,
            version: 2,
            messages,
        })
    }

    fn parse_v2_block(
        block: ByteView<'f>,
        len: usize,
        tracks_order: bool,
        messages: &mut Vec<HeaderMessage<'f>>,
        pending: &mut Vec<(u64, u64)>,
    ) -> Result<()> {
        let preamble = if tracks_order { 6 } else { 4 };
        let mut pos = 0usize;
        while pos + preamble <= len {
            let msg_type = block.read_u8(pos)? as u16;
            let size = block.read_u16(pos + 1)? as usize;
            let body_pos = pos + preamble;
            if body_pos + size > len {
                return Err(Error::CorruptFile(format!(
                    "message overruns its header chunk at 0x{:x}",
                    block.base() + pos as u64
                )));
            }
            let body = block.at(body_pos)?;
            if msg_type == MSG_CONTINUATION {
                let cont_addr = body.read_u64(0)?;
                let cont_size = body.read_u64(8)?;
                if !is_undefined(cont_addr) {
                    pending.push((cont_addr, cont_size));
                }
            }
            messages.push(HeaderMessage {
                msg_type,
                body,
                size,
            });
            pos = body_pos + size;
        }
        Ok(())
    }
}

impl PartialEq for ObjectHeader<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
            && self.messages.len() == other.messages.len()
            && self
                .messages
                .iter()
                .zip(&other.messages)
                .all(|(a, b)| a.msg_type == b.msg_type && a.body.base() == b.body.base())
    }
}

impl std::fmt::Debug for ObjectHeader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("address", &self.address())
            .field("version", &self.version)
            .field("messages", &self.messages.len())
            .finish()
    }
}
