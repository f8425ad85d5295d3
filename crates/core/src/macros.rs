//! Macro bytecode stored in onboard memory.
//!
//! A macro is a sequence of tagged items starting at `(page, offset)`:
//!
//! | tag  | item        | size | payload                      |
//! |------|-------------|------|------------------------------|
//! | 0x01 | noop        | 1    |                              |
//! | 0x40 | delay       | 3    | BE u16 ticks                 |
//! | 0x43 | key press   | 3    | BE u16 key descriptor        |
//! | 0x44 | key release | 3    | BE u16 key descriptor        |
//! | 0x60 | jump        | 3    | destination page, offset     |
//! | 0xFF | end         | 1    |                              |
//!
//! Decoding follows jumps transparently and never emits noop, jump or end.
//! The last two bytes of a page hold its CRC and are never part of a macro.

use crate::crc;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const TAG_NOOP: u8 = 0x01;
pub const TAG_DELAY: u8 = 0x40;
pub const TAG_KEY_PRESS: u8 = 0x43;
pub const TAG_KEY_RELEASE: u8 = 0x44;
pub const TAG_JUMP: u8 = 0x60;
pub const TAG_END: u8 = 0xFF;

/// Bytes fetched per memory read while decoding.
pub const WINDOW_LEN: usize = 32;
/// Jumps followed before a macro is declared looping.
pub const MAX_JUMPS: usize = 32;

const CRC_LEN: usize = 2;

/// One decoded macro step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MacroItem {
    Delay { ticks: u16 },
    KeyPress { key: u16 },
    KeyRelease { key: u16 },
}

impl MacroItem {
    fn encode_into(&self, out: &mut Vec<u8>) {
        let (tag, value) = match *self {
            MacroItem::Delay { ticks } => (TAG_DELAY, ticks),
            MacroItem::KeyPress { key } => (TAG_KEY_PRESS, key),
            MacroItem::KeyRelease { key } => (TAG_KEY_RELEASE, key),
        };
        out.push(tag);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

impl fmt::Display for MacroItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroItem::Delay { ticks } => write!(f, "delay {ticks}"),
            MacroItem::KeyPress { key } => write!(f, "press 0x{key:04X}"),
            MacroItem::KeyRelease { key } => write!(f, "release 0x{key:04X}"),
        }
    }
}

/// Page-addressed memory that macros live in.
pub trait MacroMemory {
    /// Bytes per page, CRC trailer included.
    fn page_size(&self) -> usize;

    /// Up to `len` bytes of `page` from `offset`, clipped to the page end.
    fn read_bytes(&self, page: u16, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// A full page image, trailer unchecked.
    fn read_page_raw(&self, page: u16) -> Result<Vec<u8>>;

    /// Seal `data` with its CRC and write it as `page`.
    fn write_page(&self, page: u16, data: &mut [u8]) -> Result<()>;

    /// Whether `page` holds data other than macros (directory, profiles,
    /// factory pages) and must not be rewritten by [`write_macro`].
    fn is_reserved(&self, page: u16) -> Result<bool>;
}

/// Lazily filled view of one page, starting at a fixed offset.
struct Window {
    page: u16,
    base: usize,
    limit: usize,
    buf: Vec<u8>,
}

impl Window {
    fn new(page: u16, base: usize, limit: usize) -> Self {
        Self {
            page,
            base,
            limit,
            buf: Vec::new(),
        }
    }

    fn byte<M: MacroMemory + ?Sized>(&mut self, mem: &M, pos: usize) -> Result<u8> {
        if pos < self.base || pos >= self.limit {
            return Err(Error::MacroDecode(format!(
                "ran past the end of page 0x{:04X} without an end item",
                self.page
            )));
        }
        let index = pos - self.base;
        while index >= self.buf.len() {
            let from = self.base + self.buf.len();
            // double the buffer on each fetch
            let want = self.buf.len().max(WINDOW_LEN).min(self.limit - from);
            let bytes = mem.read_bytes(self.page, from, want)?;
            if bytes.is_empty() {
                return Err(Error::MacroDecode(format!(
                    "no data at page 0x{:04X} offset {from}",
                    self.page
                )));
            }
            self.buf.extend_from_slice(&bytes);
        }
        Ok(self.buf[index])
    }
}

/// Decode the macro starting at `offset` of `page`.
pub fn read_macro<M: MacroMemory + ?Sized>(
    mem: &M,
    page: u16,
    offset: usize,
) -> Result<Vec<MacroItem>> {
    let limit = mem.page_size().saturating_sub(CRC_LEN);
    let mut window = Window::new(page, offset, limit);
    let mut pos = offset;
    let mut jumps = 0;
    let mut items = Vec::new();

    loop {
        let tag = window.byte(mem, pos)?;
        match tag {
            TAG_END => break,
            TAG_NOOP => pos += 1,
            TAG_DELAY | TAG_KEY_PRESS | TAG_KEY_RELEASE | TAG_JUMP => {
                let hi = window.byte(mem, pos + 1)?;
                let lo = window.byte(mem, pos + 2)?;
                pos += 3;
                let value = u16::from_be_bytes([hi, lo]);
                match tag {
                    TAG_DELAY => items.push(MacroItem::Delay { ticks: value }),
                    TAG_KEY_PRESS => items.push(MacroItem::KeyPress { key: value }),
                    TAG_KEY_RELEASE => items.push(MacroItem::KeyRelease { key: value }),
                    _ => {
                        jumps += 1;
                        if jumps > MAX_JUMPS {
                            return Err(Error::MacroDecode(format!(
                                "more than {MAX_JUMPS} jumps, macro loops"
                            )));
                        }
                        let (to_page, to_offset) = (hi as u16, lo as usize);
                        debug!(
                            from_page = format_args!("0x{:04X}", window.page),
                            to_page = format_args!("0x{:04X}", to_page),
                            to_offset,
                            "macro jump"
                        );
                        window = Window::new(to_page, to_offset, limit);
                        pos = to_offset;
                    }
                }
            }
            other => {
                return Err(Error::MacroDecode(format!(
                    "unknown tag 0x{other:02X} at page 0x{:04X} offset {pos}",
                    window.page
                )));
            }
        }
    }

    Ok(items)
}

/// Serialize `items` followed by an end item.
pub fn encode(items: &[MacroItem]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.len() * 3 + 1);
    for item in items {
        item.encode_into(&mut out);
    }
    out.push(TAG_END);
    out
}

/// Store `items` at `offset` of `page`, keeping the rest of the page.
///
/// The target page must be erased or carry a valid CRC; a corrupt page is
/// never resealed. Reserved pages are refused.
pub fn write_macro<M: MacroMemory + ?Sized>(
    mem: &M,
    page: u16,
    offset: usize,
    items: &[MacroItem],
) -> Result<()> {
    let bytes = encode(items);
    let limit = mem.page_size().saturating_sub(CRC_LEN);
    if offset + bytes.len() > limit {
        return Err(Error::InvalidInput(format!(
            "macro needs {} bytes at offset {offset}, page 0x{page:04X} has {} usable",
            bytes.len(),
            limit
        )));
    }

    if mem.is_reserved(page)? {
        return Err(Error::InvalidInput(format!(
            "page 0x{page:04X} holds the directory or a profile"
        )));
    }

    let mut image = mem.read_page_raw(page)?;
    if !image.iter().all(|&b| b == 0xFF) {
        if let Some((stored, computed)) = crc::page_crc(&image).filter(|(s, c)| s != c) {
            return Err(Error::CorruptPage {
                page,
                stored,
                computed,
            });
        }
    }
    image[offset..offset + bytes.len()].copy_from_slice(&bytes);
    debug!(
        page = format_args!("0x{:04X}", page),
        offset,
        items = items.len(),
        "writing macro"
    );
    mem.write_page(page, &mut image)
}
