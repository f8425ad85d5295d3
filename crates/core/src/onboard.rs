//! Onboard memory store via HID++ 2.0 ONBOARD_PROFILES feature (0x8100).
//!
//! HID++ 2.0 ONBOARD_PROFILES functions:
//!   - 0x00: getDescription → memory model, formats, counts, sector size
//!   - 0x10: setOnboardMode(mode) → mode in params[1]
//!   - 0x20: getOnboardMode → params[0]
//!   - 0x30: setCurrentProfile(index + 1) → params[1]
//!   - 0x40: getCurrentProfile → params[1], 1-based
//!   - 0x50: memoryRead(page, offset) → 16 bytes (long)
//!   - 0x60: memoryAddrWrite(page, 0, count) → opens a page write
//!   - 0x70: memoryWrite(16 bytes) → one chunk (long)
//!   - 0x80: memoryWriteEnd → commits the page
//!   - 0xB0: getCurrentDpiIndex → params[0]
//!   - 0xC0: setCurrentDpiIndex(index) → params[0]
//!
//! Pages are addressed by a 16-bit id: user pages are `0x0000 | n`, factory
//! (ROM) pages `0x0100 | n`. Page 0 holds the profile directory. Every page
//! ends with a big-endian CRC-16/CCITT trailer.
//!
//! "Host mode" means the computer drives the device settings; "onboard mode"
//! means the mouse runs from its stored profiles. Opening a store switches
//! the device to onboard mode.

use crate::crc;
use crate::device::Session;
use crate::error::{Error, Result};
use crate::hidpp::{features, Frame, ReportKind};
use crate::macros::MacroMemory;
use crate::safety;
use serde::Serialize;
use tracing::{debug, trace};

/// Base address of user-writable pages.
pub const USER_PAGE_BASE: u16 = 0x0000;
/// Base address of factory pages. The high byte is the read-ROM flag.
pub const ROM_PAGE_BASE: u16 = 0x0100;
/// Page holding the profile directory.
pub const DIRECTORY_PAGE: u16 = 0x0000;
/// Directory terminator.
pub const DIRECTORY_END: u16 = 0xFFFF;
/// Bytes moved per memory read or write transaction.
pub const CHUNK_LEN: usize = 16;
/// Highest valid DPI slot index.
pub const MAX_DPI_INDEX: u8 = 4;
/// Button slots per profile page.
pub const MAX_BUTTONS: u8 = 16;

const DIRECTORY_ENTRY_LEN: usize = 4;

const GET_DESCRIPTION: u8 = 0x00;
const SET_MODE: u8 = 0x10;
const GET_MODE: u8 = 0x20;
const SET_CURRENT_PROFILE: u8 = 0x30;
const GET_CURRENT_PROFILE: u8 = 0x40;
const MEMORY_READ: u8 = 0x50;
const WRITE_START: u8 = 0x60;
const WRITE_CHUNK: u8 = 0x70;
const WRITE_END: u8 = 0x80;
const GET_DPI_INDEX: u8 = 0xB0;
const SET_DPI_INDEX: u8 = 0xC0;

const MEMORY_MODEL_G402: u8 = 0x01;
const PROFILE_FORMATS: std::ops::RangeInclusive<u8> = 0x01..=0x04;
const MACRO_FORMAT_G402: u8 = 0x01;
const SECTOR_SIZE_G402: u16 = 256;

/// Onboard profile mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnboardMode {
    NoChange = 0,
    /// Mouse uses its stored onboard profiles.
    Onboard = 1,
    /// Host controls settings (software manages device).
    Host = 2,
}

impl OnboardMode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::NoChange),
            1 => Some(Self::Onboard),
            2 => Some(Self::Host),
            _ => None,
        }
    }
}

/// Onboard memory layout advertised by getDescription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Description {
    pub memory_model: u8,
    pub profile_format: u8,
    pub macro_format: u8,
    /// Number of user profiles.
    pub profile_count: u8,
    /// Number of factory profiles.
    pub rom_profile_count: u8,
    /// Buttons per profile, capped at [`MAX_BUTTONS`].
    pub button_count: u8,
    pub sector_count: u8,
    /// Bytes per page, CRC trailer included.
    pub sector_size: u16,
    pub mechanical_layout: u8,
    pub various_info: u8,
}

impl Description {
    /// Parse the getDescription reply parameters.
    pub fn parse(params: &[u8]) -> Result<Self> {
        if params.len() < 11 {
            return Err(Error::InvalidFrame(format!(
                "onboard description needs 11 bytes, got {}",
                params.len()
            )));
        }
        Ok(Self {
            memory_model: params[0],
            profile_format: params[1],
            macro_format: params[2],
            profile_count: params[3],
            rom_profile_count: params[4],
            button_count: params[5].min(MAX_BUTTONS),
            sector_count: params[6],
            sector_size: u16::from_be_bytes([params[7], params[8]]),
            mechanical_layout: params[9],
            various_info: params[10],
        })
    }

    /// Reject layouts outside the known set.
    pub fn validate(&self) -> Result<()> {
        if self.memory_model != MEMORY_MODEL_G402 {
            return Err(Error::UnsupportedLayout {
                field: "memory_model",
                value: self.memory_model as u32,
            });
        }
        if !PROFILE_FORMATS.contains(&self.profile_format) {
            return Err(Error::UnsupportedLayout {
                field: "profile_format",
                value: self.profile_format as u32,
            });
        }
        if self.macro_format != MACRO_FORMAT_G402 {
            return Err(Error::UnsupportedLayout {
                field: "macro_format",
                value: self.macro_format as u32,
            });
        }
        if self.sector_size != SECTOR_SIZE_G402 {
            return Err(Error::UnsupportedLayout {
                field: "sector_size",
                value: self.sector_size as u32,
            });
        }
        Ok(())
    }

    pub fn has_g_shift(&self) -> bool {
        self.mechanical_layout & 0x03 == 0x02
    }

    pub fn has_dpi_shift(&self) -> bool {
        (self.mechanical_layout & 0x0C) >> 2 == 0x02
    }

    pub fn is_corded(&self) -> bool {
        matches!(self.various_info & 0x07, 1 | 4)
    }

    pub fn is_wireless(&self) -> bool {
        matches!(self.various_info & 0x07, 2 | 4)
    }

    /// Bytes of page 0 used by the directory: one entry per profile plus the
    /// terminator, rounded up to whole chunks.
    pub fn directory_len(&self) -> usize {
        let used = (self.profile_count as usize + 1) * DIRECTORY_ENTRY_LEN;
        used.div_ceil(CHUNK_LEN) * CHUNK_LEN
    }
}

/// One row of the profile directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    /// Page holding the profile.
    pub page: u16,
    pub enabled: bool,
}

/// Profile directory stored in page 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Directory {
    pub entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Directory with every profile at its default page, all disabled.
    pub fn with_defaults(profile_count: u8) -> Self {
        Self {
            entries: (0..profile_count as u16)
                .map(|i| DirectoryEntry {
                    page: USER_PAGE_BASE | (i + 1),
                    enabled: false,
                })
                .collect(),
        }
    }

    /// Decode at most `profile_count` entries, stopping at the terminator.
    pub fn decode(page: &[u8], profile_count: u8) -> Self {
        let entries = page
            .chunks_exact(DIRECTORY_ENTRY_LEN)
            .take(profile_count as usize)
            .map(|e| (u16::from_be_bytes([e[0], e[1]]), e[2]))
            .take_while(|&(addr, _)| addr != DIRECTORY_END)
            .map(|(page, enabled)| DirectoryEntry {
                page,
                enabled: enabled != 0,
            })
            .collect();
        Self { entries }
    }

    /// Encode onto a `sector_size` page image (trailer not yet sealed).
    pub fn encode(&self, sector_size: usize) -> Vec<u8> {
        let mut page = Vec::with_capacity(sector_size);
        for entry in &self.entries {
            page.extend_from_slice(&entry.page.to_be_bytes());
            page.push(entry.enabled as u8);
            page.push(0x00);
        }
        page.extend_from_slice(&DIRECTORY_END.to_be_bytes());
        page.extend_from_slice(&[0x00, 0x00]);
        page.resize(sector_size, 0xFF);
        page
    }

    pub fn entry(&self, index: usize) -> Option<&DirectoryEntry> {
        self.entries.get(index)
    }

    /// Whether profile `index` is marked enabled.
    pub fn is_enabled(&self, index: usize) -> bool {
        self.entry(index).is_some_and(|e| e.enabled)
    }
}

/// Read the onboard memory description.
pub fn get_description(session: &Session) -> Result<Description> {
    let resp = session.call(
        features::ONBOARD_PROFILES,
        ReportKind::Short,
        GET_DESCRIPTION,
        &[],
    )?;
    Description::parse(resp.params())
}

/// Access to a device's onboard memory.
///
/// Borrows the session for its lifetime; the directory is read once and
/// cached until the store rewrites it.
pub struct OnboardStore<'s> {
    session: &'s Session,
    description: Description,
    directory: Option<Directory>,
}

impl<'s> OnboardStore<'s> {
    /// Read and validate the layout, then switch the device to onboard mode.
    pub fn open(session: &'s Session) -> Result<Self> {
        let store = Self::inspect(session)?;
        if store.mode()? != OnboardMode::Onboard {
            debug!("switching device to onboard mode");
            store.set_mode(OnboardMode::Onboard)?;
        }
        Ok(store)
    }

    /// Read and validate the layout without touching the onboard mode.
    ///
    /// Enough for reading pages, the directory and macros.
    pub fn inspect(session: &'s Session) -> Result<Self> {
        let description = get_description(session)?;
        description.validate()?;
        debug!(
            profiles = description.profile_count,
            rom_profiles = description.rom_profile_count,
            buttons = description.button_count,
            sector_size = description.sector_size,
            g_shift = description.has_g_shift(),
            dpi_shift = description.has_dpi_shift(),
            "onboard memory layout"
        );

        Ok(Self {
            session,
            description,
            directory: None,
        })
    }

    pub fn description(&self) -> &Description {
        &self.description
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    fn sector_size(&self) -> usize {
        self.description.sector_size as usize
    }

    fn call(&self, kind: ReportKind, function: u8, params: &[u8]) -> Result<Frame> {
        self.session
            .call(features::ONBOARD_PROFILES, kind, function, params)
    }

    pub fn mode(&self) -> Result<OnboardMode> {
        let resp = self.call(ReportKind::Short, GET_MODE, &[])?;
        OnboardMode::from_byte(resp.params[0]).ok_or(Error::UnsupportedLayout {
            field: "onboard_mode",
            value: resp.params[0] as u32,
        })
    }

    pub fn set_mode(&self, mode: OnboardMode) -> Result<()> {
        self.call(ReportKind::Short, SET_MODE, &[0x00, mode as u8])?;
        Ok(())
    }

    /// Active profile index (0-based), or `None` if the device reports none.
    pub fn current_profile(&self) -> Result<Option<u8>> {
        let resp = self.call(ReportKind::Short, GET_CURRENT_PROFILE, &[])?;
        Ok(resp.params[1].checked_sub(1))
    }

    pub fn set_current_profile(&self, index: u8) -> Result<()> {
        safety::validate_profile_index(index, &self.description)?;
        self.call(ReportKind::Short, SET_CURRENT_PROFILE, &[0x00, index + 1])?;
        Ok(())
    }

    pub fn current_dpi_index(&self) -> Result<u8> {
        let resp = self.call(ReportKind::Short, GET_DPI_INDEX, &[])?;
        Ok(resp.params[0])
    }

    pub fn set_current_dpi_index(&self, index: u8) -> Result<()> {
        safety::validate_dpi_index("dpi_index", index)?;
        self.call(ReportKind::Short, SET_DPI_INDEX, &[index])?;
        Ok(())
    }

    /// One 16-byte memory read at `offset` of `page`.
    pub fn read_chunk(&self, page: u16, offset: u16) -> Result<[u8; CHUNK_LEN]> {
        let mut params = [0u8; 4];
        params[..2].copy_from_slice(&page.to_be_bytes());
        params[2..].copy_from_slice(&offset.to_be_bytes());
        let resp = self.call(ReportKind::Long, MEMORY_READ, &params)?;
        let mut chunk = [0u8; CHUNK_LEN];
        chunk.copy_from_slice(&resp.params[..CHUNK_LEN]);
        Ok(chunk)
    }

    /// Read `len` bytes of `page` starting at `offset`, clipped to the page.
    ///
    /// The device refuses reads that start past `sector_size - 16`, so a
    /// trailing partial chunk is read from there and sliced.
    pub fn read_bytes(&self, page: u16, offset: usize, len: usize) -> Result<Vec<u8>> {
        let size = self.sector_size();
        if offset >= size {
            return Err(Error::OutOfRange {
                field: "offset",
                value: offset as u32,
                min: 0,
                max: (size - 1) as u32,
            });
        }
        let end = (offset + len).min(size);
        let mut out = Vec::with_capacity(end - offset);
        let mut pos = offset;
        while pos < end {
            let at = pos.min(size - CHUNK_LEN);
            let chunk = self.read_chunk(page, at as u16)?;
            let skip = pos - at;
            let take = (end - pos).min(CHUNK_LEN - skip);
            out.extend_from_slice(&chunk[skip..skip + take]);
            pos += take;
        }
        Ok(out)
    }

    /// Read a full page without checking its trailer.
    pub fn read_page_raw(&self, page: u16) -> Result<Vec<u8>> {
        debug!(page = format_args!("0x{:04X}", page), "reading page");
        self.read_bytes(page, 0, self.sector_size())
    }

    /// Read a full page and verify its CRC.
    pub fn read_page(&self, page: u16) -> Result<Vec<u8>> {
        let data = self.read_page_raw(page)?;
        match crc::page_crc(&data) {
            Some((stored, computed)) if stored != computed => {
                debug!(
                    page = format_args!("0x{:04X}", page),
                    stored = format_args!("0x{:04X}", stored),
                    computed = format_args!("0x{:04X}", computed),
                    "invalid page CRC"
                );
                Err(Error::CorruptPage {
                    page,
                    stored,
                    computed,
                })
            }
            _ => Ok(data),
        }
    }

    /// Seal `data` with its CRC and write it as `page`.
    ///
    /// Runs write-start, one write-chunk per 16 bytes, then write-end. A
    /// failure part-way leaves the page in an undefined state; nothing is
    /// retried.
    pub fn write_page(&self, page: u16, data: &mut [u8]) -> Result<()> {
        let size = self.sector_size();
        if data.len() != size {
            return Err(Error::InvalidInput(format!(
                "page image is {} bytes, device pages are {}",
                data.len(),
                size
            )));
        }
        if page & ROM_PAGE_BASE != 0 {
            return Err(Error::InvalidInput(format!(
                "page 0x{page:04X} is read-only"
            )));
        }
        crc::seal_page(data);

        debug!(page = format_args!("0x{:04X}", page), "writing page");
        let mut start = [0u8; 6];
        start[..2].copy_from_slice(&page.to_be_bytes());
        start[4..].copy_from_slice(&self.description.sector_size.to_be_bytes());
        self.call(ReportKind::Long, WRITE_START, &start)?;

        for (i, chunk) in data.chunks(CHUNK_LEN).enumerate() {
            trace!(page, chunk = i, "write chunk");
            self.call(ReportKind::Long, WRITE_CHUNK, chunk)?;
        }

        self.call(ReportKind::Short, WRITE_END, &[])?;
        Ok(())
    }

    /// The profile directory, read from page 0 on first use.
    ///
    /// A directory page with a bad CRC is an error; it is not cached.
    pub fn directory(&mut self) -> Result<Directory> {
        if let Some(dir) = &self.directory {
            return Ok(dir.clone());
        }
        let page = self.read_page(DIRECTORY_PAGE)?;
        let dir = self.decode_directory(&page);
        for (i, entry) in dir.entries.iter().enumerate() {
            let expected = USER_PAGE_BASE | (i as u16 + 1);
            if entry.page != expected {
                debug!(
                    profile = i,
                    page = format_args!("0x{:04X}", entry.page),
                    expected = format_args!("0x{:04X}", expected),
                    "unexpected profile address in directory"
                );
            }
        }
        self.directory = Some(dir.clone());
        Ok(dir)
    }

    /// Rewrite page 0 from `dir` and cache it.
    pub fn write_directory(&mut self, dir: &Directory) -> Result<()> {
        let mut page = dir.encode(self.sector_size());
        self.write_page(DIRECTORY_PAGE, &mut page)?;
        self.directory = Some(dir.clone());
        Ok(())
    }

    /// Mark profile `index` enabled or disabled.
    ///
    /// The directory has no per-entry write, so the whole page is rewritten.
    /// An unreadable directory is rebuilt from default addresses.
    pub fn set_enabled(&mut self, index: u8, enabled: bool) -> Result<()> {
        safety::validate_profile_index(index, &self.description)?;
        let mut dir = match self.directory() {
            Ok(dir) => dir,
            Err(Error::CorruptPage { .. }) => {
                debug!("directory unreadable, rebuilding");
                Directory::default()
            }
            Err(e) => return Err(e),
        };
        let defaults = Directory::with_defaults(self.description.profile_count);
        if dir.entries.len() < defaults.entries.len() {
            let have = dir.entries.len();
            dir.entries.extend_from_slice(&defaults.entries[have..]);
        }

        let entry = &mut dir.entries[index as usize];
        if entry.enabled == enabled && self.directory.is_some() {
            debug!(profile = index, enabled, "directory already up to date");
            return Ok(());
        }
        entry.enabled = enabled;
        self.write_directory(&dir)
    }

    /// Whether `page` is the directory, a factory page, or a profile page.
    ///
    /// Profile pages are the default slots plus whatever the directory
    /// lists; an unreadable directory only protects the defaults.
    pub fn is_reserved_page(&self, page: u16) -> Result<bool> {
        if page == DIRECTORY_PAGE || page & ROM_PAGE_BASE != 0 {
            return Ok(true);
        }
        let listed = match &self.directory {
            Some(dir) => dir.clone(),
            None => match self.read_page(DIRECTORY_PAGE) {
                Ok(data) => self.decode_directory(&data),
                Err(Error::CorruptPage { .. }) => Directory::default(),
                Err(e) => return Err(e),
            },
        };
        let defaults = Directory::with_defaults(self.description.profile_count);
        Ok(defaults
            .entries
            .iter()
            .chain(&listed.entries)
            .any(|e| e.page == page))
    }

    fn decode_directory(&self, page: &[u8]) -> Directory {
        let used = self.description.directory_len().min(page.len());
        trace!(directory_hex = format_args!("{:02X?}", &page[..used]), "directory");
        Directory::decode(&page[..used], self.description.profile_count)
    }

    /// Forget the cached directory.
    pub fn invalidate_directory(&mut self) {
        self.directory = None;
    }
}

impl MacroMemory for OnboardStore<'_> {
    fn page_size(&self) -> usize {
        self.sector_size()
    }

    fn read_bytes(&self, page: u16, offset: usize, len: usize) -> Result<Vec<u8>> {
        OnboardStore::read_bytes(self, page, offset, len)
    }

    fn read_page_raw(&self, page: u16) -> Result<Vec<u8>> {
        OnboardStore::read_page_raw(self, page)
    }

    fn write_page(&self, page: u16, data: &mut [u8]) -> Result<()> {
        OnboardStore::write_page(self, page, data)
    }

    fn is_reserved(&self, page: u16) -> Result<bool> {
        self.is_reserved_page(page)
    }
}
