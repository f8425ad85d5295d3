//! Onboard profile pages: codec, loading with factory fallback, commit.
//!
//! Page layout (offsets in bytes):
//!
//! | range    | field                                      |
//! |----------|--------------------------------------------|
//! | 0        | report interval (ms)                       |
//! | 1        | default DPI slot                           |
//! | 2        | switched DPI slot                          |
//! | 3..13    | 5 × DPI, little-endian                     |
//! | 13..16   | profile colour (RGB)                       |
//! | 16       | power mode                                 |
//! | 17       | angle snapping                             |
//! | 28..30   | power-save timeout                         |
//! | 30..32   | power-off timeout                          |
//! | 32..96   | 16 × button binding                        |
//! | 96..160  | 16 × alternate (G-shift) binding           |
//! | 160..208 | name                                       |
//! | 208..230 | 2 × LED record                             |
//! | 230..252 | 2 × alternate LED record                   |
//! | 254..256 | CRC                                        |

use crate::error::{Error, Result};
use crate::macros::{self, MacroItem};
use crate::onboard::{
    Description, Directory, DirectoryEntry, OnboardStore, MAX_BUTTONS, ROM_PAGE_BASE,
    USER_PAGE_BASE,
};
use crate::safety;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Bytes of a profile page, CRC trailer included.
pub const PROFILE_LEN: usize = 256;
/// DPI slots per profile.
pub const DPI_SLOTS: usize = 5;
pub const NAME_LEN: usize = 48;
pub const LED_RECORD_LEN: usize = 11;

const REPORT_RATE_OFFSET: usize = 0;
const DEFAULT_DPI_OFFSET: usize = 1;
const SWITCHED_DPI_OFFSET: usize = 2;
const DPI_OFFSET: usize = 3;
const COLOR_OFFSET: usize = 13;
const POWER_MODE_OFFSET: usize = 16;
const ANGLE_SNAPPING_OFFSET: usize = 17;
const POWERSAVE_OFFSET: usize = 28;
const POWEROFF_OFFSET: usize = 30;
const BUTTONS_OFFSET: usize = 32;
const ALT_BUTTONS_OFFSET: usize = 96;
const NAME_OFFSET: usize = 160;
const LEDS_OFFSET: usize = 208;
const ALT_LEDS_OFFSET: usize = 230;
const BINDING_LEN: usize = 4;

const BINDING_MACRO: u8 = 0x00;
const BINDING_HID: u8 = 0x80;
const BINDING_SPECIAL: u8 = 0x90;
const BINDING_DISABLED: u8 = 0xFF;

const HID_MOUSE: u8 = 0x01;
const HID_KEYBOARD: u8 = 0x02;
const HID_CONSUMER: u8 = 0x03;

/// Supported USB polling rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PollingRate {
    Hz125 = 125,
    Hz250 = 250,
    Hz500 = 500,
    Hz1000 = 1000,
}

impl PollingRate {
    /// Convert from raw Hz value.
    pub fn from_hz(hz: u16) -> Option<Self> {
        match hz {
            125 => Some(Self::Hz125),
            250 => Some(Self::Hz250),
            500 => Some(Self::Hz500),
            1000 => Some(Self::Hz1000),
            _ => None,
        }
    }

    /// Get the Hz value.
    pub fn as_hz(&self) -> u16 {
        *self as u16
    }

    /// Report interval as stored on the device.
    pub fn interval_ms(&self) -> u8 {
        (1000 / self.as_hz()) as u8
    }

    /// All supported rates.
    pub const ALL: &'static [PollingRate] = &[
        PollingRate::Hz125,
        PollingRate::Hz250,
        PollingRate::Hz500,
        PollingRate::Hz1000,
    ];
}

impl fmt::Display for PollingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.as_hz())
    }
}

static SPECIAL_NAMES: &[(u8, &str)] = &[
    (0x01, "wheel left"),
    (0x02, "wheel right"),
    (0x03, "resolution up"),
    (0x04, "resolution down"),
    (0x05, "resolution cycle"),
    (0x06, "resolution default"),
    (0x07, "resolution alternate"),
    (0x08, "profile up"),
    (0x09, "profile down"),
    (0x0A, "profile cycle"),
    (0x0B, "second mode"),
];

/// Highest defined special-function code.
pub const MAX_SPECIAL_CODE: u8 = 0x0B;

/// Name of a special-function code.
pub fn special_name(code: u8) -> Option<&'static str> {
    SPECIAL_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// What a physical button does in a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ButtonBinding {
    /// Run the macro stored at `(page, offset)`.
    Macro { page: u8, offset: u8 },
    /// Emit a mouse button, 1-based (0 = none).
    Mouse { button: u8 },
    Keyboard { modifiers: u8, key: u8 },
    Consumer { usage: u16 },
    Special { code: u8, profile: u8 },
    Disabled,
}

impl ButtonBinding {
    /// Decode one 4-byte binding record.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let [tag, a, b, c] = match raw {
            [tag, a, b, c, ..] => [*tag, *a, *b, *c],
            _ => {
                return Err(Error::Profile(format!(
                    "binding needs {BINDING_LEN} bytes, got {}",
                    raw.len()
                )))
            }
        };
        match tag {
            BINDING_MACRO => Ok(Self::Macro { page: a, offset: c }),
            BINDING_HID => match a {
                HID_MOUSE => {
                    let mask = u16::from_be_bytes([b, c]);
                    let button = if mask == 0 {
                        0
                    } else {
                        mask.trailing_zeros() as u8 + 1
                    };
                    Ok(Self::Mouse { button })
                }
                HID_KEYBOARD => Ok(Self::Keyboard {
                    modifiers: b,
                    key: c,
                }),
                HID_CONSUMER => Ok(Self::Consumer {
                    usage: u16::from_be_bytes([b, c]),
                }),
                other => Err(Error::Profile(format!(
                    "unknown HID binding subtype 0x{other:02X}"
                ))),
            },
            BINDING_SPECIAL => Ok(Self::Special {
                code: a,
                profile: b,
            }),
            BINDING_DISABLED => Ok(Self::Disabled),
            other => Err(Error::Profile(format!(
                "unknown binding tag 0x{other:02X}"
            ))),
        }
    }

    pub fn encode(&self) -> [u8; BINDING_LEN] {
        match *self {
            Self::Macro { page, offset } => [BINDING_MACRO, page, 0x00, offset],
            Self::Mouse { button } => {
                let mask = match button {
                    0 => 0,
                    n => 1u16 << (n - 1).min(15),
                };
                let [hi, lo] = mask.to_be_bytes();
                [BINDING_HID, HID_MOUSE, hi, lo]
            }
            Self::Keyboard { modifiers, key } => [BINDING_HID, HID_KEYBOARD, modifiers, key],
            Self::Consumer { usage } => {
                let [hi, lo] = usage.to_be_bytes();
                [BINDING_HID, HID_CONSUMER, hi, lo]
            }
            Self::Special { code, profile } => [BINDING_SPECIAL, code, profile, 0x00],
            Self::Disabled => [BINDING_DISABLED; BINDING_LEN],
        }
    }
}

impl fmt::Display for ButtonBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Macro { page, offset } => write!(f, "macro @ page {page} offset {offset}"),
            Self::Mouse { button } => write!(f, "button {button}"),
            Self::Keyboard { modifiers, key } => {
                write!(f, "key 0x{key:02X} (modifiers 0x{modifiers:02X})")
            }
            Self::Consumer { usage } => write!(f, "consumer 0x{usage:04X}"),
            Self::Special { code, .. } => match special_name(*code) {
                Some(name) => f.write_str(name),
                None => write!(f, "special 0x{code:02X}"),
            },
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// A decoded profile page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Polling rate in Hz.
    pub report_rate: u16,
    pub default_dpi: u8,
    pub switched_dpi: u8,
    /// DPI per slot; 0 marks an unused slot.
    pub dpi: [u16; DPI_SLOTS],
    pub color: [u8; 3],
    pub power_mode: u8,
    pub angle_snapping: u8,
    pub powersave_timeout: u16,
    pub poweroff_timeout: u16,
    pub buttons: Vec<ButtonBinding>,
    /// G-shift layer.
    pub alt_buttons: Vec<ButtonBinding>,
    /// Raw LED effect records.
    pub leds: [[u8; LED_RECORD_LEN]; 2],
    pub alt_leds: [[u8; LED_RECORD_LEN]; 2],
}

fn le16(page: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([page[at], page[at + 1]])
}

fn led(page: &[u8], at: usize) -> [u8; LED_RECORD_LEN] {
    let mut rec = [0u8; LED_RECORD_LEN];
    rec.copy_from_slice(&page[at..at + LED_RECORD_LEN]);
    rec
}

fn decode_bindings(page: &[u8], at: usize, count: usize) -> Result<Vec<ButtonBinding>> {
    page[at..at + count * BINDING_LEN]
        .chunks_exact(BINDING_LEN)
        .enumerate()
        .map(|(i, raw)| {
            ButtonBinding::decode(raw).map_err(|e| Error::Profile(format!("button {i}: {e}")))
        })
        .collect()
}

impl Profile {
    /// Decode a page image holding `button_count` bindings per layer.
    pub fn decode(page: &[u8], button_count: u8) -> Result<Self> {
        if page.len() < PROFILE_LEN {
            return Err(Error::Profile(format!(
                "profile page is {} bytes, need {PROFILE_LEN}",
                page.len()
            )));
        }
        let buttons = button_count.min(MAX_BUTTONS) as usize;

        let raw_name = &page[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        // erased flash means "no name"
        let name = if raw_name.iter().all(|&b| b == 0xFF) {
            String::new()
        } else {
            let end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN - 1);
            String::from_utf8_lossy(&raw_name[..end]).into_owned()
        };

        let mut dpi = [0u16; DPI_SLOTS];
        for (i, slot) in dpi.iter_mut().enumerate() {
            *slot = le16(page, DPI_OFFSET + 2 * i);
        }

        Ok(Self {
            name,
            report_rate: 1000 / page[REPORT_RATE_OFFSET].max(1) as u16,
            default_dpi: page[DEFAULT_DPI_OFFSET],
            switched_dpi: page[SWITCHED_DPI_OFFSET],
            dpi,
            color: [
                page[COLOR_OFFSET],
                page[COLOR_OFFSET + 1],
                page[COLOR_OFFSET + 2],
            ],
            power_mode: page[POWER_MODE_OFFSET],
            angle_snapping: page[ANGLE_SNAPPING_OFFSET],
            powersave_timeout: le16(page, POWERSAVE_OFFSET),
            poweroff_timeout: le16(page, POWEROFF_OFFSET),
            buttons: decode_bindings(page, BUTTONS_OFFSET, buttons)?,
            alt_buttons: decode_bindings(page, ALT_BUTTONS_OFFSET, buttons)?,
            leds: [led(page, LEDS_OFFSET), led(page, LEDS_OFFSET + LED_RECORD_LEN)],
            alt_leds: [
                led(page, ALT_LEDS_OFFSET),
                led(page, ALT_LEDS_OFFSET + LED_RECORD_LEN),
            ],
        })
    }

    /// Encode onto a 0xFF-filled page image of `sector_size` bytes.
    ///
    /// The trailer is left for the store to seal.
    pub fn encode(&self, sector_size: usize) -> Vec<u8> {
        let mut page = vec![0xFF; sector_size.max(PROFILE_LEN)];

        page[REPORT_RATE_OFFSET] = (1000 / self.report_rate.max(1)).min(0xFF) as u8;
        page[DEFAULT_DPI_OFFSET] = self.default_dpi;
        page[SWITCHED_DPI_OFFSET] = self.switched_dpi;
        for (i, dpi) in self.dpi.iter().enumerate() {
            let at = DPI_OFFSET + 2 * i;
            page[at..at + 2].copy_from_slice(&dpi.to_le_bytes());
        }
        page[COLOR_OFFSET..COLOR_OFFSET + 3].copy_from_slice(&self.color);
        page[POWER_MODE_OFFSET] = self.power_mode;
        page[ANGLE_SNAPPING_OFFSET] = self.angle_snapping;
        page[POWERSAVE_OFFSET..POWERSAVE_OFFSET + 2]
            .copy_from_slice(&self.powersave_timeout.to_le_bytes());
        page[POWEROFF_OFFSET..POWEROFF_OFFSET + 2]
            .copy_from_slice(&self.poweroff_timeout.to_le_bytes());

        for (layer, at) in [
            (&self.buttons, BUTTONS_OFFSET),
            (&self.alt_buttons, ALT_BUTTONS_OFFSET),
        ] {
            for (i, binding) in layer.iter().take(MAX_BUTTONS as usize).enumerate() {
                let slot = at + i * BINDING_LEN;
                page[slot..slot + BINDING_LEN].copy_from_slice(&binding.encode());
            }
        }

        let name = &mut page[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        name.fill(0);
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        name[..len].copy_from_slice(&bytes[..len]);

        for (i, rec) in self.leds.iter().enumerate() {
            let at = LEDS_OFFSET + i * LED_RECORD_LEN;
            page[at..at + LED_RECORD_LEN].copy_from_slice(rec);
        }
        for (i, rec) in self.alt_leds.iter().enumerate() {
            let at = ALT_LEDS_OFFSET + i * LED_RECORD_LEN;
            page[at..at + LED_RECORD_LEN].copy_from_slice(rec);
        }

        page.truncate(sector_size);
        page
    }

    /// The polling rate, if it is one of the standard ones.
    pub fn polling_rate(&self) -> Option<PollingRate> {
        PollingRate::from_hz(self.report_rate)
    }
}

/// Where a loaded profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    User,
    /// Factory copy, used when the user page is missing or corrupt.
    Rom,
}

/// A profile together with its place in onboard memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedProfile {
    pub index: u8,
    pub page: u16,
    pub source: ProfileSource,
    pub enabled: bool,
    pub profile: Profile,
}

/// Page of the factory copy backing user profile `index`.
///
/// Devices may ship fewer factory profiles than user slots; the extra slots
/// share the first factory profile.
pub fn rom_page(description: &Description, index: u8) -> u16 {
    let slot = if index as u16 + 1 > description.rom_profile_count as u16 {
        1
    } else {
        index as u16 + 1
    };
    ROM_PAGE_BASE | slot
}

/// Whether a failed user-page read should fall back to the factory copy.
fn falls_back(err: &Error) -> bool {
    matches!(
        err,
        Error::CorruptPage { .. } | Error::Protocol(_) | Error::Profile(_)
    )
}

/// Load profile `index`, falling back to the factory copy when the
/// directory or the user page cannot be trusted.
pub fn load_profile(store: &mut OnboardStore<'_>, index: u8) -> Result<LoadedProfile> {
    let desc = *store.description();
    safety::validate_profile_index(index, &desc)?;

    let directory = match store.directory() {
        Ok(dir) => Some(dir),
        Err(e) if falls_back(&e) => {
            warn!(error = %e, "profile directory unusable, reading factory profiles");
            None
        }
        Err(e) => return Err(e),
    };
    let enabled = directory.as_ref().is_some_and(|d| d.is_enabled(index as usize));

    if let Some(dir) = &directory {
        let page = dir
            .entry(index as usize)
            .map_or(USER_PAGE_BASE | (index as u16 + 1), |e| e.page);
        debug!(profile = index, page = format_args!("0x{:04X}", page), "parsing profile");
        let user = store
            .read_page(page)
            .and_then(|data| Profile::decode(&data, desc.button_count));
        match user {
            Ok(profile) => {
                return Ok(LoadedProfile {
                    index,
                    page,
                    source: ProfileSource::User,
                    enabled,
                    profile,
                })
            }
            Err(e) if falls_back(&e) => {
                warn!(profile = index, error = %e, "profile unusable, using factory copy");
            }
            Err(e) => return Err(e),
        }
    }

    let page = rom_page(&desc, index);
    let data = store.read_page(page)?;
    Ok(LoadedProfile {
        index,
        page,
        source: ProfileSource::Rom,
        enabled,
        profile: Profile::decode(&data, desc.button_count)?,
    })
}

/// Load every profile slot.
pub fn load_all(store: &mut OnboardStore<'_>) -> Result<Vec<LoadedProfile>> {
    let count = store.description().profile_count;
    (0..count).map(|i| load_profile(store, i)).collect()
}

/// Write `profile` to the user page of slot `index`.
pub fn write_profile(store: &OnboardStore<'_>, index: u8, profile: &Profile) -> Result<u16> {
    let desc = *store.description();
    safety::validate_profile_index(index, &desc)?;
    safety::validate_profile(profile, &desc)?;

    let page = USER_PAGE_BASE | (index as u16 + 1);
    let mut image = profile.encode(desc.sector_size as usize);
    store.write_page(page, &mut image)?;
    Ok(page)
}

/// Write every enabled profile, then the directory.
///
/// At least one profile must stay enabled, so the first is enabled when
/// none is. Every profile is validated before anything is written.
pub fn commit(store: &mut OnboardStore<'_>, profiles: &mut [LoadedProfile]) -> Result<()> {
    let desc = *store.description();
    if profiles.len() != desc.profile_count as usize {
        return Err(Error::InvalidInput(format!(
            "device has {} profile slots, got {} profiles",
            desc.profile_count,
            profiles.len()
        )));
    }
    for loaded in profiles.iter() {
        safety::validate_profile(&loaded.profile, &desc)?;
    }

    if !profiles.iter().any(|p| p.enabled) {
        if let Some(first) = profiles.first_mut() {
            debug!("no profile enabled, enabling profile 0");
            first.enabled = true;
        }
    }

    for loaded in profiles.iter_mut().filter(|p| p.enabled) {
        loaded.page = write_profile(store, loaded.index, &loaded.profile)?;
        loaded.source = ProfileSource::User;
    }

    let directory = Directory {
        entries: profiles
            .iter()
            .map(|p| DirectoryEntry {
                page: USER_PAGE_BASE | (p.index as u16 + 1),
                enabled: p.enabled,
            })
            .collect(),
    };
    store.write_directory(&directory)
}

/// Decode the macros bound to buttons of `profile`, by button slot.
///
/// Only the primary layer is read.
pub fn read_button_macros(
    store: &OnboardStore<'_>,
    profile: &Profile,
) -> Result<Vec<(usize, Vec<MacroItem>)>> {
    profile
        .buttons
        .iter()
        .enumerate()
        .filter_map(|(slot, binding)| match *binding {
            ButtonBinding::Macro { page, offset } => Some((slot, page, offset)),
            _ => None,
        })
        .map(|(slot, page, offset)| {
            let items = macros::read_macro(store, USER_PAGE_BASE | page as u16, offset as usize)?;
            Ok((slot, items))
        })
        .collect()
}
