//! HID++ 1.0 register access.
//!
//! Older devices expose a fixed register map instead of a feature table. The
//! sub-id selects the request kind and the address is the register number:
//!
//! | sub-id | request                |
//! |--------|------------------------|
//! | 0x80   | set short register     |
//! | 0x81   | get short register     |
//! | 0x82   | set long register      |
//! | 0x83   | get long register      |
//!
//! Register addresses are used as-is; no software-origin tag is stamped.
//! Each accessor below owns one fixed bit layout of the 3-byte parameter area.

use crate::crc;
use crate::device::Session;
use crate::error::{Error, Result};
use crate::hidpp::Frame;
use serde::Serialize;
use tracing::trace;

pub const SET_REGISTER: u8 = 0x80;
pub const GET_REGISTER: u8 = 0x81;
pub const SET_LONG_REGISTER: u8 = 0x82;
pub const GET_LONG_REGISTER: u8 = 0x83;

pub const REG_HIDPP_NOTIFICATIONS: u8 = 0x00;
pub const REG_INDIVIDUAL_FEATURES: u8 = 0x01;
pub const REG_BATTERY_STATUS: u8 = 0x07;
pub const REG_BATTERY_MILEAGE: u8 = 0x0D;
pub const REG_PROFILE: u8 = 0x0F;
pub const REG_LED_STATUS: u8 = 0x51;
pub const REG_LED_INTENSITY: u8 = 0x54;
pub const REG_LED_COLOR: u8 = 0x57;
pub const REG_OPTICAL_SENSOR_SETTINGS: u8 = 0x61;
pub const REG_CURRENT_RESOLUTION: u8 = 0x63;
pub const REG_USB_REFRESH_RATE: u8 = 0x64;
pub const REG_READ_MEMORY: u8 = 0xA2;
pub const REG_FIRMWARE_INFORMATION: u8 = 0xF1;

/// Size of a HID++ 1.0 memory page.
pub const PAGE_SIZE: usize = 512;
/// Highest readable page number.
pub const MAX_PAGE: u8 = 31;

/// Read a short register.
pub fn get_register(session: &Session, register: u8, params: &[u8]) -> Result<[u8; 3]> {
    let frame = Frame::short(session.device_index(), GET_REGISTER, register, params);
    let reply = session.exchange(&frame)?;
    Ok([reply.params[0], reply.params[1], reply.params[2]])
}

/// Write a short register.
pub fn set_register(session: &Session, register: u8, params: [u8; 3]) -> Result<()> {
    let frame = Frame::short(session.device_index(), SET_REGISTER, register, &params);
    session.exchange(&frame)?;
    Ok(())
}

/// Read a long register (16 bytes).
pub fn get_long_register(session: &Session, register: u8, params: &[u8]) -> Result<[u8; 16]> {
    let frame = Frame::short(session.device_index(), GET_LONG_REGISTER, register, params);
    let reply = session.exchange(&frame)?;
    Ok(reply.params)
}

/// Write a long register.
pub fn set_long_register(session: &Session, register: u8, params: &[u8]) -> Result<()> {
    let frame = Frame::long(session.device_index(), SET_LONG_REGISTER, register, params);
    session.exchange(&frame)?;
    Ok(())
}

/// Notification flags (register 0x00), reserved bits masked out.
pub fn get_hidpp_notifications(session: &Session) -> Result<u32> {
    let p = get_register(session, REG_HIDPP_NOTIFICATIONS, &[])?;
    Ok(p[0] as u32 | ((p[1] & 0x1F) as u32) << 8 | ((p[2] & 0x07) as u32) << 16)
}

pub fn set_hidpp_notifications(session: &Session, flags: u32) -> Result<()> {
    set_register(
        session,
        REG_HIDPP_NOTIFICATIONS,
        [
            flags as u8,
            (flags >> 8) as u8 & 0x1F,
            (flags >> 16) as u8 & 0x07,
        ],
    )
}

/// Individual feature bits (register 0x01), reserved bits masked out.
pub fn get_individual_features(session: &Session) -> Result<u32> {
    let p = get_register(session, REG_INDIVIDUAL_FEATURES, &[])?;
    Ok(p[0] as u32 | ((p[1] & 0x0E) as u32) << 8 | ((p[2] & 0x3F) as u32) << 16)
}

pub fn set_individual_features(session: &Session, mask: u32) -> Result<()> {
    set_register(
        session,
        REG_INDIVIDUAL_FEATURES,
        [
            mask as u8,
            (mask >> 8) as u8 & 0x0E,
            (mask >> 16) as u8 & 0x3F,
        ],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargeState {
    NotCharging,
    Charging,
    ChargingComplete,
    ChargingError,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryStatus {
    /// Raw battery level code.
    pub level: u8,
    pub charge_state: ChargeState,
    /// Low-battery warning threshold in percent (5 % steps).
    pub low_threshold_percent: u8,
}

/// Battery status (register 0x07).
pub fn get_battery_status(session: &Session) -> Result<BatteryStatus> {
    let p = get_register(session, REG_BATTERY_STATUS, &[])?;
    let charge_state = match p[1] {
        0x00 => ChargeState::NotCharging,
        0x22 => ChargeState::Charging,
        0x23 => ChargeState::ChargingComplete,
        0x24 => ChargeState::ChargingError,
        other => ChargeState::Other(other),
    };
    // values of 7 and above are reserved
    let steps = if p[2] >= 7 { 0 } else { p[2] };
    Ok(BatteryStatus {
        level: p[0],
        charge_state,
        low_threshold_percent: steps * 5,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryMileage {
    pub level_percent: u8,
    /// Maximum battery life, normalized to seconds.
    pub max_seconds: u32,
    pub charge_state: ChargeState,
}

/// Battery mileage (register 0x0D).
pub fn get_battery_mileage(session: &Session) -> Result<BatteryMileage> {
    let p = get_register(session, REG_BATTERY_MILEAGE, &[])?;
    let max = p[1] as u32 | ((p[2] & 0x0F) as u32) << 8;
    let max_seconds = match (p[2] & 0x30) >> 4 {
        0x03 => max * 24 * 60 * 60,
        0x02 => max * 60 * 60,
        0x01 => max * 60,
        _ => max,
    };
    let charge_state = match p[2] >> 6 {
        0x00 => ChargeState::NotCharging,
        0x01 => ChargeState::Charging,
        0x02 => ChargeState::ChargingComplete,
        _ => ChargeState::ChargingError,
    };
    Ok(BatteryMileage {
        level_percent: p[0] & 0x7F,
        max_seconds,
        charge_state,
    })
}

/// Profile selection reported by register 0x0F.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfileSelection {
    Index(u8),
    Address { page: u8, offset: u8 },
    Eeprom,
    /// Factory profile; profile switching is disabled.
    Factory,
}

const PROFILE_TYPE_INDEX: u8 = 0x00;
const PROFILE_TYPE_ADDRESS: u8 = 0x01;
const PROFILE_TYPE_EEPROM: u8 = 0xEE;
const PROFILE_TYPE_FACTORY: u8 = 0xFF;

/// Current profile (register 0x0F).
pub fn get_current_profile(session: &Session) -> Result<ProfileSelection> {
    let p = get_register(session, REG_PROFILE, &[])?;
    match p[0] {
        PROFILE_TYPE_INDEX => Ok(ProfileSelection::Index(p[1])),
        PROFILE_TYPE_ADDRESS => Ok(ProfileSelection::Address {
            page: p[1],
            offset: p[2],
        }),
        PROFILE_TYPE_EEPROM => Ok(ProfileSelection::Eeprom),
        PROFILE_TYPE_FACTORY => Ok(ProfileSelection::Factory),
        other => Err(Error::Profile(format!(
            "unexpected profile selection type 0x{other:02X}"
        ))),
    }
}

pub fn set_current_profile(session: &Session, selection: ProfileSelection) -> Result<()> {
    let params = match selection {
        ProfileSelection::Index(index) => [PROFILE_TYPE_INDEX, index, 0],
        ProfileSelection::Address { page, offset } => [PROFILE_TYPE_ADDRESS, page, offset],
        ProfileSelection::Eeprom => [PROFILE_TYPE_EEPROM, 0, 0],
        ProfileSelection::Factory => [PROFILE_TYPE_FACTORY, 0, 0],
    };
    set_register(session, REG_PROFILE, params)
}

/// Per-LED state nibble of register 0x51.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LedStatus {
    NoChange = 0x0,
    Off = 0x1,
    On = 0x2,
    Blink = 0x3,
    Heartbeat = 0x4,
    SlowOn = 0x5,
    SlowOff = 0x6,
}

impl LedStatus {
    pub fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0x0 => Some(Self::NoChange),
            0x1 => Some(Self::Off),
            0x2 => Some(Self::On),
            0x3 => Some(Self::Blink),
            0x4 => Some(Self::Heartbeat),
            0x5 => Some(Self::SlowOn),
            0x6 => Some(Self::SlowOff),
            _ => None,
        }
    }
}

fn split_nibbles(p: [u8; 3]) -> [u8; 6] {
    [
        p[0] & 0x0F,
        p[0] >> 4,
        p[1] & 0x0F,
        p[1] >> 4,
        p[2] & 0x0F,
        p[2] >> 4,
    ]
}

fn join_nibbles(n: [u8; 6]) -> [u8; 3] {
    [
        (n[0] & 0x0F) | (n[1] & 0x0F) << 4,
        (n[2] & 0x0F) | (n[3] & 0x0F) << 4,
        (n[4] & 0x0F) | (n[5] & 0x0F) << 4,
    ]
}

/// LED states (register 0x51).
pub fn get_led_status(session: &Session) -> Result<[LedStatus; 6]> {
    let nibbles = split_nibbles(get_register(session, REG_LED_STATUS, &[])?);
    let mut leds = [LedStatus::NoChange; 6];
    for (led, n) in leds.iter_mut().zip(nibbles) {
        *led = LedStatus::from_nibble(n)
            .ok_or_else(|| Error::Profile(format!("unknown LED status 0x{n:X}")))?;
    }
    Ok(leds)
}

pub fn set_led_status(session: &Session, leds: [LedStatus; 6]) -> Result<()> {
    set_register(session, REG_LED_STATUS, join_nibbles(leds.map(|l| l as u8)))
}

/// LED intensities in percent (register 0x54, 10 % steps).
pub fn get_led_intensity(session: &Session) -> Result<[u8; 6]> {
    let nibbles = split_nibbles(get_register(session, REG_LED_INTENSITY, &[])?);
    Ok(nibbles.map(|n| n * 10))
}

pub fn set_led_intensity(session: &Session, percent: [u8; 6]) -> Result<()> {
    for p in percent {
        if p > 100 {
            return Err(Error::OutOfRange {
                field: "led_intensity",
                value: p as u32,
                min: 0,
                max: 100,
            });
        }
    }
    set_register(session, REG_LED_INTENSITY, join_nibbles(percent.map(|p| p / 10)))
}

/// LED colour as RGB (register 0x57).
pub fn get_led_color(session: &Session) -> Result<[u8; 3]> {
    get_register(session, REG_LED_COLOR, &[])
}

pub fn set_led_color(session: &Session, rgb: [u8; 3]) -> Result<()> {
    set_register(session, REG_LED_COLOR, rgb)
}

/// Surface reflectivity from the optical sensor settings (register 0x61).
pub fn get_optical_sensor_reflectivity(session: &Session) -> Result<u8> {
    Ok(get_register(session, REG_OPTICAL_SENSOR_SETTINGS, &[])?[0])
}

/// Raw x/y resolution values (long register 0x63).
///
/// The values are device-specific indices; mapping them to DPI needs the
/// device's resolution table.
pub fn get_current_resolution(session: &Session) -> Result<(u16, u16)> {
    let p = get_long_register(session, REG_CURRENT_RESOLUTION, &[])?;
    Ok((
        u16::from_le_bytes([p[0], p[1]]),
        u16::from_le_bytes([p[2], p[3]]),
    ))
}

pub fn set_current_resolution(session: &Session, x: u16, y: u16) -> Result<()> {
    let [x0, x1] = x.to_le_bytes();
    let [y0, y1] = y.to_le_bytes();
    set_long_register(session, REG_CURRENT_RESOLUTION, &[x0, x1, y0, y1])
}

/// USB report rate in Hz (register 0x64).
pub fn get_usb_refresh_rate(session: &Session) -> Result<u16> {
    let interval = get_register(session, REG_USB_REFRESH_RATE, &[])?[0];
    if interval == 0 {
        return Err(Error::Profile("device reported a zero report interval".into()));
    }
    Ok(1000 / interval as u16)
}

pub fn set_usb_refresh_rate(session: &Session, hz: u16) -> Result<()> {
    if !(1..=1000).contains(&hz) {
        return Err(Error::OutOfRange {
            field: "refresh_rate",
            value: hz as u32,
            min: 1,
            max: 1000,
        });
    }
    set_register(session, REG_USB_REFRESH_RATE, [(1000 / hz) as u8, 0, 0])
}

/// Read 16 bytes of device memory (long register 0xA2).
///
/// `offset` is in bytes and must be even; the device addresses 16-bit words.
pub fn read_memory(session: &Session, page: u8, offset: u16) -> Result<[u8; 16]> {
    if offset % 2 != 0 {
        return Err(Error::InvalidInput(format!(
            "memory offset {offset} is odd"
        )));
    }
    if page > MAX_PAGE {
        return Err(Error::OutOfRange {
            field: "page",
            value: page as u32,
            min: 0,
            max: MAX_PAGE as u32,
        });
    }
    let word = offset / 2;
    if word > u8::MAX as u16 {
        return Err(Error::OutOfRange {
            field: "offset",
            value: offset as u32,
            min: 0,
            max: (u8::MAX as u32) * 2,
        });
    }
    trace!(page, offset, "reading HID++ 1.0 memory");
    get_long_register(session, REG_READ_MEMORY, &[page, word as u8, 0])
}

/// Read a full memory page and verify its checksum.
pub fn read_page(session: &Session, page: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(PAGE_SIZE);
    for offset in (0..PAGE_SIZE).step_by(16) {
        bytes.extend_from_slice(&read_memory(session, page, offset as u16)?);
    }
    match crc::page_crc(&bytes) {
        Some((stored, computed)) if stored != computed => Err(Error::CorruptPage {
            page: page as u16,
            stored,
            computed,
        }),
        _ => Ok(bytes),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

const FW_ITEM_NAME_AND_VERSION: u8 = 0x01;
const FW_ITEM_BUILD_NUMBER: u8 = 0x02;

/// Firmware version of microcontroller `mcu` (1-based, register 0xF1).
pub fn get_firmware_information(session: &Session, mcu: u8) -> Result<FirmwareInfo> {
    let base = (mcu.saturating_sub(1) & 0x0F) << 4;
    let version = get_register(
        session,
        REG_FIRMWARE_INFORMATION,
        &[base | FW_ITEM_NAME_AND_VERSION],
    )?;
    let build = get_register(
        session,
        REG_FIRMWARE_INFORMATION,
        &[base | FW_ITEM_BUILD_NUMBER],
    )?;
    Ok(FirmwareInfo {
        major: version[1],
        minor: version[2],
        build: u16::from_be_bytes([build[1], build[2]]),
    })
}
