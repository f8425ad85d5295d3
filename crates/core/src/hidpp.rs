//! HID++ frame encoding and decoding.
//!
//! HID++ uses two report formats:
//! - Short reports: 7 bytes (report ID 0x10), 3 parameter bytes
//! - Long reports: 20 bytes (report ID 0x11), 16 parameter bytes
//!
//! Both share the same header: `report_id | device_index | sub_id | address`.
//! For HID++ 2.0 the sub-id is the runtime feature index and the address
//! carries the function in the high nibble; for HID++ 1.0 the sub-id is the
//! register request kind and the address is the register number.
//!
//! Protocol reference: libratbag (MIT) and Solaar (GPLv2, protocol knowledge only).

use crate::error::{Error, Result};

/// HID++ report ID for short messages (7 bytes total).
pub const SHORT_REPORT_ID: u8 = 0x10;
/// HID++ report ID for long messages (20 bytes total).
pub const LONG_REPORT_ID: u8 = 0x11;

/// Short report length (including report ID).
pub const SHORT_REPORT_LEN: usize = 7;
/// Long report length (including report ID).
pub const LONG_REPORT_LEN: usize = 20;

/// Parameter bytes carried by a short report.
pub const SHORT_PARAMS_LEN: usize = SHORT_REPORT_LEN - 4;
/// Parameter bytes carried by a long report.
pub const LONG_PARAMS_LEN: usize = LONG_REPORT_LEN - 4;

/// Software-origin tag OR'd into the low nibble of every outgoing HID++ 2.0 address.
pub const SOFTWARE_ID: u8 = 0x08;

/// Sub-id of a HID++ 1.0 error report.
pub const HIDPP10_ERROR_SUB_ID: u8 = 0x8F;
/// Sub-id of a HID++ 2.0 error report.
pub const HIDPP20_ERROR_SUB_ID: u8 = 0xFF;

pub const HIDPP10_ERR_SUCCESS: u8 = 0x00;
pub const HIDPP10_ERR_INVALID_SUBID: u8 = 0x01;
pub const HIDPP10_ERR_INVALID_ADDRESS: u8 = 0x02;
pub const HIDPP10_ERR_INVALID_VALUE: u8 = 0x03;
pub const HIDPP10_ERR_BUSY: u8 = 0x07;
pub const HIDPP10_ERR_REQUEST_UNAVAILABLE: u8 = 0x0A;
pub const HIDPP10_ERR_INVALID_PARAM_VALUE: u8 = 0x0B;

pub const HIDPP20_ERR_INVALID_ARGUMENT: u8 = 0x02;
pub const HIDPP20_ERR_INVALID_FUNCTION_ID: u8 = 0x07;
pub const HIDPP20_ERR_UNSUPPORTED: u8 = 0x09;

static HIDPP10_ERRORS: [&str; 13] = [
    "ERR_SUCCESS",
    "ERR_INVALID_SUBID",
    "ERR_INVALID_ADDRESS",
    "ERR_INVALID_VALUE",
    "ERR_CONNECT_FAIL",
    "ERR_TOO_MANY_DEVICES",
    "ERR_ALREADY_EXISTS",
    "ERR_BUSY",
    "ERR_UNKNOWN_DEVICE",
    "ERR_RESOURCE_ERROR",
    "ERR_REQUEST_UNAVAILABLE",
    "ERR_INVALID_PARAM_VALUE",
    "ERR_WRONG_PIN_CODE",
];

static HIDPP20_ERRORS: [&str; 10] = [
    "ERR_NO_ERROR",
    "ERR_UNKNOWN",
    "ERR_INVALID_ARGUMENT",
    "ERR_OUT_OF_RANGE",
    "ERR_HARDWARE_ERROR",
    "ERR_LOGITECH_INTERNAL",
    "ERR_INVALID_FEATURE_INDEX",
    "ERR_INVALID_FUNCTION_ID",
    "ERR_BUSY",
    "ERR_UNSUPPORTED",
];

/// Name of a HID++ 1.0 error code.
pub fn hidpp10_error_name(code: u8) -> Option<&'static str> {
    HIDPP10_ERRORS.get(code as usize).copied()
}

/// Name of a HID++ 2.0 error code.
pub fn hidpp20_error_name(code: u8) -> Option<&'static str> {
    HIDPP20_ERRORS.get(code as usize).copied()
}

/// HID++ 2.0 well-known feature IDs.
pub mod features {
    /// Root feature: ping, protocol version and feature index lookup.
    pub const ROOT: u16 = 0x0000;
    /// Feature set: enumerate all supported features.
    pub const FEATURE_SET: u16 = 0x0001;
    pub const DEVICE_INFO: u16 = 0x0003;
    /// Device name and type.
    pub const DEVICE_NAME: u16 = 0x0005;
    pub const RESET: u16 = 0x0020;
    /// Battery status.
    pub const BATTERY_LEVEL_STATUS: u16 = 0x1000;
    pub const BATTERY_VOLTAGE: u16 = 0x1001;
    pub const KBD_REPROGRAMMABLE_KEYS: u16 = 0x1B00;
    /// Programmable button remapping.
    pub const SPECIAL_KEYS_BUTTONS: u16 = 0x1B04;
    pub const WIRELESS_DEVICE_STATUS: u16 = 0x1D4B;
    pub const MOUSE_POINTER_BASIC: u16 = 0x2200;
    /// Adjustable DPI setting.
    pub const ADJUSTABLE_DPI: u16 = 0x2201;
    /// USB report rate (polling rate).
    pub const ADJUSTABLE_REPORT_RATE: u16 = 0x8060;
    pub const COLOR_LED_EFFECTS: u16 = 0x8070;
    pub const RGB_EFFECTS: u16 = 0x8071;
    /// Onboard profiles.
    pub const ONBOARD_PROFILES: u16 = 0x8100;
    pub const MOUSE_BUTTON_SPY: u16 = 0x8110;
}

static FEATURE_NAMES: &[(u16, &str)] = &[
    (features::ROOT, "ROOT"),
    (features::FEATURE_SET, "FEATURE_SET"),
    (features::DEVICE_INFO, "DEVICE_INFO"),
    (features::DEVICE_NAME, "DEVICE_NAME"),
    (features::RESET, "RESET"),
    (features::BATTERY_LEVEL_STATUS, "BATTERY_LEVEL_STATUS"),
    (features::BATTERY_VOLTAGE, "BATTERY_VOLTAGE"),
    (features::KBD_REPROGRAMMABLE_KEYS, "KBD_REPROGRAMMABLE_KEYS"),
    (features::SPECIAL_KEYS_BUTTONS, "SPECIAL_KEYS_BUTTONS"),
    (features::WIRELESS_DEVICE_STATUS, "WIRELESS_DEVICE_STATUS"),
    (features::MOUSE_POINTER_BASIC, "MOUSE_POINTER_BASIC"),
    (features::ADJUSTABLE_DPI, "ADJUSTABLE_DPI"),
    (features::ADJUSTABLE_REPORT_RATE, "ADJUSTABLE_REPORT_RATE"),
    (features::COLOR_LED_EFFECTS, "COLOR_LED_EFFECTS"),
    (features::RGB_EFFECTS, "RGB_EFFECTS"),
    (features::ONBOARD_PROFILES, "ONBOARD_PROFILES"),
    (features::MOUSE_BUTTON_SPY, "MOUSE_BUTTON_SPY"),
];

/// Name of a well-known HID++ 2.0 feature.
pub fn feature_name(feature_id: u16) -> Option<&'static str> {
    FEATURE_NAMES
        .iter()
        .find(|(id, _)| *id == feature_id)
        .map(|(_, name)| *name)
}

/// Which of the two fixed report sizes a frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Short,
    Long,
}

impl ReportKind {
    pub fn from_report_id(id: u8) -> Option<Self> {
        match id {
            SHORT_REPORT_ID => Some(Self::Short),
            LONG_REPORT_ID => Some(Self::Long),
            _ => None,
        }
    }

    pub fn report_id(self) -> u8 {
        match self {
            Self::Short => SHORT_REPORT_ID,
            Self::Long => LONG_REPORT_ID,
        }
    }

    /// Total report length, report ID included.
    pub fn len(self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LEN,
            Self::Long => LONG_REPORT_LEN,
        }
    }

    pub fn params_len(self) -> usize {
        self.len() - 4
    }
}

/// A single HID++ frame, request or reply.
///
/// `params` always holds 16 bytes; for short frames only the first three are
/// significant and the rest stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub kind: ReportKind,
    /// Device index on the receiver (0xFF for the receiver or a wired device).
    pub device_index: u8,
    /// Feature index (HID++ 2.0) or register request kind (HID++ 1.0).
    pub sub_id: u8,
    /// Function and software ID (HID++ 2.0) or register number (HID++ 1.0).
    pub address: u8,
    pub params: [u8; LONG_PARAMS_LEN],
}

impl Frame {
    /// Build a frame; parameter bytes beyond the report's capacity are dropped.
    pub fn new(kind: ReportKind, device_index: u8, sub_id: u8, address: u8, params: &[u8]) -> Self {
        let mut buf = [0u8; LONG_PARAMS_LEN];
        let n = params.len().min(kind.params_len());
        buf[..n].copy_from_slice(&params[..n]);
        Self {
            kind,
            device_index,
            sub_id,
            address,
            params: buf,
        }
    }

    pub fn short(device_index: u8, sub_id: u8, address: u8, params: &[u8]) -> Self {
        Self::new(ReportKind::Short, device_index, sub_id, address, params)
    }

    pub fn long(device_index: u8, sub_id: u8, address: u8, params: &[u8]) -> Self {
        Self::new(ReportKind::Long, device_index, sub_id, address, params)
    }

    /// The significant parameter bytes for this report kind.
    pub fn params(&self) -> &[u8] {
        &self.params[..self.kind.params_len()]
    }

    pub fn is_long(&self) -> bool {
        self.kind == ReportKind::Long
    }

    /// Encode into the raw report bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.kind.len());
        buf.push(self.kind.report_id());
        buf.push(self.device_index);
        buf.push(self.sub_id);
        buf.push(self.address);
        buf.extend_from_slice(self.params());
        buf
    }

    /// Decode a raw HID report.
    ///
    /// Trailing bytes past the report length are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some(&report_id) = data.first() else {
            return Err(Error::InvalidFrame("empty report".into()));
        };
        let kind = ReportKind::from_report_id(report_id)
            .ok_or_else(|| Error::InvalidFrame(format!("unknown report ID: 0x{report_id:02X}")))?;

        if data.len() < kind.len() {
            return Err(Error::InvalidFrame(format!(
                "incomplete report: got {} bytes, expected {}",
                data.len(),
                kind.len()
            )));
        }

        Ok(Self::new(kind, data[1], data[2], data[3], &data[4..kind.len()]))
    }
}
