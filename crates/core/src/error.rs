//! Error types for hidpp-onboard-core.

use crate::hidpp;
use std::fmt;
use thiserror::Error;

/// Which HID++ error table a device error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTable {
    /// HID++ 1.0 error report (sub-id 0x8F).
    Hidpp10,
    /// HID++ 2.0 error report (sub-id 0xFF).
    Hidpp20,
}

/// An error code reported by the device in reply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    pub table: ErrorTable,
    pub code: u8,
    /// Sub-id of the failed request.
    pub sub_id: u8,
    /// Address of the failed request, origin tag included.
    pub address: u8,
}

impl DeviceError {
    /// Symbolic name of the code, if documented.
    pub fn name(&self) -> Option<&'static str> {
        match self.table {
            ErrorTable::Hidpp10 => hidpp::hidpp10_error_name(self.code),
            ErrorTable::Hidpp20 => hidpp::hidpp20_error_name(self.code),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub-id 0x{:02X} address 0x{:02X}: {} (0x{:02X})",
            self.sub_id,
            self.address,
            self.name().unwrap_or("undocumented error code"),
            self.code
        )
    }
}

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Write or read failure below the frame layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply within the read budget, after the single retry.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Bytes that do not form a HID++ frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The outgoing address already carries a software-origin tag.
    #[error("frame reused: address 0x{address:02X} already carries an origin tag")]
    ReusedFrame { address: u8 },

    /// The device answered with an error report.
    #[error("HID++ error: {0}")]
    Protocol(DeviceError),

    /// The feature resolved to index 0.
    #[error("feature 0x{feature:04X} not supported by device")]
    CapabilityAbsent { feature: u16 },

    /// Stored page checksum does not match its contents.
    #[error("corrupt page 0x{page:04X}: stored CRC 0x{stored:04X}, computed 0x{computed:04X}")]
    CorruptPage { page: u16, stored: u16, computed: u16 },

    /// Macro bytecode that cannot be decoded.
    #[error("macro decode error: {0}")]
    MacroDecode(String),

    /// Profile page contents that cannot be decoded.
    #[error("profile error: {0}")]
    Profile(String),

    /// Device memory layout outside the supported set.
    #[error("unsupported layout: {field} = 0x{value:X}")]
    UnsupportedLayout { field: &'static str, value: u32 },

    /// Value out of safe range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Caller supplied data that cannot be written as given.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means "the device cannot do that" rather than a failure.
    ///
    /// Capability probes use this to skip optional functionality quietly.
    pub fn is_unsupported(&self) -> bool {
        match self {
            Error::CapabilityAbsent { .. } => true,
            Error::Protocol(e) => matches!(
                (e.table, e.code),
                (ErrorTable::Hidpp10, hidpp::HIDPP10_ERR_INVALID_SUBID)
                    | (ErrorTable::Hidpp10, hidpp::HIDPP10_ERR_INVALID_ADDRESS)
                    | (ErrorTable::Hidpp10, hidpp::HIDPP10_ERR_REQUEST_UNAVAILABLE)
                    | (ErrorTable::Hidpp20, hidpp::HIDPP20_ERR_UNSUPPORTED)
                    | (ErrorTable::Hidpp20, hidpp::HIDPP20_ERR_INVALID_FUNCTION_ID)
            ),
            _ => false,
        }
    }

    /// The device error code, for protocol errors.
    pub fn device_code(&self) -> Option<u8> {
        match self {
            Error::Protocol(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn device_error(table: ErrorTable, code: u8) -> Error {
        Error::Protocol(DeviceError {
            table,
            code,
            sub_id: 0x05,
            address: 0x18,
        })
    }

    #[test]
    fn display_uses_symbolic_name() {
        let err = device_error(ErrorTable::Hidpp10, 0x07);
        let text = err.to_string();
        assert!(text.contains("ERR_BUSY"), "{text}");
        assert!(text.contains("0x05"), "{text}");
    }

    #[test]
    fn display_undocumented_code() {
        let err = device_error(ErrorTable::Hidpp20, 0x42);
        assert!(err.to_string().contains("undocumented error code"));
    }

    #[test]
    fn unsupported_covers_absence_and_device_codes() {
        assert!(Error::CapabilityAbsent { feature: 0x8100 }.is_unsupported());
        assert!(device_error(ErrorTable::Hidpp10, 0x01).is_unsupported());
        assert!(device_error(ErrorTable::Hidpp20, 0x09).is_unsupported());
        assert!(!device_error(ErrorTable::Hidpp10, 0x07).is_unsupported());
        assert!(!Error::Timeout("read".into()).is_unsupported());
    }

    #[test]
    fn device_code_only_for_protocol_errors() {
        assert_eq!(device_error(ErrorTable::Hidpp10, 0x0B).device_code(), Some(0x0B));
        assert_eq!(Error::Transport("gone".into()).device_code(), None);
    }
}
