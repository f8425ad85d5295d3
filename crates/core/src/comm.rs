//! Transaction engine: one request, one correlated reply.
//!
//! Replies and unsolicited device notifications share the same read stream,
//! so replies are matched by content:
//!
//! - **reply**: same `(sub_id, address)` as the request;
//! - **error reply**: sub-id 0x8F (HID++ 1.0 table) or 0xFF (HID++ 2.0 table),
//!   `address == request.sub_id` and `params[0] == request.address`; the
//!   device error code is `params[1]`;
//! - anything else is discarded.
//!
//! A read timeout is absorbed exactly once per transaction: the engine sleeps
//! for [`Timing::retry_delay`](crate::config::Timing::retry_delay) and reads
//! again. A second consecutive timeout is a hard error. Transport failures
//! abort immediately.

use crate::config::Timing;
use crate::error::{DeviceError, Error, ErrorTable, Result};
use crate::hidpp::{self, Frame, SOFTWARE_ID};
use crate::transport::HidTransport;
use tracing::{debug, trace, warn};

/// Read buffer size; large enough for any HID report the device may send.
const READ_BUF_LEN: usize = 64;

/// Classification of errors, preserved end-to-end for collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Write/read failure below the frame layer, including timeouts.
    Transport,
    /// Device reported an HID++ error code.
    Protocol,
    /// Feature not present on the device.
    CapabilityAbsent,
    /// Checksum mismatch or undecodable stored data.
    DataIntegrity,
    /// Device memory layout outside the supported set.
    UnsupportedLayout,
    /// Bad caller input or configuration.
    InvalidInput,
}

impl ErrorClass {
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Transport(_) | Error::Timeout(_) | Error::InvalidFrame(_) => Self::Transport,
            Error::Protocol(_) => Self::Protocol,
            Error::CapabilityAbsent { .. } => Self::CapabilityAbsent,
            Error::CorruptPage { .. } | Error::MacroDecode(_) | Error::Profile(_) => {
                Self::DataIntegrity
            }
            Error::UnsupportedLayout { .. } => Self::UnsupportedLayout,
            Error::ReusedFrame { .. }
            | Error::OutOfRange { .. }
            | Error::InvalidInput(_)
            | Error::Config(_) => Self::InvalidInput,
        }
    }

    /// Whether a caller may reasonably carry on after this error.
    ///
    /// The engine itself never retries anything but a single read timeout.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Protocol | Self::CapabilityAbsent)
    }
}

/// Send a HID++ 2.0 request and wait for its reply.
///
/// Stamps the software-origin tag into the low nibble of `address`; a frame
/// whose low nibble is already set is rejected without touching the transport.
/// The returned reply carries the stamped address.
pub fn request(transport: &dyn HidTransport, frame: &Frame, timing: &Timing) -> Result<Frame> {
    if frame.address & 0x0F != 0 {
        return Err(Error::ReusedFrame {
            address: frame.address,
        });
    }
    let mut stamped = *frame;
    stamped.address |= SOFTWARE_ID;
    exchange(transport, &stamped, timing)
}

/// Send a frame as-is and wait for its reply.
///
/// HID++ 1.0 register requests go through here, since the register number
/// occupies the whole address byte.
pub(crate) fn exchange(transport: &dyn HidTransport, frame: &Frame, timing: &Timing) -> Result<Frame> {
    let encoded = frame.encode();
    trace!(
        device_index = frame.device_index,
        sub_id = format_args!("0x{:02X}", frame.sub_id),
        address = format_args!("0x{:02X}", frame.address),
        report_hex = format_args!("{:02X?}", encoded),
        "HID++ TX"
    );
    transport.write_report(&encoded)?;

    let mut buf = [0u8; READ_BUF_LEN];
    let mut timed_out = false;
    loop {
        let n = match transport.read_report(&mut buf, timing.read_timeout())? {
            Some(n) => n,
            None if timed_out => {
                return Err(Error::Timeout(format!(
                    "no reply to sub-id 0x{:02X} address 0x{:02X} after retry",
                    frame.sub_id, frame.address
                )));
            }
            None => {
                debug!(
                    sub_id = format_args!("0x{:02X}", frame.sub_id),
                    address = format_args!("0x{:02X}", frame.address),
                    "read timed out, retrying once"
                );
                timed_out = true;
                std::thread::sleep(timing.retry_delay());
                continue;
            }
        };
        timed_out = false;

        let reply = match Frame::decode(&buf[..n]) {
            Ok(reply) => reply,
            Err(e) => {
                trace!(error = %e, "discarding non-HID++ report");
                continue;
            }
        };

        trace!(
            device_index = reply.device_index,
            sub_id = format_args!("0x{:02X}", reply.sub_id),
            address = format_args!("0x{:02X}", reply.address),
            params_hex = format_args!("{:02X?}", reply.params()),
            "HID++ RX"
        );

        if reply.sub_id == frame.sub_id && reply.address == frame.address {
            return Ok(reply);
        }

        if let Some(err) = match_error(frame, &reply) {
            warn!(
                device_index = reply.device_index,
                error = %err,
                "HID++ error response"
            );
            return Err(Error::Protocol(err));
        }

        debug!(
            sub_id = format_args!("0x{:02X}", reply.sub_id),
            address = format_args!("0x{:02X}", reply.address),
            "discarding unrelated report"
        );
    }
}

/// Check whether `reply` is the error report answering `request`.
fn match_error(request: &Frame, reply: &Frame) -> Option<DeviceError> {
    let table = match reply.sub_id {
        hidpp::HIDPP10_ERROR_SUB_ID => ErrorTable::Hidpp10,
        hidpp::HIDPP20_ERROR_SUB_ID => ErrorTable::Hidpp20,
        _ => return None,
    };
    if reply.address != request.sub_id || reply.params[0] != request.address {
        return None;
    }
    Some(DeviceError {
        table,
        code: reply.params[1],
        sub_id: request.sub_id,
        address: request.address,
    })
}
