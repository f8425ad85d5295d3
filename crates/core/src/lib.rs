//! hidpp-onboard-core: HID++ transactions and onboard memory access.
//!
//! This crate provides the transport-independent logic for talking to
//! Logitech HID++ devices: frame codec, transaction engine, feature
//! discovery, HID++ 1.0 registers, and the onboard profile/macro memory of
//! HID++ 2.0 mice. Raw report I/O is supplied by the caller through
//! [`transport::HidTransport`].

pub mod comm;
pub mod config;
pub mod crc;
pub mod device;
pub mod error;
pub mod feature;
pub mod hidpp;
pub mod macros;
pub mod onboard;
pub mod profile;
pub mod registers;
pub mod safety;
pub mod transport;

/// Logitech USB Vendor ID.
pub const LOGITECH_VID: u16 = 0x046D;

/// Usage page of the HID++ vendor collection.
pub const HIDPP_USAGE_PAGE: u16 = 0xFF00;
