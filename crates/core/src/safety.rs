//! Safety layer: validates profile fields against known-safe ranges before
//! anything is written to onboard memory.
//!
//! A page written with out-of-range values is still CRC-valid, so the
//! device would happily load it. Everything here runs BEFORE any HID
//! communication; no invalid data ever reaches the device.
//!
//! ## DPI
//! - **Range**: 100 – 25,600 DPI per slot; 0 marks an unused slot
//! - **Slots**: 5, default and switched slot indices must be 0–4
//!
//! ## Polling Rate
//! - **Supported values**: 125 Hz, 250 Hz, 500 Hz, 1000 Hz
//! - **Encoding**: stored as report interval in ms (8, 4, 2, 1)
//!
//! ## Buttons
//! - At most as many bindings per layer as the device advertises
//! - Mouse buttons 0–16, special codes from the known table
//!
//! ## Name
//! - At most 47 bytes of UTF-8; the last byte of the field stays NUL

use crate::error::{Error, Result};
use crate::onboard::{Description, MAX_DPI_INDEX};
use crate::profile::{ButtonBinding, PollingRate, Profile, MAX_SPECIAL_CODE, NAME_LEN};

/// Bricking risk disclaimer, shown before any onboard memory write.
pub const BRICKING_DISCLAIMER: &str = "\
WARNING: This tool rewrites onboard memory pages via HID++. \
All profile fields are bounds-checked against known-safe ranges and every page \
is written with a valid checksum, but an interrupted write leaves the page in an \
undefined state. The device then falls back to its factory profiles. \
Use at your own risk.";

/// DPI constraints.
pub const DPI_MIN: u16 = 100;
pub const DPI_MAX: u16 = 25600;

/// Validate a DPI slot value; 0 (unused slot) is accepted.
pub fn validate_dpi(dpi: u16) -> Result<()> {
    if dpi != 0 && !(DPI_MIN..=DPI_MAX).contains(&dpi) {
        return Err(Error::OutOfRange {
            field: "dpi",
            value: dpi as u32,
            min: DPI_MIN as u32,
            max: DPI_MAX as u32,
        });
    }
    Ok(())
}

/// Validate a polling rate value.
pub fn validate_polling_rate(hz: u16) -> Result<PollingRate> {
    PollingRate::from_hz(hz).ok_or(Error::OutOfRange {
        field: "report_rate",
        value: hz as u32,
        min: 125,
        max: 1000,
    })
}

/// Validate a DPI slot index.
pub fn validate_dpi_index(field: &'static str, index: u8) -> Result<()> {
    if index > MAX_DPI_INDEX {
        return Err(Error::OutOfRange {
            field,
            value: index as u32,
            min: 0,
            max: MAX_DPI_INDEX as u32,
        });
    }
    Ok(())
}

/// Validate a profile slot index (0-based).
pub fn validate_profile_index(index: u8, description: &Description) -> Result<()> {
    let count = description.profile_count;
    if index >= count {
        return Err(Error::OutOfRange {
            field: "profile_index",
            value: index as u32,
            min: 0,
            max: count.saturating_sub(1) as u32,
        });
    }
    Ok(())
}

/// Validate a single binding.
pub fn validate_binding(binding: &ButtonBinding) -> Result<()> {
    match *binding {
        ButtonBinding::Mouse { button } if button > 16 => Err(Error::OutOfRange {
            field: "mouse_button",
            value: button as u32,
            min: 0,
            max: 16,
        }),
        ButtonBinding::Special { code, .. } if code == 0 || code > MAX_SPECIAL_CODE => {
            Err(Error::OutOfRange {
                field: "special_code",
                value: code as u32,
                min: 1,
                max: MAX_SPECIAL_CODE as u32,
            })
        }
        _ => Ok(()),
    }
}

fn validate_layer(
    field: &'static str,
    bindings: &[ButtonBinding],
    description: &Description,
) -> Result<()> {
    let max = description.button_count as usize;
    if bindings.len() > max {
        return Err(Error::OutOfRange {
            field,
            value: bindings.len() as u32,
            min: 0,
            max: max as u32,
        });
    }
    bindings.iter().try_for_each(validate_binding)
}

/// Validate every field of `profile` against the device layout.
pub fn validate_profile(profile: &Profile, description: &Description) -> Result<()> {
    validate_polling_rate(profile.report_rate)?;
    validate_dpi_index("default_dpi", profile.default_dpi)?;
    validate_dpi_index("switched_dpi", profile.switched_dpi)?;
    profile.dpi.iter().try_for_each(|&dpi| validate_dpi(dpi))?;
    validate_layer("buttons", &profile.buttons, description)?;
    validate_layer("alt_buttons", &profile.alt_buttons, description)?;

    if profile.name.len() >= NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "profile name is {} bytes, at most {} fit",
            profile.name.len(),
            NAME_LEN - 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description(buttons: u8) -> Description {
        Description::parse(&[
            0x01, 0x01, 0x01, 0x03, 0x03, buttons, 0x10, 0x01, 0x00, 0x00, 0x01,
        ])
        .unwrap()
    }

    fn profile() -> Profile {
        Profile {
            name: "default".into(),
            report_rate: 1000,
            default_dpi: 1,
            switched_dpi: 0,
            dpi: [400, 800, 1600, 0, 0],
            color: [0; 3],
            power_mode: 0,
            angle_snapping: 0,
            powersave_timeout: 0,
            poweroff_timeout: 0,
            buttons: vec![ButtonBinding::Mouse { button: 1 }; 6],
            alt_buttons: vec![],
            leds: [[0; 11]; 2],
            alt_leds: [[0; 11]; 2],
        }
    }

    #[test]
    fn validate_dpi_in_range() {
        assert!(validate_dpi(800).is_ok());
        assert!(validate_dpi(100).is_ok());
        assert!(validate_dpi(25600).is_ok());
        assert!(validate_dpi(0).is_ok());
    }

    #[test]
    fn validate_dpi_rejects_out_of_range() {
        assert!(validate_dpi(50).is_err());
        assert!(validate_dpi(30000).is_err());
    }

    #[test]
    fn validate_polling_rate_accepts_known() {
        assert_eq!(validate_polling_rate(125).unwrap(), PollingRate::Hz125);
        assert_eq!(validate_polling_rate(1000).unwrap(), PollingRate::Hz1000);
    }

    #[test]
    fn validate_polling_rate_rejects_unknown() {
        assert!(validate_polling_rate(200).is_err());
        assert!(validate_polling_rate(0).is_err());
    }

    #[test]
    fn profile_index_bounds() {
        let desc = description(6);
        assert!(validate_profile_index(2, &desc).is_ok());
        assert!(matches!(
            validate_profile_index(3, &desc),
            Err(Error::OutOfRange { max: 2, .. })
        ));
    }

    #[test]
    fn valid_profile_passes() {
        assert!(validate_profile(&profile(), &description(6)).is_ok());
    }

    #[test]
    fn too_many_buttons_rejected() {
        let err = validate_profile(&profile(), &description(5)).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { field: "buttons", .. }));
    }

    #[test]
    fn bad_dpi_slot_index_rejected() {
        let mut p = profile();
        p.switched_dpi = 5;
        assert!(matches!(
            validate_profile(&p, &description(6)),
            Err(Error::OutOfRange { field: "switched_dpi", .. })
        ));
    }

    #[test]
    fn bad_bindings_rejected() {
        assert!(validate_binding(&ButtonBinding::Mouse { button: 17 }).is_err());
        assert!(validate_binding(&ButtonBinding::Special { code: 0x0C, profile: 0 }).is_err());
        assert!(validate_binding(&ButtonBinding::Special { code: 0x00, profile: 0 }).is_err());
        assert!(validate_binding(&ButtonBinding::Special { code: 0x0B, profile: 0 }).is_ok());
        assert!(validate_binding(&ButtonBinding::Disabled).is_ok());
    }

    #[test]
    fn long_name_rejected() {
        let mut p = profile();
        p.name = "x".repeat(NAME_LEN);
        assert!(matches!(
            validate_profile(&p, &description(6)),
            Err(Error::InvalidInput(_))
        ));
        p.name.pop();
        assert!(validate_profile(&p, &description(6)).is_ok());
    }

    #[test]
    fn bricking_disclaimer_not_empty() {
        assert!(!BRICKING_DISCLAIMER.is_empty());
        assert!(BRICKING_DISCLAIMER.contains("WARNING"));
    }
}
