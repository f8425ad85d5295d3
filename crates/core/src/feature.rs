//! HID++ 2.0 feature registry.
//!
//! Features are identified by a stable 16-bit ID and addressed on the wire by
//! a runtime index the device assigns. The ROOT feature is always index 0:
//!
//!   - Function 0 (0x00): getFeature(id) → [index, type, version]
//!   - Function 1 (0x10): getProtocolVersion(0, 0, ping) → [major, minor, ping]
//!
//! The FEATURE_SET feature (0x0001) enumerates the whole table:
//!
//!   - Function 0 (0x00): getCount → number of features, ROOT excluded
//!   - Function 1 (0x10): getFeatureID(i) → [id_hi, id_lo, type, version]
//!
//! An index of 0 for anything but ROOT means the feature is absent.

use crate::comm;
use crate::config::Timing;
use crate::error::{Error, ErrorTable, Result};
use crate::hidpp::{self, features, Frame};
use crate::transport::HidTransport;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Runtime index of the ROOT feature.
pub const ROOT_INDEX: u8 = 0x00;

const ROOT_GET_FEATURE: u8 = 0x00;
const ROOT_GET_PROTOCOL_VERSION: u8 = 0x10;
const FEATURE_SET_GET_COUNT: u8 = 0x00;
const FEATURE_SET_GET_FEATURE_ID: u8 = 0x10;

/// Echoed back by getProtocolVersion.
const PING_DATA: u8 = 0x5A;

/// Feature type bits reported alongside each feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags(pub u8);

impl FeatureFlags {
    pub const OBSOLETE: u8 = 1 << 7;
    pub const HIDDEN: u8 = 1 << 6;
    pub const ENGINEERING: u8 = 1 << 5;
    pub const MANUFACTURING_DEACTIVATABLE: u8 = 1 << 4;
    pub const COMPLIANCE_DEACTIVATABLE: u8 = 1 << 3;

    pub fn obsolete(self) -> bool {
        self.0 & Self::OBSOLETE != 0
    }

    /// Hidden features are listed but must not be driven by generic code.
    pub fn hidden(self) -> bool {
        self.0 & Self::HIDDEN != 0
    }

    pub fn engineering(self) -> bool {
        self.0 & Self::ENGINEERING != 0
    }

    pub fn manufacturing_deactivatable(self) -> bool {
        self.0 & Self::MANUFACTURING_DEACTIVATABLE != 0
    }

    pub fn compliance_deactivatable(self) -> bool {
        self.0 & Self::COMPLIANCE_DEACTIVATABLE != 0
    }
}

/// One entry of the device's feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureInfo {
    pub id: u16,
    pub index: u8,
    pub flags: FeatureFlags,
    pub version: u8,
}

impl FeatureInfo {
    pub fn name(&self) -> Option<&'static str> {
        hidpp::feature_name(self.id)
    }
}

impl fmt::Display for FeatureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:3}] 0x{:04X}", self.index, self.id)?;
        if let Some(name) = self.name() {
            write!(f, " {name}")?;
        }
        write!(f, " v{}", self.version)?;
        let flags = self.flags;
        for (set, label) in [
            (flags.obsolete(), "obsolete"),
            (flags.hidden(), "hidden"),
            (flags.engineering(), "engineering"),
        ] {
            if set {
                write!(f, " ({label})")?;
            }
        }
        Ok(())
    }
}

/// Negotiated HID++ protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const HIDPP10: Self = Self { major: 1, minor: 0 };

    /// Whether the device speaks the feature-based protocol.
    pub fn has_features(&self) -> bool {
        self.major >= 2
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The discovered `feature id → runtime index` table of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureTable {
    entries: Vec<FeatureInfo>,
}

impl FeatureTable {
    pub fn new(entries: Vec<FeatureInfo>) -> Self {
        Self { entries }
    }

    /// Runtime index of `feature_id`; 0 if the device does not have it.
    pub fn index_of(&self, feature_id: u16) -> u8 {
        if feature_id == features::ROOT {
            return ROOT_INDEX;
        }
        self.get(feature_id).map_or(0, |f| f.index)
    }

    pub fn get(&self, feature_id: u16) -> Option<&FeatureInfo> {
        self.entries.iter().find(|f| f.id == feature_id)
    }

    pub fn contains(&self, feature_id: u16) -> bool {
        self.index_of(feature_id) != 0 || feature_id == features::ROOT
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ask the ROOT feature where `feature_id` lives.
///
/// Returns `None` when the device reports index 0 (capability absent).
pub fn get_feature(
    transport: &dyn HidTransport,
    device_index: u8,
    feature_id: u16,
    timing: &Timing,
) -> Result<Option<FeatureInfo>> {
    if feature_id == features::ROOT {
        return Ok(Some(FeatureInfo {
            id: features::ROOT,
            index: ROOT_INDEX,
            flags: FeatureFlags::default(),
            version: 0,
        }));
    }

    let req = Frame::short(
        device_index,
        ROOT_INDEX,
        ROOT_GET_FEATURE,
        &feature_id.to_be_bytes(),
    );
    let resp = comm::request(transport, &req, timing)?;

    if resp.params[0] == 0 {
        debug!(
            feature_id = format_args!("0x{:04X}", feature_id),
            "Feature not supported by device"
        );
        return Ok(None);
    }

    let info = FeatureInfo {
        id: feature_id,
        index: resp.params[0],
        flags: FeatureFlags(resp.params[1]),
        version: resp.params[2],
    };
    debug!(
        feature_id = format_args!("0x{:04X}", feature_id),
        feature_index = info.index,
        "Feature lookup success"
    );
    Ok(Some(info))
}

/// Like [`get_feature`], but absence is an error.
pub fn require_feature(
    transport: &dyn HidTransport,
    device_index: u8,
    feature_id: u16,
    timing: &Timing,
) -> Result<FeatureInfo> {
    get_feature(transport, device_index, feature_id, timing)?
        .ok_or(Error::CapabilityAbsent { feature: feature_id })
}

/// Probe the protocol version.
///
/// HID++ 1.0 devices answer the probe with an "invalid sub-id" error report.
pub fn protocol_version(
    transport: &dyn HidTransport,
    device_index: u8,
    timing: &Timing,
) -> Result<ProtocolVersion> {
    let req = Frame::short(
        device_index,
        ROOT_INDEX,
        ROOT_GET_PROTOCOL_VERSION,
        &[0x00, 0x00, PING_DATA],
    );
    match comm::request(transport, &req, timing) {
        Ok(resp) => Ok(ProtocolVersion {
            major: resp.params[0],
            minor: resp.params[1],
        }),
        Err(Error::Protocol(e))
            if e.table == ErrorTable::Hidpp10 && e.code == hidpp::HIDPP10_ERR_INVALID_SUBID =>
        {
            debug!(device_index, "protocol probe rejected, assuming HID++ 1.0");
            Ok(ProtocolVersion::HIDPP10)
        }
        Err(e) => Err(e),
    }
}

/// Walk the FEATURE_SET table and build the full feature map.
pub fn discover(
    transport: &dyn HidTransport,
    device_index: u8,
    timing: &Timing,
) -> Result<FeatureTable> {
    let feature_set = require_feature(transport, device_index, features::FEATURE_SET, timing)?;

    let req = Frame::short(device_index, feature_set.index, FEATURE_SET_GET_COUNT, &[]);
    let count = comm::request(transport, &req, timing)?.params[0];
    if count == 0 {
        return Err(Error::UnsupportedLayout {
            field: "feature_count",
            value: 0,
        });
    }

    // the count excludes ROOT, which sits at index 0
    let mut entries = Vec::with_capacity(count as usize + 1);
    for index in 0..=count {
        let req = Frame::short(
            device_index,
            feature_set.index,
            FEATURE_SET_GET_FEATURE_ID,
            &[index],
        );
        let resp = comm::request(transport, &req, timing)?;
        let info = FeatureInfo {
            id: u16::from_be_bytes([resp.params[0], resp.params[1]]),
            index,
            flags: FeatureFlags(resp.params[2]),
            version: resp.params[3],
        };
        debug!(
            feature_index = index,
            feature_id = format_args!("0x{:04X}", info.id),
            name = info.name().unwrap_or("unknown"),
            flags = format_args!("0x{:02X}", info.flags.0),
            "discovered feature"
        );
        entries.push(info);
    }

    Ok(FeatureTable::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const DEV_IDX: u8 = 0x01;
    const FEATURE_SET_IDX: u8 = 0x01;

    fn fast() -> Timing {
        Timing {
            read_timeout_ms: 1,
            retry_delay_ms: 0,
        }
    }

    fn info(id: u16, index: u8) -> FeatureInfo {
        FeatureInfo {
            id,
            index,
            flags: FeatureFlags::default(),
            version: 0,
        }
    }

    #[test]
    fn table_lookup() {
        let table = FeatureTable::new(vec![
            info(features::ROOT, 0),
            info(features::FEATURE_SET, 1),
            info(features::SPECIAL_KEYS_BUTTONS, 5),
        ]);
        assert_eq!(table.index_of(0x1B04), 5);
        assert_eq!(table.index_of(0x9999), 0);
        assert_eq!(table.index_of(features::ROOT), 0);
        assert!(table.contains(features::ROOT));
        assert!(!table.contains(0x9999));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn root_is_never_looked_up() {
        let mock = MockTransport::new();
        let root = get_feature(&mock, DEV_IDX, features::ROOT, &fast())
            .unwrap()
            .unwrap();
        assert_eq!(root.index, 0);
        assert!(mock.written().is_empty());
    }

    #[test]
    fn get_feature_success() {
        let mock = MockTransport::new();
        mock.on_short_request(DEV_IDX, 0x00, 0x08, &[0x22, 0x01], &[0x07, 0x40, 0x02]);
        let f = get_feature(&mock, DEV_IDX, 0x2201, &fast()).unwrap().unwrap();
        assert_eq!(f.index, 0x07);
        assert!(f.flags.hidden());
        assert_eq!(f.version, 2);
    }

    #[test]
    fn get_feature_absent_is_not_an_error() {
        let mock = MockTransport::new();
        mock.on_short_request(DEV_IDX, 0x00, 0x08, &[0x99, 0x99], &[0x00, 0x00, 0x00]);
        assert_eq!(get_feature(&mock, DEV_IDX, 0x9999, &fast()).unwrap(), None);

        let err = require_feature(&mock, DEV_IDX, 0x9999, &fast()).unwrap_err();
        assert!(matches!(err, Error::CapabilityAbsent { feature: 0x9999 }));
    }

    #[test]
    fn protocol_version_hidpp20() {
        let mock = MockTransport::new();
        mock.on_short_request(DEV_IDX, 0x00, 0x18, &[0, 0, PING_DATA], &[4, 2, PING_DATA]);
        let v = protocol_version(&mock, DEV_IDX, &fast()).unwrap();
        assert_eq!(v, ProtocolVersion { major: 4, minor: 2 });
        assert!(v.has_features());
        assert_eq!(v.to_string(), "4.2");
    }

    #[test]
    fn protocol_version_hidpp10_from_invalid_subid() {
        let mock = MockTransport::new();
        mock.on_request(
            Frame::short(DEV_IDX, 0x00, 0x18, &[0, 0, PING_DATA]).encode(),
            Frame::short(DEV_IDX, 0x8F, 0x00, &[0x18, 0x01, 0x00]).encode(),
        );
        let v = protocol_version(&mock, DEV_IDX, &fast()).unwrap();
        assert_eq!(v, ProtocolVersion::HIDPP10);
        assert!(!v.has_features());
    }

    #[test]
    fn protocol_version_other_errors_propagate() {
        let mock = MockTransport::new();
        mock.on_request(
            Frame::short(DEV_IDX, 0x00, 0x18, &[0, 0, PING_DATA]).encode(),
            Frame::short(DEV_IDX, 0x8F, 0x00, &[0x18, 0x09, 0x00]).encode(),
        );
        let err = protocol_version(&mock, DEV_IDX, &fast()).unwrap_err();
        assert_eq!(err.device_code(), Some(0x09));
    }

    fn register_feature_set(mock: &MockTransport, ids: &[(u16, u8)]) {
        mock.on_short_request(
            DEV_IDX,
            0x00,
            0x08,
            &[0x00, 0x01],
            &[FEATURE_SET_IDX, 0x00, 0x00],
        );
        mock.on_short_request(
            DEV_IDX,
            FEATURE_SET_IDX,
            0x08,
            &[],
            &[(ids.len() - 1) as u8, 0x00, 0x00],
        );
        for (i, (id, flags)) in ids.iter().enumerate() {
            let [hi, lo] = id.to_be_bytes();
            mock.on_long_request(
                DEV_IDX,
                FEATURE_SET_IDX,
                0x18,
                &[i as u8],
                &[hi, lo, *flags, 0x01],
            );
        }
    }

    #[test]
    fn discover_walks_count_plus_root() {
        let mock = MockTransport::new();
        register_feature_set(
            &mock,
            &[
                (features::ROOT, 0x00),
                (features::FEATURE_SET, 0x00),
                (features::DEVICE_NAME, 0x00),
                (0x1E00, 0x40),
                (0x1B04, 0x00),
                (features::ONBOARD_PROFILES, 0x00),
            ],
        );

        let table = discover(&mock, DEV_IDX, &fast()).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.index_of(features::SPECIAL_KEYS_BUTTONS), 4);
        assert_eq!(table.index_of(features::ONBOARD_PROFILES), 5);
        assert!(table.get(0x1E00).unwrap().flags.hidden());
        assert_eq!(table.index_of(0x9999), 0);
    }

    #[test]
    fn discover_rejects_empty_table() {
        let mock = MockTransport::new();
        register_feature_set(&mock, &[(features::ROOT, 0x00)]);
        let err = discover(&mock, DEV_IDX, &fast()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedLayout { .. }));
    }

    #[test]
    fn display_includes_name_and_flags() {
        let f = FeatureInfo {
            id: features::ONBOARD_PROFILES,
            index: 9,
            flags: FeatureFlags(FeatureFlags::HIDDEN),
            version: 0,
        };
        let text = f.to_string();
        assert!(text.contains("0x8100"));
        assert!(text.contains("ONBOARD_PROFILES"));
        assert!(text.contains("hidden"));
    }
}
