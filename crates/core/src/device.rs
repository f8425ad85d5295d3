//! Device session: one adopted transport, its protocol version and features.
//!
//! A session is created by adopting a transport handle. Opening probes the
//! protocol version and, for HID++ 2.0 devices, walks the feature table once.
//! After that the session is immutable except for [`Session::rediscover`].

use crate::comm;
use crate::config::{SessionConfig, Timing};
use crate::error::{Error, Result};
use crate::feature::{self, FeatureInfo, FeatureTable, ProtocolVersion};
use crate::hidpp::{self, Frame, ReportKind};
use crate::transport::HidTransport;
use tracing::{debug, info};

pub struct Session {
    transport: Box<dyn HidTransport>,
    device_index: u8,
    timing: Timing,
    version: ProtocolVersion,
    features: FeatureTable,
}

impl Session {
    /// Adopt `transport`, probe the protocol version and discover features.
    pub fn open(transport: Box<dyn HidTransport>, config: &SessionConfig) -> Result<Self> {
        let device_index = config.device_index;
        let timing = config.timing;

        let version = feature::protocol_version(&*transport, device_index, &timing)?;
        let features = if version.has_features() {
            feature::discover(&*transport, device_index, &timing)?
        } else {
            FeatureTable::default()
        };

        info!(
            device_index = format_args!("0x{:02X}", device_index),
            protocol = %version,
            feature_count = features.len(),
            "Adopted HID++ device"
        );

        Ok(Self {
            transport,
            device_index,
            timing,
            version,
            features,
        })
    }

    /// Build a session from an already known version and feature table.
    pub fn with_features(
        transport: Box<dyn HidTransport>,
        config: &SessionConfig,
        version: ProtocolVersion,
        features: FeatureTable,
    ) -> Self {
        Self {
            transport,
            device_index: config.device_index,
            timing: config.timing,
            version,
            features,
        }
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn transport(&self) -> &dyn HidTransport {
        &*self.transport
    }

    /// Release the session and hand the transport back.
    pub fn into_transport(self) -> Box<dyn HidTransport> {
        self.transport
    }

    /// Rebuild the feature table from the device.
    pub fn rediscover(&mut self) -> Result<()> {
        if !self.version.has_features() {
            return Ok(());
        }
        self.features = feature::discover(&*self.transport, self.device_index, &self.timing)?;
        debug!(feature_count = self.features.len(), "feature table refreshed");
        Ok(())
    }

    /// Runtime index of `feature_id`; 0 if absent.
    pub fn resolve(&self, feature_id: u16) -> u8 {
        self.features.index_of(feature_id)
    }

    pub fn feature(&self, feature_id: u16) -> Option<&FeatureInfo> {
        self.features.get(feature_id)
    }

    /// Runtime index of `feature_id`, or [`Error::CapabilityAbsent`].
    pub fn require(&self, feature_id: u16) -> Result<u8> {
        match self.resolve(feature_id) {
            0 if feature_id != hidpp::features::ROOT => {
                debug!(
                    feature_id = format_args!("0x{:04X}", feature_id),
                    "feature absent"
                );
                Err(Error::CapabilityAbsent {
                    feature: feature_id,
                })
            }
            index => Ok(index),
        }
    }

    /// Run one HID++ 2.0 transaction.
    pub fn request(&self, frame: &Frame) -> Result<Frame> {
        comm::request(&*self.transport, frame, &self.timing)
    }

    /// Call `function` (high-nibble address) of `feature_id`.
    pub fn call(
        &self,
        feature_id: u16,
        kind: ReportKind,
        function: u8,
        params: &[u8],
    ) -> Result<Frame> {
        let index = self.require(feature_id)?;
        let frame = Frame::new(kind, self.device_index, index, function, params);
        self.request(&frame)
    }

    /// Run one HID++ 1.0 register transaction.
    pub(crate) fn exchange(&self, frame: &Frame) -> Result<Frame> {
        comm::exchange(&*self.transport, frame, &self.timing)
    }
}
