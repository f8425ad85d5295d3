//! HID transport abstraction for device communication.
//!
//! Provides a trait-based transport layer so that real HID devices and
//! mock devices share the same interface. The transport only moves raw
//! reports; framing and reply correlation live in [`crate::comm`].

use crate::error::Result;
use std::time::Duration;

/// Abstraction over raw HID read/write.
///
/// One transaction is in flight at a time; callers serialize access.
pub trait HidTransport: Send {
    /// Write one raw HID report.
    fn write_report(&self, data: &[u8]) -> Result<()>;

    /// Read one raw HID report into `buf`.
    ///
    /// Returns `Ok(None)` if nothing arrived within `timeout`, otherwise the
    /// number of bytes read.
    fn read_report(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>>;
}

impl<T: HidTransport + ?Sized> HidTransport for Box<T> {
    fn write_report(&self, data: &[u8]) -> Result<()> {
        (**self).write_report(data)
    }

    fn read_report(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>> {
        (**self).read_report(buf, timeout)
    }
}

/// Test doubles: a scripted transport and a simulated device built on it.
///
/// [`mock::MockTransport`] replies come from three sources, in this order of
/// precedence: a responder closure, registered request→reply pairs, and
/// nothing (the write is only recorded). Replies are appended to the read queue, after any reads that
/// were scripted before the write.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use crate::hidpp::{self, features, Frame, LONG_REPORT_LEN, SHORT_REPORT_LEN};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// One scripted outcome of `read_report`.
    #[derive(Debug, Clone)]
    pub enum ScriptedRead {
        Report(Vec<u8>),
        Timeout,
        Fail(String),
    }

    type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

    #[derive(Default)]
    struct State {
        responses: HashMap<Vec<u8>, Vec<u8>>,
        responder: Option<Responder>,
        pending: VecDeque<ScriptedRead>,
        written: Vec<Vec<u8>>,
        reads: usize,
    }

    /// Mock transport that returns preconfigured responses.
    ///
    /// Cloning shares the underlying state, so a test can keep a handle
    /// after moving the transport into a session.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<State>>,
    }

    fn pad(report_id: u8, device_idx: u8, sub_id: u8, address: u8, params: &[u8]) -> Vec<u8> {
        let len = if report_id == 0x10 {
            SHORT_REPORT_LEN
        } else {
            LONG_REPORT_LEN
        };
        let mut buf = vec![report_id, device_idx, sub_id, address];
        buf.extend_from_slice(params);
        buf.resize(len, 0);
        buf
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a response for a given request.
        pub fn on_request(&self, request: Vec<u8>, response: Vec<u8>) {
            self.state.lock().unwrap().responses.insert(request, response);
        }

        /// Register a short reply to a short request.
        ///
        /// `address` is the on-wire byte, origin tag included.
        pub fn on_short_request(
            &self,
            device_idx: u8,
            sub_id: u8,
            address: u8,
            req_params: &[u8],
            resp_params: &[u8],
        ) {
            self.on_request(
                pad(0x10, device_idx, sub_id, address, req_params),
                pad(0x10, device_idx, sub_id, address, resp_params),
            );
        }

        /// Register a long reply to a request.
        ///
        /// The request is short when its params fit in 3 bytes, long otherwise.
        pub fn on_long_request(
            &self,
            device_idx: u8,
            sub_id: u8,
            address: u8,
            req_params: &[u8],
            resp_params: &[u8],
        ) {
            let req_report_id = if req_params.len() <= 3 { 0x10 } else { 0x11 };
            self.on_request(
                pad(req_report_id, device_idx, sub_id, address, req_params),
                pad(0x11, device_idx, sub_id, address, resp_params),
            );
        }

        /// Answer every write with whatever `f` returns.
        pub fn set_responder<F>(&self, f: F)
        where
            F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
        {
            self.state.lock().unwrap().responder = Some(Box::new(f));
        }

        /// Queue a raw report to be read before any reply.
        pub fn push_report(&self, report: Vec<u8>) {
            self.push(ScriptedRead::Report(report));
        }

        pub fn push_timeout(&self) {
            self.push(ScriptedRead::Timeout);
        }

        pub fn push_failure(&self, msg: &str) {
            self.push(ScriptedRead::Fail(msg.to_string()));
        }

        pub fn push(&self, read: ScriptedRead) {
            self.state.lock().unwrap().pending.push_back(read);
        }

        /// All reports written so far.
        pub fn written(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().written.clone()
        }

        /// Number of `read_report` calls so far.
        pub fn read_count(&self) -> usize {
            self.state.lock().unwrap().reads
        }
    }

    impl HidTransport for MockTransport {
        fn write_report(&self, data: &[u8]) -> Result<()> {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.written.push(data.to_vec());

            let replies = match state.responder.as_mut() {
                Some(responder) => responder(data),
                None => state.responses.get(data).cloned().into_iter().collect(),
            };
            state
                .pending
                .extend(replies.into_iter().map(ScriptedRead::Report));
            Ok(())
        }

        fn read_report(&self, buf: &mut [u8], _timeout: Duration) -> Result<Option<usize>> {
            let mut state = self.state.lock().unwrap();
            state.reads += 1;
            match state.pending.pop_front() {
                Some(ScriptedRead::Report(report)) => {
                    let n = report.len().min(buf.len());
                    buf[..n].copy_from_slice(&report[..n]);
                    Ok(Some(n))
                }
                Some(ScriptedRead::Fail(msg)) => Err(Error::Transport(msg)),
                Some(ScriptedRead::Timeout) | None => Ok(None),
            }
        }
    }

    /// A simulated HID++ 2.0 mouse with onboard memory.
    ///
    /// Answers root, feature-set and onboard-profiles (0x8100) requests.
    /// Pages live in a map keyed by page address. A page that was never
    /// stored reads back as erased flash (all 0xFF).
    #[derive(Clone)]
    pub struct FakeDevice {
        state: Arc<Mutex<FakeState>>,
    }

    struct PendingWrite {
        page: u16,
        data: Vec<u8>,
        expected: usize,
    }

    struct FakeState {
        features: Vec<u16>,
        description: [u8; 11],
        mode: u8,
        current_profile: u8,
        dpi_index: u8,
        pages: HashMap<u16, Vec<u8>>,
        unreadable: Vec<u16>,
        write: Option<PendingWrite>,
        committed: Vec<u16>,
    }

    impl FakeDevice {
        pub const SECTOR_SIZE: usize = 256;

        /// A device in host mode with `profile_count` user and ROM profiles.
        pub fn new(profile_count: u8) -> Self {
            let state = FakeState {
                features: vec![
                    features::ROOT,
                    features::FEATURE_SET,
                    features::DEVICE_NAME,
                    features::ONBOARD_PROFILES,
                ],
                // G-shift and DPI-shift buttons, wireless
                description: [
                    0x01,
                    0x03,
                    0x01,
                    profile_count,
                    profile_count,
                    0x10,
                    0x10,
                    0x01,
                    0x00,
                    0x0A,
                    0x02,
                ],
                mode: 0x02,
                current_profile: 0x01,
                dpi_index: 0,
                pages: HashMap::new(),
                unreadable: Vec::new(),
                write: None,
                committed: Vec::new(),
            };
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }

        /// A transport wired to this device.
        pub fn transport(&self) -> MockTransport {
            let mock = MockTransport::new();
            let state = Arc::clone(&self.state);
            mock.set_responder(move |data| state.lock().unwrap().respond(data));
            mock
        }

        pub fn feature_index(&self, feature_id: u16) -> u8 {
            let state = self.state.lock().unwrap();
            state
                .features
                .iter()
                .position(|&id| id == feature_id)
                .map_or(0, |i| i as u8)
        }

        /// Patch one byte of the getDescription reply.
        pub fn set_description_byte(&self, offset: usize, value: u8) {
            self.state.lock().unwrap().description[offset] = value;
        }

        pub fn set_mode(&self, mode: u8) {
            self.state.lock().unwrap().mode = mode;
        }

        pub fn mode(&self) -> u8 {
            self.state.lock().unwrap().mode
        }

        /// Raw current-profile byte (1-based, 0 = none).
        pub fn current_profile(&self) -> u8 {
            self.state.lock().unwrap().current_profile
        }

        pub fn dpi_index(&self) -> u8 {
            self.state.lock().unwrap().dpi_index
        }

        pub fn set_page(&self, page: u16, data: Vec<u8>) {
            self.state.lock().unwrap().pages.insert(page, data);
        }

        pub fn page(&self, page: u16) -> Option<Vec<u8>> {
            self.state.lock().unwrap().pages.get(&page).cloned()
        }

        /// Reads of `page` fail with INVALID_ARGUMENT.
        pub fn make_unreadable(&self, page: u16) {
            self.state.lock().unwrap().unreadable.push(page);
        }

        /// Pages written through the handshake, in order.
        pub fn committed_pages(&self) -> Vec<u16> {
            self.state.lock().unwrap().committed.clone()
        }
    }

    type Reply = std::result::Result<Vec<u8>, u8>;

    impl FakeState {
        fn respond(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
            let Ok(req) = Frame::decode(data) else {
                return Vec::new();
            };
            let function = req.address & 0xF0;
            let params = req.params;
            let result = match self.features.get(req.sub_id as usize).copied() {
                Some(features::ROOT) => self.root(function, &params),
                Some(features::FEATURE_SET) => self.feature_set(function, &params),
                Some(features::ONBOARD_PROFILES) => self.onboard(function, &params),
                _ => Err(hidpp::HIDPP20_ERR_UNSUPPORTED),
            };
            let reply = match result {
                Ok(params) => Frame::long(req.device_index, req.sub_id, req.address, &params),
                Err(code) => Frame::long(
                    req.device_index,
                    hidpp::HIDPP20_ERROR_SUB_ID,
                    req.sub_id,
                    &[req.address, code],
                ),
            };
            vec![reply.encode()]
        }

        fn root(&self, function: u8, params: &[u8; 16]) -> Reply {
            match function {
                0x00 => {
                    let id = u16::from_be_bytes([params[0], params[1]]);
                    let index = self.features.iter().position(|&f| f == id).unwrap_or(0);
                    Ok(vec![index as u8, 0, 0])
                }
                0x10 => Ok(vec![4, 2, params[2]]),
                _ => Err(hidpp::HIDPP20_ERR_INVALID_FUNCTION_ID),
            }
        }

        fn feature_set(&self, function: u8, params: &[u8; 16]) -> Reply {
            match function {
                0x00 => Ok(vec![(self.features.len() - 1) as u8]),
                0x10 => match self.features.get(params[0] as usize) {
                    Some(id) => Ok(vec![(id >> 8) as u8, *id as u8, 0, 0]),
                    None => Err(hidpp::HIDPP20_ERR_INVALID_ARGUMENT),
                },
                _ => Err(hidpp::HIDPP20_ERR_INVALID_FUNCTION_ID),
            }
        }

        fn onboard(&mut self, function: u8, params: &[u8; 16]) -> Reply {
            let be16 = |at: usize| u16::from_be_bytes([params[at], params[at + 1]]);
            match function {
                0x00 => Ok(self.description.to_vec()),
                0x10 => {
                    self.mode = params[1];
                    Ok(Vec::new())
                }
                0x20 => Ok(vec![self.mode]),
                0x30 => {
                    self.current_profile = params[1];
                    Ok(Vec::new())
                }
                0x40 => Ok(vec![0, self.current_profile]),
                0x50 => {
                    let page = be16(0);
                    let offset = be16(2) as usize;
                    if self.unreadable.contains(&page) || offset + 16 > FakeDevice::SECTOR_SIZE {
                        return Err(hidpp::HIDPP20_ERR_INVALID_ARGUMENT);
                    }
                    Ok(match self.pages.get(&page) {
                        Some(data) => data[offset..offset + 16].to_vec(),
                        None => vec![0xFF; 16],
                    })
                }
                0x60 => {
                    self.write = Some(PendingWrite {
                        page: be16(0),
                        data: Vec::new(),
                        expected: be16(4) as usize,
                    });
                    Ok(Vec::new())
                }
                0x70 => match self.write.as_mut() {
                    Some(write) => {
                        write.data.extend_from_slice(&params[..]);
                        Ok(Vec::new())
                    }
                    None => Err(hidpp::HIDPP20_ERR_INVALID_ARGUMENT),
                },
                0x80 => match self.write.take() {
                    Some(write) if write.data.len() == write.expected => {
                        self.committed.push(write.page);
                        self.pages.insert(write.page, write.data);
                        Ok(Vec::new())
                    }
                    _ => Err(hidpp::HIDPP20_ERR_INVALID_ARGUMENT),
                },
                0xB0 => Ok(vec![self.dpi_index]),
                0xC0 => {
                    self.dpi_index = params[0];
                    Ok(Vec::new())
                }
                _ => Err(hidpp::HIDPP20_ERR_INVALID_FUNCTION_ID),
            }
        }
    }
}
