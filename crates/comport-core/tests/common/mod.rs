#![allow(dead_code)]

use comport_core::{
    ChannelBuilder, ChannelConfig, ErrorKind, IoOp, PortError, PortInfo, PortIo, SerialBackend,
};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct MockState {
    pub devices: Vec<String>,
    /// Bytes the driver has received but the channel has not read yet.
    pub pending: VecDeque<u8>,
    pub written: Vec<u8>,
    pub writes: usize,
    pub reads: usize,
    pub opens: usize,
    pub closes: usize,
    pub open_ports: usize,
    pub fail_list: bool,
    pub fail_open: bool,
    pub fail_next_read: bool,
    /// Every `bytes_to_read` fails while set.
    pub fail_poll: bool,
    pub fail_write: bool,
    pub fail_close: bool,
}

/// In-memory serial backend. Clones share state, so a test can keep one
/// clone to drive the "driver" while the channel owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn with_devices(devices: &[&str]) -> Self {
        let backend = Self::default();
        backend.state().devices = devices.iter().map(|d| d.to_string()).collect();
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Make bytes available to the channel, as if they arrived on the wire.
    pub fn deliver(&self, bytes: &[u8]) {
        self.state().pending.extend(bytes);
    }
}

impl SerialBackend for MockBackend {
    fn list_ports(&self) -> io::Result<Vec<PortInfo>> {
        let state = self.state();
        if state.fail_list {
            return Err(io::Error::new(io::ErrorKind::Other, "enumeration failed"));
        }
        Ok(state.devices.iter().map(|d| PortInfo::named(d.as_str())).collect())
    }

    fn open(&self, config: &ChannelConfig) -> Result<Box<dyn PortIo>, PortError> {
        let mut state = self.state();
        if state.fail_open {
            let source = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
            return Err(PortError::io(IoOp::Open, &config.port_name, source));
        }
        state.opens += 1;
        state.open_ports += 1;
        Ok(Box::new(MockPort {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MockPort {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl PortIo for MockPort {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let state = self.state.lock().unwrap();
        if state.fail_poll {
            return Err(io::Error::new(io::ErrorKind::Other, "device unplugged"));
        }
        Ok(state.pending.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        let n = buf.len().min(state.pending.len());
        let bytes: Vec<u8> = state.pending.drain(..n).collect();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(io::Error::new(io::ErrorKind::Other, "framing error"));
        }
        buf[..n].copy_from_slice(&bytes);
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_write {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        state.writes += 1;
        state.written.extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        if !self.closed {
            self.closed = true;
            state.open_ports -= 1;
        }
        if state.fail_close {
            return Err(io::Error::new(io::ErrorKind::Other, "close failed"));
        }
        Ok(())
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        if !self.closed {
            self.state.lock().unwrap().open_ports -= 1;
        }
    }
}

/// Records every notification a channel emits, including during `build()`.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    errors: Arc<Mutex<Vec<(ErrorKind, String)>>>,
    connected: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn attach(&self, builder: ChannelBuilder) -> ChannelBuilder {
        let errors = self.errors.clone();
        let connected = self.connected.clone();
        builder
            .on_port_error(move |e| errors.lock().unwrap().push((e.kind(), e.to_string())))
            .on_port_connected(move |name| connected.lock().unwrap().push(name.to_string()))
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }
}

pub fn config(port_name: &str) -> ChannelConfig {
    ChannelConfig::new(port_name, 115_200).poll_interval(Duration::from_millis(1))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or two seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
