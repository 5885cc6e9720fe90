//! `SerialChannel`: one serial device session with a received-byte queue.
//!
//! A reader worker polls the open port and appends every byte it reads to the
//! [`ReceivedQueue`]. If a byte callback was configured, a drain worker takes
//! bytes off the queue in order and hands each one to the callback.
//!
//! Only [`ChannelError::Disposed`] is returned to callers. Every other failure
//! (open, close, read, write, callback) is reported as a [`PortEvent::Error`]
//! and the operation returns normally.

use crate::backend::{PortInfo, PortIo, SerialBackend, SystemBackend};
use crate::config::ChannelConfig;
use crate::error::{BoxError, ChannelError, IoOp, PortError};
use crate::events::{EventHub, ListenerId, PortEvent};
use crate::queue::{CancelSource, CancelToken, ReceivedQueue};
use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// Per-byte processing callback.
pub type ByteCallback = Box<dyn FnMut(u8) -> Result<(), BoxError> + Send>;

type SharedPort = Arc<Mutex<Box<dyn PortIo>>>;
type SharedCallback = Arc<Mutex<ByteCallback>>;

/// State reachable from the worker threads.
struct Shared {
    port_name: String,
    events: EventHub,
    queue: RwLock<ReceivedQueue>,
    last_data_received: Mutex<Option<SystemTime>>,
}

impl Shared {
    fn report(&self, err: PortError) {
        warn!("{}: {err}", self.port_name);
        self.events.emit_error(err);
    }

    fn data_received(&self, bytes: &[u8], at: SystemTime) {
        trace!("{}: received {} byte(s)", self.port_name, bytes.len());
        *self.last_data_received.lock() = Some(at);
        self.queue.read().extend(bytes);
    }
}

struct Worker {
    cancel: CancelSource,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(name: String, f: F) -> io::Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let handle = thread::Builder::new().name(name).spawn(move || f(token))?;
        Ok(Self { cancel, handle })
    }

    /// Cancel and wait for the worker, unless called from the worker itself.
    fn stop(mut self) {
        self.cancel.cancel();
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!("serial worker thread panicked");
        }
    }
}

#[derive(Default)]
struct Session {
    port: Option<SharedPort>,
    reader: Option<Worker>,
    drain: Option<Worker>,
}

pub struct ChannelBuilder {
    config: ChannelConfig,
    backend: Arc<dyn SerialBackend>,
    callback: Option<ByteCallback>,
    events: EventHub,
}

impl ChannelBuilder {
    pub fn backend<B: SerialBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Arc::new(backend);
        self
    }

    /// Process each received byte on a background worker instead of leaving
    /// it in [`SerialChannel::received_data`].
    pub fn on_byte<F>(mut self, f: F) -> Self
    where
        F: FnMut(u8) -> Result<(), BoxError> + Send + 'static,
    {
        self.callback = Some(Box::new(f));
        self
    }

    pub fn callback(mut self, callback: Option<ByteCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Listeners attached here also see errors raised while building.
    pub fn on_port_error<F>(self, f: F) -> Self
    where
        F: Fn(&PortError) + Send + Sync + 'static,
    {
        self.events.on_port_error(f);
        self
    }

    pub fn on_port_connected<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on_port_connected(f);
        self
    }

    /// Never fails. If the device is not present a [`PortError::NotFound`] is
    /// emitted and the returned channel is permanently invalid.
    pub fn build(self) -> SerialChannel {
        let ChannelBuilder {
            config,
            backend,
            callback,
            events,
        } = self;

        let shared = Arc::new(Shared {
            port_name: config.port_name.clone(),
            events,
            queue: RwLock::new(ReceivedQueue::new()),
            last_data_received: Mutex::new(None),
        });

        let valid = match backend.list_ports() {
            Ok(ports) if ports.iter().any(|p| p.port_name == config.port_name) => true,
            Ok(_) => {
                shared.report(PortError::NotFound(config.port_name.clone()));
                false
            }
            Err(e) => {
                shared.report(PortError::io(IoOp::Enumerate, &config.port_name, e));
                false
            }
        };

        SerialChannel {
            callback: if valid { callback.map(|cb| Arc::new(Mutex::new(cb))) } else { None },
            config,
            backend,
            valid,
            shared,
            session: Mutex::new(Session::default()),
            disposed: AtomicBool::new(false),
        }
    }
}

pub struct SerialChannel {
    config: ChannelConfig,
    backend: Arc<dyn SerialBackend>,
    valid: bool,
    shared: Arc<Shared>,
    callback: Option<SharedCallback>,
    session: Mutex<Session>,
    disposed: AtomicBool,
}

impl SerialChannel {
    pub fn builder(config: ChannelConfig) -> ChannelBuilder {
        ChannelBuilder {
            config,
            backend: Arc::new(SystemBackend),
            callback: None,
            events: EventHub::new(),
        }
    }

    /// Channel on the system backend with no pre-registered listeners.
    pub fn new(config: ChannelConfig, callback: Option<ByteCallback>) -> Self {
        Self::builder(config).callback(callback).build()
    }

    pub fn available_ports() -> io::Result<Vec<PortInfo>> {
        SystemBackend.list_ports()
    }

    /// Open the port and start the workers. An already open port is closed first.
    pub fn start_communications(&self) -> Result<(), ChannelError> {
        self.ensure_live()?;
        if !self.valid {
            self.shared.report(PortError::NotFound(self.config.port_name.clone()));
            return Ok(());
        }

        self.teardown();

        let port = match self.backend.open(&self.config) {
            Ok(port) => port,
            Err(e) => {
                self.shared.report(e);
                return Ok(());
            }
        };
        info!("{}: opened at {} baud", self.config.port_name, self.config.baud_rate);
        let port: SharedPort = Arc::new(Mutex::new(port));

        let reader = {
            let shared = self.shared.clone();
            let port = port.clone();
            let interval = self.config.poll_interval;
            Worker::spawn(format!("comport-reader:{}", self.config.port_name), move |token| {
                read_loop(&shared, &port, interval, &token)
            })
        };
        let reader = match reader {
            Ok(worker) => worker,
            Err(e) => {
                self.shared.report(PortError::io(IoOp::Spawn, &self.config.port_name, e));
                self.close_port(&port);
                return Ok(());
            }
        };

        let drain = self.callback.as_ref().and_then(|callback| {
            let shared = self.shared.clone();
            let queue = self.shared.queue.read().clone();
            let callback = callback.clone();
            let name = format!("comport-drain:{}", self.config.port_name);
            let spawned = Worker::spawn(name, move |token| {
                drain_loop(&shared, &queue, &callback, &token)
            });
            spawned
                .map_err(|e| {
                    self.shared.report(PortError::io(IoOp::Spawn, &self.config.port_name, e))
                })
                .ok()
        });

        *self.session.lock() = Session {
            port: Some(port),
            reader: Some(reader),
            drain,
        };
        self.shared.events.emit_connected(&self.config.port_name);
        Ok(())
    }

    /// Stop the workers, close the port and replace the received queue.
    pub fn stop_communications(&self) -> Result<(), ChannelError> {
        self.ensure_live()?;
        self.teardown();
        self.reset_queue();
        Ok(())
    }

    pub fn send_bytes(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.ensure_live()?;
        if !self.valid {
            self.shared.report(PortError::NotFound(self.config.port_name.clone()));
            return Ok(());
        }

        let port = self.session.lock().port.clone();
        let Some(port) = port else {
            self.shared.report(PortError::NotOpen(self.config.port_name.clone()));
            return Ok(());
        };

        let result = port.lock().write_all(bytes);
        match result {
            Ok(()) => trace!("{}: sent {} byte(s)", self.config.port_name, bytes.len()),
            Err(e) => self.shared.report(PortError::io(IoOp::Write, &self.config.port_name, e)),
        }
        Ok(())
    }

    /// Send `text` in the configured encoding.
    pub fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.ensure_live()?;
        self.send_bytes(&self.config.encoding.encode(text))
    }

    /// Send `text` followed by the configured line ending as one write.
    pub fn send_line(&self, text: &str) -> Result<(), ChannelError> {
        self.ensure_live()?;
        let mut data = self.config.encoding.encode(text).into_owned();
        data.extend_from_slice(self.config.line_ending.as_bytes());
        self.send_bytes(&data)
    }

    /// Close everything and release the port. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown();
        self.reset_queue();
        info!("{}: disposed", self.config.port_name);
    }

    pub fn port_name(&self) -> &str {
        &self.config.port_name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// False if the device was missing when the channel was built.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().port.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn last_data_received(&self) -> Option<SystemTime> {
        *self.shared.last_data_received.lock()
    }

    /// Handle to the live queue. Stopping communications swaps in a new queue,
    /// so handles taken before a stop no longer receive data.
    pub fn received_data(&self) -> ReceivedQueue {
        self.shared.queue.read().clone()
    }

    pub fn on_port_error<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&PortError) + Send + Sync + 'static,
    {
        self.shared.events.on_port_error(f)
    }

    pub fn on_port_connected<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.events.on_port_connected(f)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_listener(id)
    }

    /// Stream of events emitted from now on.
    pub fn subscribe(&self) -> Receiver<PortEvent> {
        self.shared.events.subscribe()
    }

    fn ensure_live(&self) -> Result<(), ChannelError> {
        if self.is_disposed() {
            return Err(ChannelError::Disposed);
        }
        Ok(())
    }

    fn teardown(&self) {
        // The session lock must not be held while joining: workers may call
        // back into the channel.
        let session = std::mem::take(&mut *self.session.lock());
        if let Some(drain) = session.drain {
            drain.stop();
            debug!("{}: drain worker stopped", self.config.port_name);
        }
        if let Some(reader) = session.reader {
            reader.stop();
            debug!("{}: reader worker stopped", self.config.port_name);
        }
        if let Some(port) = session.port {
            self.close_port(&port);
        }
    }

    fn close_port(&self, port: &SharedPort) {
        let result = port.lock().close();
        match result {
            Ok(()) => info!("{}: closed", self.config.port_name),
            Err(e) => self.shared.report(PortError::io(IoOp::Close, &self.config.port_name, e)),
        }
    }

    fn reset_queue(&self) {
        *self.shared.queue.write() = ReceivedQueue::new();
        debug!("{}: received queue reset", self.config.port_name);
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("port_name", &self.config.port_name)
            .field("valid", &self.valid)
            .field("open", &self.is_open())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Poll the port until cancelled. A run of consecutive failures is reported
/// once; the next successful poll ends the run.
fn read_loop(shared: &Shared, port: &SharedPort, interval: Duration, token: &CancelToken) {
    debug!("{}: reader worker started", shared.port_name);
    let mut buf = Vec::new();
    let mut failing = false;
    while !token.is_cancelled() {
        let result = {
            let mut port = port.lock();
            match port.bytes_to_read() {
                Ok(0) => Ok(None),
                Ok(available) => {
                    let at = SystemTime::now();
                    buf.resize(available, 0);
                    port.read(&mut buf).map(|n| Some((n, at)))
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            if failing {
                trace!("{}: read still failing: {e}", shared.port_name);
            } else {
                failing = true;
                shared.report(PortError::io(IoOp::Read, &shared.port_name, e));
            }
            if token.wait(interval) {
                break;
            }
            continue;
        }
        if failing {
            failing = false;
            debug!("{}: reads recovered", shared.port_name);
        }
        match result {
            Ok(Some((n, at))) if n > 0 => shared.data_received(&buf[..n], at),
            _ => {
                if token.wait(interval) {
                    break;
                }
            }
        }
    }
}

fn drain_loop(
    shared: &Shared,
    queue: &ReceivedQueue,
    callback: &SharedCallback,
    token: &CancelToken,
) {
    debug!("{}: drain worker started", shared.port_name);
    while let Some(byte) = queue.take_until(token) {
        let result = {
            let mut callback = callback.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*callback)(byte)))
        };
        match result {
            Ok(Ok(())) => {}
            Ok(Err(source)) => shared.report(PortError::Callback { byte, source }),
            Err(payload) => shared.report(PortError::CallbackPanic {
                byte,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
