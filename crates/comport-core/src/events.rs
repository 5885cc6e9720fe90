use crate::error::PortError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PortEvent {
    Connected(String),
    Error(Arc<PortError>),
}

/// Handle returned by listener registration; pass it to `remove_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ErrorListener = Arc<dyn Fn(&PortError) + Send + Sync>;
type ConnectedListener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Registry {
    on_error: Vec<(ListenerId, ErrorListener)>,
    on_connected: Vec<(ListenerId, ConnectedListener)>,
    streams: Vec<Sender<PortEvent>>,
}

/// Synchronous multi-subscriber fan-out for [`PortEvent`]s.
///
/// Events are delivered only to subscribers present at the time of the emit.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_port_error<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&PortError) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let f: ErrorListener = Arc::new(f);
        self.registry.lock().on_error.push((id, f));
        id
    }

    pub fn on_port_connected<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let f: ConnectedListener = Arc::new(f);
        self.registry.lock().on_connected.push((id, f));
        id
    }

    /// Returns `true` if a listener was removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut reg = self.registry.lock();
        let before = reg.on_error.len() + reg.on_connected.len();
        reg.on_error.retain(|(i, _)| *i != id);
        reg.on_connected.retain(|(i, _)| *i != id);
        before != reg.on_error.len() + reg.on_connected.len()
    }

    pub fn subscribe(&self) -> Receiver<PortEvent> {
        let (tx, rx) = unbounded();
        self.registry.lock().streams.push(tx);
        rx
    }

    pub fn emit_error(&self, err: PortError) {
        let err = Arc::new(err);
        let listeners: Vec<ErrorListener> = {
            let mut reg = self.registry.lock();
            reg.streams.retain(|tx| tx.send(PortEvent::Error(err.clone())).is_ok());
            reg.on_error.iter().map(|(_, f)| f.clone()).collect()
        };
        for f in listeners {
            f(&err);
        }
    }

    pub fn emit_connected(&self, port_name: &str) {
        let listeners: Vec<ConnectedListener> = {
            let mut reg = self.registry.lock();
            reg.streams
                .retain(|tx| tx.send(PortEvent::Connected(port_name.to_string())).is_ok());
            reg.on_connected.iter().map(|(_, f)| f.clone()).collect()
        };
        for f in listeners {
            f(port_name);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.registry.lock();
        f.debug_struct("EventHub")
            .field("error_listeners", &reg.on_error.len())
            .field("connected_listeners", &reg.on_connected.len())
            .field("streams", &reg.streams.len())
            .finish()
    }
}
