//! Received-byte queue and the cancellation signal that interrupts a blocked
//! consumer.

use crossbeam_channel::{
    bounded, select_biased, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use std::time::Duration;

/// Unbounded FIFO of received bytes.
///
/// Clones share the same underlying queue. Any clone may push or take.
#[derive(Debug, Clone)]
pub struct ReceivedQueue {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

impl Default for ReceivedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivedQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, byte: u8) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(byte);
    }

    pub fn extend(&self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    pub fn try_take(&self) -> Option<u8> {
        self.rx.try_recv().ok()
    }

    pub fn take_timeout(&self, timeout: Duration) -> Option<u8> {
        match self.rx.recv_timeout(timeout) {
            Ok(b) => Some(b),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Block until a byte is available or `token` is cancelled.
    ///
    /// Returns `None` on cancellation. Cancellation wins over queued bytes, so
    /// nothing is taken once the token is cancelled.
    pub fn take_until(&self, token: &CancelToken) -> Option<u8> {
        select_biased! {
            recv(token.rx) -> _ => None,
            recv(self.rx) -> b => b.ok(),
        }
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<u8> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True if both handles refer to the same queue.
    pub fn same_queue(&self, other: &ReceivedQueue) -> bool {
        self.rx.same_channel(&other.rx)
    }
}

/// Owning side of a cancellation signal.
///
/// Nothing is ever sent on the channel; cancelling drops the sender, which
/// disconnects every [`CancelToken`] and wakes any `select!` waiting on it.
#[derive(Debug)]
pub struct CancelSource {
    tx: Option<Sender<()>>,
    rx: Receiver<()>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self { tx: Some(tx), rx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken { rx: self.rx.clone() }
    }

    pub fn cancel(&mut self) {
        self.tx.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`, waking early on cancellation.
    ///
    /// Returns `true` if the token is cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }
}
