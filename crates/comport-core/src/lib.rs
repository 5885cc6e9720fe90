//! Serial port channel: open a device, queue every received byte, optionally
//! hand each byte to a callback on a background worker.

pub mod backend;
pub mod channel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod queue;

pub use backend::{PortInfo, PortIo, SerialBackend, SystemBackend};
pub use channel::{ByteCallback, ChannelBuilder, SerialChannel};
pub use config::{ChannelConfig, LineEnding, Parity, StopBits};
pub use encoding::TextEncoding;
pub use error::{BoxError, ChannelError, ErrorKind, IoOp, PortError};
pub use events::{EventHub, ListenerId, PortEvent};
pub use queue::{CancelSource, CancelToken, ReceivedQueue};
