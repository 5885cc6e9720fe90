use std::fmt;
use std::io;
use thiserror::Error;

/// Error type a byte callback may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Native operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Enumerate,
    Open,
    Close,
    Read,
    Write,
    Spawn,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoOp::Enumerate => "enumerate",
            IoOp::Open => "open",
            IoOp::Close => "close",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Spawn => "spawn worker for",
        })
    }
}

/// Coarse classification of a [`PortError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Io,
    Callback,
}

/// A fault reported through [`PortEvent::Error`](crate::PortEvent::Error).
///
/// None of these are returned to the caller of a channel operation.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("serial port {0} does not exist")]
    NotFound(String),

    #[error("invalid configuration for {port}: {reason}")]
    Config { port: String, reason: String },

    #[error("failed to {op} {port}: {source}")]
    Io {
        op: IoOp,
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("serial port {0} is not open")]
    NotOpen(String),

    #[error("byte callback failed on 0x{byte:02X}: {source}")]
    Callback {
        byte: u8,
        #[source]
        source: BoxError,
    },

    #[error("byte callback panicked on 0x{byte:02X}: {message}")]
    CallbackPanic { byte: u8, message: String },
}

impl PortError {
    pub fn io(op: IoOp, port: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            op,
            port: port.into(),
            source,
        }
    }

    pub fn config(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            port: port.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::Config { .. } => ErrorKind::Configuration,
            Self::Io { .. } | Self::NotOpen(_) => ErrorKind::Io,
            Self::Callback { .. } | Self::CallbackPanic { .. } => ErrorKind::Callback,
        }
    }
}

/// Failure returned directly from a channel operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("cannot use a disposed SerialChannel")]
    Disposed,
}
