// error.rs
use std::{error::Error, fmt, io};

const ERR_MSG_MAILBOX_FULL: &str = "mailbox is full";
const ERR_MSG_NO_ROUTE: &str = "no route to destination";
const ERR_MSG_MAILBOX_CLOSED: &str = "mailbox is closed";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SendFailReason {
    Full,    // receiver queue is out of space
    NoRoute, // destination pool/actor does not exist
    Closed,  // receiver is gone
}

impl fmt::Display for SendFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailReason::Full => write!(f, "{ERR_MSG_MAILBOX_FULL}"),
            SendFailReason::NoRoute => write!(f, "{ERR_MSG_NO_ROUTE}"),
            SendFailReason::Closed => write!(f, "{ERR_MSG_MAILBOX_CLOSED}"),
        }
    }
}

/// Failed send. `value` carries the undelivered message back to the
/// caller, so ownership is never lost on failure.
#[derive(Debug)]
pub struct SendError<M> {
    pub value: Option<M>,
    pub reason: SendFailReason,
}

impl<M> SendError<M> {
    pub fn full(value: Option<M>) -> Self {
        Self {
            value,
            reason: SendFailReason::Full,
        }
    }

    pub fn no_route(value: Option<M>) -> Self {
        Self {
            value,
            reason: SendFailReason::NoRoute,
        }
    }

    pub fn closed(value: Option<M>) -> Self {
        Self {
            value,
            reason: SendFailReason::Closed,
        }
    }

    pub fn into_value(self) -> Option<M> {
        self.value
    }
}

impl<M> fmt::Display for SendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl<M: fmt::Debug> Error for SendError<M> {}

/// Connection-level failures surfaced to callers as values, never panics.
#[derive(Debug)]
pub enum ConnError {
    /// The operation is not legal in the connection's current state.
    InvalidState,
    /// No connection with that id.
    NotFound,
    /// The pending-send queue hit its limit; retry or drop.
    QueueFull,
    Io(io::Error),
}

impl fmt::Display for ConnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnError::InvalidState => write!(f, "invalid connection state"),
            ConnError::NotFound => write!(f, "connection not found"),
            ConnError::QueueFull => write!(f, "connection send queue is full"),
            ConnError::Io(err) => write!(f, "connection i/o error: {err}"),
        }
    }
}

impl Error for ConnError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnError {
    fn from(err: io::Error) -> Self {
        ConnError::Io(err)
    }
}

/// Malformed inbound traffic. Any of these closes the connection; the
/// partial packet is never delivered twice.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    /// Chunk size line without a single hex digit.
    BadChunkSize,
    /// Missing CRLF framing around a chunk.
    ChunkFraming,
    /// Content-Length that is not a decimal integer.
    BadContentLength,
    /// Packet would exceed the maximum package size.
    Oversized(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadChunkSize => write!(f, "malformed chunk size"),
            ProtocolError::ChunkFraming => write!(f, "malformed chunk framing"),
            ProtocolError::BadContentLength => write!(f, "malformed content length"),
            ProtocolError::Oversized(n) => write!(f, "package too large: {n}B"),
        }
    }
}

impl Error for ProtocolError {}
