use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::config::ConfigError;

use super::thread::PoolError;

/// Faults raised while moving a frame across a stream.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("frame truncated: stream ended mid-frame")]
    Truncated,
    #[error("unknown value tag {0:#04x}")]
    UnknownTag(u8),
    #[error("unexpected key tag {0:#04x}, keys must be strings")]
    InvalidKeyTag(u8),
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("negative field count {0}")]
    NegativeFieldCount(i32),
    #[error("length {len} exceeds limit of {max}")]
    TooLong { len: usize, max: usize },
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode frame: {0}")]
    Decode(bincode::error::DecodeError),
    #[error("wire IO error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// True when the peer went away cleanly between frames.
    pub fn is_closed(&self) -> bool {
        matches!(self, WireError::ConnectionClosed)
    }

    /// True when the bytes received do not form a valid frame.
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            WireError::ConnectionClosed | WireError::Io(_) | WireError::Encode(_)
        )
    }
}

impl From<bincode::error::DecodeError> for WireError {
    fn from(err: bincode::error::DecodeError) -> Self {
        use bincode::error::DecodeError;

        match err {
            DecodeError::UnexpectedEnd { .. } => WireError::Truncated,
            DecodeError::Io { inner, .. } if inner.kind() == io::ErrorKind::UnexpectedEof => {
                WireError::Truncated
            }
            DecodeError::Io { inner, .. } => WireError::Io(inner),
            DecodeError::InvalidBooleanValue(b) => WireError::InvalidBool(b),
            other => WireError::Decode(other),
        }
    }
}

/// Faults raised by the acceptor and the initiator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket() error for {address}: {source}")]
    Socket {
        address: SocketAddr,
        source: io::Error,
    },
    #[error("bind() error for {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: io::Error,
    },
    #[error("listen() error for {address}: {source}")]
    Listen {
        address: SocketAddr,
        source: io::Error,
    },
    #[error("accept() error: {0}")]
    Accept(io::Error),
    #[error("connect() error for {address}: {source}")]
    Connect {
        address: String,
        source: io::Error,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Wire(e) if e.is_closed())
    }
}
