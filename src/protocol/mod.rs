//! Client-server message protocol.
//!
//! This module defines the typed key/value message exchanged between netcore
//! clients and servers, the binary framing used to move it over TCP, and the
//! acceptor/initiator pair built on top of it.
//!
//! # Overview
//!
//! A client opens a connection, writes one request frame and blocks until the
//! response frame arrives. The server reads requests in a loop, hands each to
//! a [`Handler`] and writes back whatever the handler returns, until the
//! client sends the close command ([`CLOSE_COMMAND`], `-1`) or goes away.
//! Requests and responses strictly alternate; there are no correlation ids.
//!
//! # Key Components
//!
//! - [`Message`]: command code plus uniquely keyed [`Value`] fields.
//! - [`ProtocolTransport`]: frame encoder/decoder over any `Read + Write` stream.
//! - [`ThreadPool`]: fixed worker set the server can dispatch connections to.
//! - [`Server`]: accept loop with a live [`ConnectionCounter`].
//! - [`Client`]: connect and exchange.
//!
//! # Binary Format
//!
//! Every multi-byte integer and float is big-endian.
//!
//! ```text
//! Frame  := i32 command, i32 field_count, field_count * Field
//! Field  := u8 's', i32 key_len, key bytes, u8 value_tag, payload
//! ```
//!
//! | tag | kind | payload |
//! |-----|------|---------|
//! | `b` | bool | 1 byte, 0 or 1 |
//! | `c` / `h` | i8 / u8 | 1 byte |
//! | `i` / `j` | i32 / u32 | 4 bytes |
//! | `l` / `m` | long / unsigned long | 8 bytes |
//! | `x` / `y` | i64 / u64 | 8 bytes |
//! | `f` / `d` | f32 / f64 | 4 / 8 bytes IEEE-754 |
//! | `s` | string | i32 length + UTF-8 bytes |
//!
//! # Limitations
//!
//! Socket reads and writes block without a deadline unless a socket timeout
//! is configured, and a pool worker stuck in a connection stays stuck.
mod client;
mod error;
mod message;
mod server;
mod thread;
pub(crate) mod transport;

pub use client::Client;
pub use error::{TransportError, WireError};
pub use message::{CLOSE_COMMAND, Message, Value, ValueKind};
pub use server::{
    ConnectionCounter, ConnectionInfo, ConnectionSlot, Echo, Handler, HandlerError, Server,
};
pub use thread::{JobHandle, PoolError, PoolState, ThreadPool};
pub use transport::{
    DEFAULT_MAX_LENGTH, DecodeOptions, ProtocolTransport, UnknownTagPolicy, decode_from_slice,
    encode_to_vec,
};
