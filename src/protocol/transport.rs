use std::io::{self, Cursor, Read, Write};

use bincode::{
    Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_std_read, encode_into_std_write,
};
use log::{trace, warn};

use super::{
    WireError,
    message::{Message, Value, ValueKind},
};

/// Largest string or field count accepted by default (16 MiB).
pub const DEFAULT_MAX_LENGTH: usize = 16 * 1024 * 1024;

type WireConfig = Configuration<BigEndian, Fixint>;

fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// What the decoder does with a value tag outside the known alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTagPolicy {
    /// Fail the frame with [`WireError::UnknownTag`].
    #[default]
    Reject,
    /// Drop the field and continue with the next byte. No payload is
    /// consumed, so a sender that really meant a payload desynchronises
    /// the stream; kept for peers that relied on the lenient behaviour.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub unknown_tags: UnknownTagPolicy,
    pub max_length: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            unknown_tags: UnknownTagPolicy::Reject,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// Encodes `msg` into a complete frame.
pub fn encode_to_vec(msg: &Message) -> Result<Vec<u8>, WireError> {
    let config = wire_config();
    let mut buf = Vec::with_capacity(64);

    put(&mut buf, msg.command, config)?;
    put(&mut buf, length_prefix(msg.len())?, config)?;
    for (key, value) in msg.iter() {
        put_str(&mut buf, key, config)?;
        put(&mut buf, value.kind().tag(), config)?;
        match value {
            Value::Bool(v) => put(&mut buf, *v, config)?,
            Value::I8(v) => put(&mut buf, *v, config)?,
            Value::I32(v) => put(&mut buf, *v, config)?,
            Value::Long(v) | Value::I64(v) => put(&mut buf, *v, config)?,
            Value::U8(v) => put(&mut buf, *v, config)?,
            Value::U32(v) => put(&mut buf, *v, config)?,
            Value::ULong(v) | Value::U64(v) => put(&mut buf, *v, config)?,
            Value::F32(v) => put(&mut buf, *v, config)?,
            Value::F64(v) => put(&mut buf, *v, config)?,
            Value::Str(v) => put_bytes(&mut buf, v.as_bytes(), config)?,
        }
    }
    Ok(buf)
}

/// Decodes one frame from the front of `bytes`, returning the message and
/// the number of bytes consumed.
pub fn decode_from_slice(
    bytes: &[u8],
    options: DecodeOptions,
) -> Result<(Message, usize), WireError> {
    let mut cursor = Cursor::new(bytes);
    read_frame(&mut cursor, options)
}

fn length_prefix(len: usize) -> Result<i32, WireError> {
    i32::try_from(len).map_err(|_| WireError::TooLong {
        len,
        max: i32::MAX as usize,
    })
}

fn put<E: Encode>(buf: &mut Vec<u8>, value: E, config: WireConfig) -> Result<(), WireError> {
    encode_into_std_write(value, buf, config)?;
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8], config: WireConfig) -> Result<(), WireError> {
    put(buf, length_prefix(bytes.len())?, config)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, s: &str, config: WireConfig) -> Result<(), WireError> {
    put(buf, ValueKind::Str.tag(), config)?;
    put_bytes(buf, s.as_bytes(), config)
}

/// Counts bytes pulled through the wrapped reader.
struct Counted<R> {
    inner: R,
    count: usize,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n;
        Ok(n)
    }
}

/// Reads the leading command word. Hitting end of stream before its first
/// byte is a clean close; anywhere after that the frame is truncated.
fn read_command<R: Read>(reader: &mut R) -> Result<i32, WireError> {
    let mut word = [0u8; 4];
    let mut filled = 0;
    while filled < word.len() {
        match reader.read(&mut word[filled..]) {
            Ok(0) if filled == 0 => return Err(WireError::ConnectionClosed),
            Ok(0) => return Err(WireError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(i32::from_be_bytes(word))
}

fn read_length<R: Read>(
    reader: &mut R,
    config: WireConfig,
    max: usize,
) -> Result<usize, WireError> {
    let len: i32 = decode_from_std_read(reader, config)?;
    let len = usize::try_from(len).map_err(|_| WireError::NegativeLength(len))?;
    if len > max {
        return Err(WireError::TooLong { len, max });
    }
    Ok(len)
}

fn read_string<R: Read>(
    reader: &mut R,
    config: WireConfig,
    max: usize,
) -> Result<String, WireError> {
    let len = read_length(reader, config, max)?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => WireError::Truncated,
        _ => WireError::Io(e),
    })?;
    String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
}

fn read_frame<R: Read>(reader: R, options: DecodeOptions) -> Result<(Message, usize), WireError> {
    let config = wire_config();
    let mut reader = Counted {
        inner: reader,
        count: 0,
    };

    let command = read_command(&mut reader)?;
    let count: i32 = decode_from_std_read(&mut reader, config)?;
    let count = usize::try_from(count).map_err(|_| WireError::NegativeFieldCount(count))?;
    if count > options.max_length {
        return Err(WireError::TooLong {
            len: count,
            max: options.max_length,
        });
    }

    let mut msg = Message::new(command);
    for _ in 0..count {
        let key_tag: u8 = decode_from_std_read(&mut reader, config)?;
        if key_tag != ValueKind::Str.tag() {
            return Err(WireError::InvalidKeyTag(key_tag));
        }
        let key = read_string(&mut reader, config, options.max_length)?;

        let tag: u8 = decode_from_std_read(&mut reader, config)?;
        let kind = match ValueKind::try_from(tag) {
            Ok(kind) => kind,
            Err(tag) => match options.unknown_tags {
                UnknownTagPolicy::Reject => return Err(WireError::UnknownTag(tag)),
                UnknownTagPolicy::Skip => {
                    warn!("dropping field '{key}' with unknown tag {tag:#04x}");
                    continue;
                }
            },
        };

        let value = match kind {
            ValueKind::Bool => Value::Bool(decode_from_std_read(&mut reader, config)?),
            ValueKind::I8 => Value::I8(decode_from_std_read(&mut reader, config)?),
            ValueKind::I32 => Value::I32(decode_from_std_read(&mut reader, config)?),
            ValueKind::Long => Value::Long(decode_from_std_read(&mut reader, config)?),
            ValueKind::I64 => Value::I64(decode_from_std_read(&mut reader, config)?),
            ValueKind::U8 => Value::U8(decode_from_std_read(&mut reader, config)?),
            ValueKind::U32 => Value::U32(decode_from_std_read(&mut reader, config)?),
            ValueKind::ULong => Value::ULong(decode_from_std_read(&mut reader, config)?),
            ValueKind::U64 => Value::U64(decode_from_std_read(&mut reader, config)?),
            ValueKind::F32 => Value::F32(decode_from_std_read(&mut reader, config)?),
            ValueKind::F64 => Value::F64(decode_from_std_read(&mut reader, config)?),
            ValueKind::Str => Value::Str(read_string(&mut reader, config, options.max_length)?),
        };
        msg.set(key, value);
    }

    trace!("decoded frame of {} bytes: {msg}", reader.count);
    Ok((msg, reader.count))
}

/// Frames [`Message`]s over a bidirectional byte stream.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    options: DecodeOptions,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self::with_options(stream, DecodeOptions::default())
    }

    pub fn with_options(stream: T, options: DecodeOptions) -> Self {
        Self { stream, options }
    }

    /// Writes one full frame, returning the number of bytes written.
    pub fn write_message(&mut self, msg: &Message) -> Result<usize, WireError> {
        let frame = encode_to_vec(msg)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(frame.len())
    }

    /// Blocks until one full frame is read, returning it with its size.
    pub fn read_message(&mut self) -> Result<(Message, usize), WireError> {
        read_frame(&mut self.stream, self.options)
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }
}
