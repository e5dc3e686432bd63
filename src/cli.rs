//! CLI utilities for netcore.
//!
//! Helpers used by the command-line client to build a [`Message`] from
//! arguments of the form `KEY=TAG:VALUE`, where `TAG` is one of the wire
//! tags (`b c i l x h j m y f d s`).
use thiserror::Error;

use crate::protocol::{Message, Value, ValueKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("expected KEY=TAG:VALUE, got '{0}'")]
    Syntax(String),
    #[error("unknown type tag '{0}'")]
    UnknownTag(String),
    #[error("invalid {kind:?} value '{value}'")]
    InvalidValue { kind: ValueKind, value: String },
}

/// Parses one `KEY=TAG:VALUE` argument.
pub fn parse_field(arg: &str) -> Result<(String, Value), FieldError> {
    let (key, typed) = arg
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| FieldError::Syntax(arg.to_string()))?;
    let (tag, raw) = typed
        .split_once(':')
        .ok_or_else(|| FieldError::Syntax(arg.to_string()))?;

    let kind = match tag.as_bytes() {
        [byte] => ValueKind::try_from(*byte).map_err(|_| FieldError::UnknownTag(tag.to_string()))?,
        _ => return Err(FieldError::UnknownTag(tag.to_string())),
    };
    let invalid = || FieldError::InvalidValue {
        kind,
        value: raw.to_string(),
    };

    let value = match kind {
        ValueKind::Bool => match raw {
            "1" | "true" | "TRUE" => Value::Bool(true),
            "0" | "false" | "FALSE" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        ValueKind::I8 => Value::I8(raw.parse().map_err(|_| invalid())?),
        ValueKind::I32 => Value::I32(raw.parse().map_err(|_| invalid())?),
        ValueKind::Long => Value::Long(raw.parse().map_err(|_| invalid())?),
        ValueKind::I64 => Value::I64(raw.parse().map_err(|_| invalid())?),
        ValueKind::U8 => Value::U8(raw.parse().map_err(|_| invalid())?),
        ValueKind::U32 => Value::U32(raw.parse().map_err(|_| invalid())?),
        ValueKind::ULong => Value::ULong(raw.parse().map_err(|_| invalid())?),
        ValueKind::U64 => Value::U64(raw.parse().map_err(|_| invalid())?),
        ValueKind::F32 => Value::F32(raw.parse().map_err(|_| invalid())?),
        ValueKind::F64 => Value::F64(raw.parse().map_err(|_| invalid())?),
        ValueKind::Str => Value::Str(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Builds a message from a command code and `KEY=TAG:VALUE` arguments.
pub fn build_message<I, S>(command: i32, fields: I) -> Result<Message, FieldError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut msg = Message::new(command);
    for field in fields {
        let (key, value) = parse_field(field.as_ref())?;
        msg.set(key, value);
    }
    Ok(msg)
}
