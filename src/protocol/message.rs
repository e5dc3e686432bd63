use std::{collections::HashMap, fmt};

/// Command value a client sends to end its connection.
pub const CLOSE_COMMAND: i32 = -1;

/// One byte discriminator written in front of every key and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Bool = b'b',
    I8 = b'c',
    I32 = b'i',
    /// Platform `long`; always transmitted as 64 bits.
    Long = b'l',
    I64 = b'x',
    U8 = b'h',
    U32 = b'j',
    /// Platform `unsigned long`; always transmitted as 64 bits.
    ULong = b'm',
    U64 = b'y',
    F32 = b'f',
    F64 = b'd',
    Str = b's',
}

impl ValueKind {
    pub const ALL: [ValueKind; 12] = [
        ValueKind::Bool,
        ValueKind::I8,
        ValueKind::I32,
        ValueKind::Long,
        ValueKind::I64,
        ValueKind::U8,
        ValueKind::U32,
        ValueKind::ULong,
        ValueKind::U64,
        ValueKind::F32,
        ValueKind::F64,
        ValueKind::Str,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ValueKind {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            b'b' => Ok(ValueKind::Bool),
            b'c' => Ok(ValueKind::I8),
            b'i' => Ok(ValueKind::I32),
            b'l' => Ok(ValueKind::Long),
            b'x' => Ok(ValueKind::I64),
            b'h' => Ok(ValueKind::U8),
            b'j' => Ok(ValueKind::U32),
            b'm' => Ok(ValueKind::ULong),
            b'y' => Ok(ValueKind::U64),
            b'f' => Ok(ValueKind::F32),
            b'd' => Ok(ValueKind::F64),
            b's' => Ok(ValueKind::Str),
            other => Err(other),
        }
    }
}

/// A typed field value. The variant decides the tag and payload width on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I32(i32),
    Long(i64),
    I64(i64),
    U8(u8),
    U32(u32),
    ULong(u64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::I8(_) => ValueKind::I8,
            Value::I32(_) => ValueKind::I32,
            Value::Long(_) => ValueKind::Long,
            Value::I64(_) => ValueKind::I64,
            Value::U8(_) => ValueKind::U8,
            Value::U32(_) => ValueKind::U32,
            Value::ULong(_) => ValueKind::ULong,
            Value::U64(_) => ValueKind::U64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Str(_) => ValueKind::Str,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widened view of any signed or unsigned integer that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::Long(v) | Value::I64(v) => Some(v),
            Value::U8(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::ULong(v) | Value::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", u8::from(*v)),
            Value::I8(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::Long(v) | Value::I64(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::ULong(v) | Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i8 => I8,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

/// Unit of exchange: a command code plus uniquely keyed typed fields.
///
/// Fields iterate in insertion order locally, but the order is not part of
/// the message identity: two messages are equal when they carry the same
/// command and the same key/value set.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub command: i32,
    fields: Vec<(String, Value)>,
    /// Position of each key in `fields`.
    index: HashMap<String, usize>,
}

impl Message {
    pub fn new(command: i32) -> Self {
        Self {
            command,
            fields: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Message asking the server to close the connection.
    pub fn close() -> Self {
        Self::new(CLOSE_COMMAND)
    }

    pub fn is_close(&self) -> bool {
        self.command == CLOSE_COMMAND
    }

    /// Builder form of [`Message::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Inserts a field, replacing the value of an existing key in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.fields[pos].1, value)),
            None => {
                self.index.insert(key.clone(), self.fields.len());
                self.fields.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&pos| &self.fields[pos].1)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.fields.remove(pos);
        for (k, _) in &self.fields[pos..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resets the command to 0 and drops every field.
    pub fn clear(&mut self) {
        self.command = 0;
        self.clear_fields();
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
        self.index.clear();
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CMD:{},SIZE:{},DATA:", self.command, self.len())?;
        for (key, value) in &self.fields {
            write!(f, "{key}={value},")?;
        }
        Ok(())
    }
}
