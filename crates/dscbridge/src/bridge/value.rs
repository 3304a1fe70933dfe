//! Typed values carried in argument and output maps.
//!
//! On the wire every value starts with a one-byte type tag using the MI type
//! numbering of the host. Bit `0x40` marks a null value: the tag still names
//! the declared type but no payload follows.
//!
//! ```text
//! Value       := tag:u8 payload
//! String      := len:i32 utf8{len}
//! <T>A        := count:i32 <T>{count}
//! InstanceA   := count:i32 (argc:i32 (name:String Value){argc}){count}
//! ```

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tokio::io::AsyncRead;

use super::error::ProtocolError;
use super::frame::{FrameReader, FrameWriter};

/// Named values, in the order they appeared on the wire.
pub type ArgMap = IndexMap<String, Value>;

/// Tag bit marking a null value.
pub const NULL_FLAG: u8 = 0x40;

/// Deepest record nesting accepted from the peer. Decoding recurses once
/// per level, so this bounds stack use.
pub const MAX_NESTING: usize = 32;

/// Upper bound on up-front allocation for a decoded sequence; longer
/// sequences grow as elements actually arrive.
const PREALLOC_LIMIT: usize = 1024;

/// Wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Boolean = 0,
    Uint8 = 1,
    Sint8 = 2,
    Uint16 = 3,
    Sint16 = 4,
    Uint32 = 5,
    Sint32 = 6,
    Uint64 = 7,
    Sint64 = 8,
    Real32 = 9,
    Real64 = 10,
    Char16 = 11,
    String = 13,
    BooleanA = 16,
    Uint8A = 17,
    Sint8A = 18,
    Uint16A = 19,
    Sint16A = 20,
    Uint32A = 21,
    Sint32A = 22,
    Uint64A = 23,
    Sint64A = 24,
    Real32A = 25,
    Real64A = 26,
    Char16A = 27,
    StringA = 29,
    InstanceA = 31,
}

impl ValueType {
    /// Resolves a tag with the null flag already stripped.
    ///
    /// Datetime, reference and single instance types are not carried by this
    /// bridge and are rejected.
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        let ty = match tag {
            0 => Self::Boolean,
            1 => Self::Uint8,
            2 => Self::Sint8,
            3 => Self::Uint16,
            4 => Self::Sint16,
            5 => Self::Uint32,
            6 => Self::Sint32,
            7 => Self::Uint64,
            8 => Self::Sint64,
            9 => Self::Real32,
            10 => Self::Real64,
            11 => Self::Char16,
            13 => Self::String,
            16 => Self::BooleanA,
            17 => Self::Uint8A,
            18 => Self::Sint8A,
            19 => Self::Uint16A,
            20 => Self::Sint16A,
            21 => Self::Uint32A,
            22 => Self::Sint32A,
            23 => Self::Uint64A,
            24 => Self::Sint64A,
            25 => Self::Real32A,
            26 => Self::Real64A,
            27 => Self::Char16A,
            29 => Self::StringA,
            31 => Self::InstanceA,
            other => return Err(ProtocolError::UnsupportedType(other)),
        };
        Ok(ty)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One typed datum crossing the wire.
///
/// `Null` is the only representation of "not supplied" and is distinct from
/// an empty array. Null entries are dropped when an argument map is encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(ValueType),
    Boolean(bool),
    Uint8(u8),
    Sint8(i8),
    Uint16(u16),
    Sint16(i16),
    Uint32(u32),
    Sint32(i32),
    Uint64(u64),
    Sint64(i64),
    Real32(f32),
    Real64(f64),
    Char16(u16),
    String(String),
    BooleanA(Vec<bool>),
    Uint8A(Vec<u8>),
    Sint8A(Vec<i8>),
    Uint16A(Vec<u16>),
    Sint16A(Vec<i16>),
    Uint32A(Vec<u32>),
    Sint32A(Vec<i32>),
    Uint64A(Vec<u64>),
    Sint64A(Vec<i64>),
    Real32A(Vec<f32>),
    Real64A(Vec<f64>),
    Char16A(Vec<u16>),
    StringA(Vec<String>),
    /// Array of records, each a nested argument map.
    InstanceA(Vec<ArgMap>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null(ty) => *ty,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Uint8(_) => ValueType::Uint8,
            Self::Sint8(_) => ValueType::Sint8,
            Self::Uint16(_) => ValueType::Uint16,
            Self::Sint16(_) => ValueType::Sint16,
            Self::Uint32(_) => ValueType::Uint32,
            Self::Sint32(_) => ValueType::Sint32,
            Self::Uint64(_) => ValueType::Uint64,
            Self::Sint64(_) => ValueType::Sint64,
            Self::Real32(_) => ValueType::Real32,
            Self::Real64(_) => ValueType::Real64,
            Self::Char16(_) => ValueType::Char16,
            Self::String(_) => ValueType::String,
            Self::BooleanA(_) => ValueType::BooleanA,
            Self::Uint8A(_) => ValueType::Uint8A,
            Self::Sint8A(_) => ValueType::Sint8A,
            Self::Uint16A(_) => ValueType::Uint16A,
            Self::Sint16A(_) => ValueType::Sint16A,
            Self::Uint32A(_) => ValueType::Uint32A,
            Self::Sint32A(_) => ValueType::Sint32A,
            Self::Uint64A(_) => ValueType::Uint64A,
            Self::Sint64A(_) => ValueType::Sint64A,
            Self::Real32A(_) => ValueType::Real32A,
            Self::Real64A(_) => ValueType::Real64A,
            Self::Char16A(_) => ValueType::Char16A,
            Self::StringA(_) => ValueType::StringA,
            Self::InstanceA(_) => ValueType::InstanceA,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::StringA(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_instances(&self) -> Option<&[ArgMap]> {
        match self {
            Self::InstanceA(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::StringA(value)
    }
}

impl From<Vec<&str>> for Value {
    fn from(value: Vec<&str>) -> Self {
        Self::StringA(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<ArgMap>> for Value {
    fn from(value: Vec<ArgMap>) -> Self {
        Self::InstanceA(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Sint32(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    /// `None` becomes a null string, the usual shape of an unset property.
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null(ValueType::String), Into::into)
    }
}

/// Plain form without type tags: null, scalars, arrays and records.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null(_) => serializer.serialize_none(),
            Self::Boolean(v) => v.serialize(serializer),
            Self::Uint8(v) => v.serialize(serializer),
            Self::Sint8(v) => v.serialize(serializer),
            Self::Uint16(v) | Self::Char16(v) => v.serialize(serializer),
            Self::Sint16(v) => v.serialize(serializer),
            Self::Uint32(v) => v.serialize(serializer),
            Self::Sint32(v) => v.serialize(serializer),
            Self::Uint64(v) => v.serialize(serializer),
            Self::Sint64(v) => v.serialize(serializer),
            Self::Real32(v) => v.serialize(serializer),
            Self::Real64(v) => v.serialize(serializer),
            Self::String(v) => v.serialize(serializer),
            Self::BooleanA(v) => v.serialize(serializer),
            Self::Uint8A(v) => v.serialize(serializer),
            Self::Sint8A(v) => v.serialize(serializer),
            Self::Uint16A(v) | Self::Char16A(v) => v.serialize(serializer),
            Self::Sint16A(v) => v.serialize(serializer),
            Self::Uint32A(v) => v.serialize(serializer),
            Self::Sint32A(v) => v.serialize(serializer),
            Self::Uint64A(v) => v.serialize(serializer),
            Self::Sint64A(v) => v.serialize(serializer),
            Self::Real32A(v) => v.serialize(serializer),
            Self::Real64A(v) => v.serialize(serializer),
            Self::StringA(v) => v.serialize(serializer),
            Self::InstanceA(v) => v.serialize(serializer),
        }
    }
}

macro_rules! put_array {
    ($w:expr, $items:expr, $put:ident) => {{
        $w.put_len($items.len())?;
        for item in $items {
            $w.$put(*item);
        }
    }};
}

macro_rules! read_array {
    ($r:expr, $read:ident) => {{
        let count = $r.read_len().await?;
        let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            items.push($r.$read().await?);
        }
        items
    }};
}

/// Writes one value: tag byte, then the payload unless the value is null.
pub fn write_value(w: &mut FrameWriter<'_>, value: &Value) -> Result<(), ProtocolError> {
    if let Value::Null(ty) = value {
        w.put_u8(ty.tag() | NULL_FLAG);
        return Ok(());
    }
    w.put_u8(value.value_type().tag());

    match value {
        Value::Null(_) => {}
        Value::Boolean(v) => w.put_bool(*v),
        Value::Uint8(v) => w.put_u8(*v),
        Value::Sint8(v) => w.put_i8(*v),
        Value::Uint16(v) | Value::Char16(v) => w.put_u16(*v),
        Value::Sint16(v) => w.put_i16(*v),
        Value::Uint32(v) => w.put_u32(*v),
        Value::Sint32(v) => w.put_i32(*v),
        Value::Uint64(v) => w.put_u64(*v),
        Value::Sint64(v) => w.put_i64(*v),
        Value::Real32(v) => w.put_f32(*v),
        Value::Real64(v) => w.put_f64(*v),
        Value::String(v) => w.put_string(v)?,
        Value::BooleanA(items) => put_array!(w, items, put_bool),
        Value::Uint8A(items) => put_array!(w, items, put_u8),
        Value::Sint8A(items) => put_array!(w, items, put_i8),
        Value::Uint16A(items) | Value::Char16A(items) => put_array!(w, items, put_u16),
        Value::Sint16A(items) => put_array!(w, items, put_i16),
        Value::Uint32A(items) => put_array!(w, items, put_u32),
        Value::Sint32A(items) => put_array!(w, items, put_i32),
        Value::Uint64A(items) => put_array!(w, items, put_u64),
        Value::Sint64A(items) => put_array!(w, items, put_i64),
        Value::Real32A(items) => put_array!(w, items, put_f32),
        Value::Real64A(items) => put_array!(w, items, put_f64),
        Value::StringA(items) => {
            w.put_len(items.len())?;
            for item in items {
                w.put_string(item)?;
            }
        }
        Value::InstanceA(records) => {
            w.put_len(records.len())?;
            for record in records {
                write_arg_map(w, record)?;
            }
        }
    }
    Ok(())
}

/// Writes `argc` then each present `(name, value)` pair.
///
/// Null values are skipped entirely and excluded from `argc`: omission is the
/// only way the format expresses "not supplied".
pub fn write_arg_map(w: &mut FrameWriter<'_>, map: &ArgMap) -> Result<(), ProtocolError> {
    let present = map.values().filter(|v| !v.is_null()).count();
    w.put_len(present)?;
    for (name, value) in map.iter().filter(|(_, v)| !v.is_null()) {
        w.put_string(name)?;
        write_value(w, value)?;
    }
    Ok(())
}

/// Reads one tagged value.
pub async fn read_value<R>(r: &mut FrameReader<R>) -> Result<Value, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    read_nested_value(r, 0).await
}

/// Reads `argc` then `argc` `(name, value)` pairs.
pub async fn read_arg_map<R>(r: &mut FrameReader<R>) -> Result<ArgMap, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    read_nested_arg_map(r, 0).await
}

/// Reads a value sitting inside `depth` enclosing records.
///
/// Boxed because record arrays nest argument maps recursively.
fn read_nested_value<'a, R>(
    r: &'a mut FrameReader<R>,
    depth: usize,
) -> BoxFuture<'a, Result<Value, ProtocolError>>
where
    R: AsyncRead + Unpin + Send,
{
    Box::pin(async move {
        let tag = r.read_u8().await?;
        let ty = ValueType::from_tag(tag & !NULL_FLAG)
            .map_err(|_| ProtocolError::UnsupportedType(tag))?;
        if tag & NULL_FLAG != 0 {
            return Ok(Value::Null(ty));
        }

        let value = match ty {
            ValueType::Boolean => Value::Boolean(r.read_bool().await?),
            ValueType::Uint8 => Value::Uint8(r.read_u8().await?),
            ValueType::Sint8 => Value::Sint8(r.read_i8().await?),
            ValueType::Uint16 => Value::Uint16(r.read_u16().await?),
            ValueType::Sint16 => Value::Sint16(r.read_i16().await?),
            ValueType::Uint32 => Value::Uint32(r.read_u32().await?),
            ValueType::Sint32 => Value::Sint32(r.read_i32().await?),
            ValueType::Uint64 => Value::Uint64(r.read_u64().await?),
            ValueType::Sint64 => Value::Sint64(r.read_i64().await?),
            ValueType::Real32 => Value::Real32(r.read_f32().await?),
            ValueType::Real64 => Value::Real64(r.read_f64().await?),
            ValueType::Char16 => Value::Char16(r.read_u16().await?),
            ValueType::String => Value::String(r.read_string().await?),
            ValueType::BooleanA => Value::BooleanA(read_array!(r, read_bool)),
            ValueType::Uint8A => Value::Uint8A(read_array!(r, read_u8)),
            ValueType::Sint8A => Value::Sint8A(read_array!(r, read_i8)),
            ValueType::Uint16A => Value::Uint16A(read_array!(r, read_u16)),
            ValueType::Sint16A => Value::Sint16A(read_array!(r, read_i16)),
            ValueType::Uint32A => Value::Uint32A(read_array!(r, read_u32)),
            ValueType::Sint32A => Value::Sint32A(read_array!(r, read_i32)),
            ValueType::Uint64A => Value::Uint64A(read_array!(r, read_u64)),
            ValueType::Sint64A => Value::Sint64A(read_array!(r, read_i64)),
            ValueType::Real32A => Value::Real32A(read_array!(r, read_f32)),
            ValueType::Real64A => Value::Real64A(read_array!(r, read_f64)),
            ValueType::Char16A => Value::Char16A(read_array!(r, read_u16)),
            ValueType::StringA => Value::StringA(read_array!(r, read_string)),
            ValueType::InstanceA => {
                let count = r.read_len().await?;
                if count > 0 && depth >= MAX_NESTING {
                    return Err(ProtocolError::TooDeep { max: MAX_NESTING });
                }
                let mut records = Vec::with_capacity(count.min(PREALLOC_LIMIT));
                for _ in 0..count {
                    records.push(read_nested_arg_map(r, depth + 1).await?);
                }
                Value::InstanceA(records)
            }
        };
        Ok(value)
    })
}

async fn read_nested_arg_map<R>(
    r: &mut FrameReader<R>,
    depth: usize,
) -> Result<ArgMap, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    let argc = r.read_len().await?;
    let mut map = ArgMap::with_capacity(argc.min(PREALLOC_LIMIT));
    for _ in 0..argc {
        let name = r.read_string().await?;
        let value = read_nested_value(r, depth).await?;
        tracing::trace!(%name, value_type = %value.value_type(), depth, "Decoded argument");
        map.insert(name, value);
    }
    Ok(map)
}
