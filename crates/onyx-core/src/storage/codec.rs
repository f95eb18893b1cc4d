//! Record codec for encoding/decoding attribute maps to/from bytes.

use crate::error::Error;
use onyx_proto::Value;
use std::collections::BTreeMap;

/// Attribute map of one stored record.
pub type Attributes = BTreeMap<String, Value>;

/// Type tag for encoded values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTag {
    Null = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    String = 5,
    Bytes = 6,
    Uuid = 7,
    Timestamp = 8,
}

impl TryFrom<u8> for ValueTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ValueTag::Null),
            1 => Ok(ValueTag::Bool),
            2 => Ok(ValueTag::Int32),
            3 => Ok(ValueTag::Int64),
            4 => Ok(ValueTag::Float64),
            5 => Ok(ValueTag::String),
            6 => Ok(ValueTag::Bytes),
            7 => Ok(ValueTag::Uuid),
            8 => Ok(ValueTag::Timestamp),
            _ => Err(Error::InvalidData(format!("Unknown value tag: {}", value))),
        }
    }
}

/// Bounds-checked reader over encoded bytes.
struct Reader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], Error> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::InvalidData(format!("Data too short for {}", what)))?;
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], Error> {
        let slice = self.take(N, what)?;
        <[u8; N]>::try_from(slice).map_err(|_| Error::InvalidData(format!("Bad {}", what)))
    }

    fn u8(&mut self, what: &str) -> Result<u8, Error> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn name(&mut self) -> Result<&'a str, Error> {
        let len = self.u16("field name length")? as usize;
        let bytes = self.take(len, "field name")?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidData("Invalid UTF-8 in field name".into()))
    }

    fn value(&mut self) -> Result<Value, Error> {
        let tag = ValueTag::try_from(self.u8("value tag")?)?;
        Ok(match tag {
            ValueTag::Null => Value::Null,
            ValueTag::Bool => Value::Bool(self.u8("bool")? != 0),
            ValueTag::Int32 => Value::Int32(i32::from_le_bytes(self.array("int32")?)),
            ValueTag::Int64 => Value::Int64(i64::from_le_bytes(self.array("int64")?)),
            ValueTag::Float64 => Value::Float64(f64::from_le_bytes(self.array("float64")?)),
            ValueTag::String => {
                let len = self.u32("string length")? as usize;
                let bytes = self.take(len, "string")?;
                Value::String(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| Error::InvalidData("Invalid UTF-8 in string".into()))?,
                )
            }
            ValueTag::Bytes => {
                let len = self.u32("bytes length")? as usize;
                Value::Bytes(self.take(len, "bytes")?.to_vec())
            }
            ValueTag::Uuid => Value::Uuid(self.array("uuid")?),
            ValueTag::Timestamp => Value::Timestamp(i64::from_le_bytes(self.array("timestamp")?)),
        })
    }

    fn skip_value(&mut self) -> Result<(), Error> {
        let tag = ValueTag::try_from(self.u8("value tag")?)?;
        let len = match tag {
            ValueTag::Null => 0,
            ValueTag::Bool => 1,
            ValueTag::Int32 => 4,
            ValueTag::Int64 | ValueTag::Float64 | ValueTag::Timestamp => 8,
            ValueTag::Uuid => 16,
            ValueTag::String | ValueTag::Bytes => self.u32("length")? as usize,
        };
        self.take(len, "value")?;
        Ok(())
    }
}

/// Encode an attribute map to bytes.
///
/// Format:
/// - Field count (4 bytes, little-endian)
/// - For each field:
///   - Field name length (2 bytes, little-endian)
///   - Field name (UTF-8 bytes)
///   - Value tag (1 byte)
///   - Value data (variable length, depends on type)
pub fn encode_record(attributes: &Attributes) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(attributes.len() as u32).to_le_bytes());

    for (name, value) in attributes {
        let name_bytes = name.as_bytes();
        let name_len = u16::try_from(name_bytes.len())
            .map_err(|_| Error::InvalidData("Field name too long".into()))?;
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name_bytes);
        encode_value(&mut buf, value)?;
    }

    Ok(buf)
}

/// Decode bytes back to an attribute map.
pub fn decode_record(data: &[u8]) -> Result<Attributes, Error> {
    let mut reader = Reader::new(data);
    let count = reader.u32("field count")?;
    let mut attributes = Attributes::new();
    for _ in 0..count {
        let name = reader.name()?.to_string();
        let value = reader.value()?;
        attributes.insert(name, value);
    }
    Ok(attributes)
}

/// Get a single field value by name without decoding the others.
pub fn get_field(data: &[u8], field_name: &str) -> Result<Option<Value>, Error> {
    let mut reader = Reader::new(data);
    let count = reader.u32("field count")?;
    for _ in 0..count {
        if reader.name()? == field_name {
            return reader.value().map(Some);
        }
        reader.skip_value()?;
    }
    Ok(None)
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), Error> {
    match value {
        Value::Null => buf.push(ValueTag::Null as u8),
        Value::Bool(b) => {
            buf.push(ValueTag::Bool as u8);
            buf.push(u8::from(*b));
        }
        Value::Int32(n) => {
            buf.push(ValueTag::Int32 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Int64(n) => {
            buf.push(ValueTag::Int64 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float64(n) => {
            buf.push(ValueTag::Float64 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(ValueTag::String as u8);
            write_len(buf, s.len())?;
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(ValueTag::Bytes as u8);
            write_len(buf, b.len())?;
            buf.extend_from_slice(b);
        }
        Value::Uuid(id) => {
            buf.push(ValueTag::Uuid as u8);
            buf.extend_from_slice(id);
        }
        Value::Timestamp(ts) => {
            buf.push(ValueTag::Timestamp as u8);
            buf.extend_from_slice(&ts.to_le_bytes());
        }
    }
    Ok(())
}

fn write_len(buf: &mut Vec<u8>, len: usize) -> Result<(), Error> {
    let len = u32::try_from(len).map_err(|_| Error::InvalidData("Value too long".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}
