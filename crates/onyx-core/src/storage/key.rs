//! Order-preserving key encoding.
//!
//! Identifier and index keys are compared bytewise by sled, so the encoding
//! must sort like [`Value::compare`] within a type and be prefix-free, which
//! lets a reference be appended to an encoded value without breaking range
//! scans.
//!
//! Layout: `[tag:1][payload]`
//! - Null: no payload
//! - Bool: one byte
//! - Int32 / Int64: widened to i64, big-endian with the sign bit flipped
//! - Float64: IEEE bits, negatives inverted, positives sign-flipped
//! - Timestamp: like integers
//! - String / Bytes: `0x00` escaped as `0x00 0xFF`, terminated by `0x00 0x00`
//! - Uuid: 16 raw bytes

use crate::error::Error;
use crate::reference::Reference;
use onyx_proto::Value;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_TIMESTAMP: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_UUID: u8 = 0x07;

/// Size of an encoded reference.
pub const REFERENCE_SIZE: usize = 8;

/// Encode a value into `buf`.
pub fn encode_value_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        Value::Int32(n) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&sortable_i64(*n as i64));
        }
        Value::Int64(n) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&sortable_i64(*n));
        }
        Value::Float64(f) => {
            buf.push(TAG_FLOAT);
            // -0.0 and 0.0 compare equal, so they share one key
            let f = if *f == 0.0 { 0.0 } else { *f };
            let bits = f.to_bits();
            let sortable = if bits & 0x8000_0000_0000_0000 != 0 {
                !bits
            } else {
                bits ^ 0x8000_0000_0000_0000
            };
            buf.extend_from_slice(&sortable.to_be_bytes());
        }
        Value::Timestamp(ts) => {
            buf.push(TAG_TIMESTAMP);
            buf.extend_from_slice(&sortable_i64(*ts));
        }
        Value::String(s) => {
            buf.push(TAG_STRING);
            escape_into(s.as_bytes(), buf);
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            escape_into(b, buf);
        }
        Value::Uuid(id) => {
            buf.push(TAG_UUID);
            buf.extend_from_slice(id);
        }
    }
}

/// Encode a value into a fresh buffer.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_into(value, &mut buf);
    buf
}

/// Decode a value, returning it and the number of bytes consumed.
pub fn decode_value(bytes: &[u8]) -> Result<(Value, usize), Error> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| Error::InvalidData("empty key".into()))?;
    let (value, used) = match tag {
        TAG_NULL => (Value::Null, 0),
        TAG_BOOL => {
            let b = *rest
                .first()
                .ok_or_else(|| Error::InvalidData("truncated bool key".into()))?;
            (Value::Bool(b != 0), 1)
        }
        TAG_INT => (Value::Int64(unsortable_i64(rest)?), 8),
        TAG_FLOAT => {
            let sortable = u64::from_be_bytes(fixed(rest)?);
            let bits = if sortable & 0x8000_0000_0000_0000 != 0 {
                sortable ^ 0x8000_0000_0000_0000
            } else {
                !sortable
            };
            (Value::Float64(f64::from_bits(bits)), 8)
        }
        TAG_TIMESTAMP => (Value::Timestamp(unsortable_i64(rest)?), 8),
        TAG_STRING => {
            let (raw, used) = unescape(rest)?;
            let s = String::from_utf8(raw)
                .map_err(|_| Error::InvalidData("invalid UTF-8 in key".into()))?;
            (Value::String(s), used)
        }
        TAG_BYTES => {
            let (raw, used) = unescape(rest)?;
            (Value::Bytes(raw), used)
        }
        TAG_UUID => (Value::Uuid(fixed(rest)?), 16),
        other => {
            return Err(Error::InvalidData(format!("unknown key tag: {}", other)));
        }
    };
    Ok((value, used + 1))
}

/// Encode a reference so that byte order matches numeric order.
pub fn encode_reference(reference: Reference) -> [u8; REFERENCE_SIZE] {
    sortable_i64(reference)
}

/// Decode a reference produced by [`encode_reference`].
pub fn decode_reference(bytes: &[u8]) -> Result<Reference, Error> {
    unsortable_i64(bytes)
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Half-open key range `[start, end)` holding every key whose leading value
/// compares above or below `value`, restricted to values of the same type.
pub fn comparison_range(value: &Value, above: bool, inclusive: bool) -> (Vec<u8>, Vec<u8>) {
    let encoded = encode_value(value);
    let tag = encoded[0];
    let type_start = vec![tag];
    let type_end = vec![tag + 1];
    let after_value = prefix_end(&encoded).unwrap_or_else(|| type_end.clone());
    match (above, inclusive) {
        (true, true) => (encoded, type_end),
        (true, false) => (after_value, type_end),
        (false, true) => (type_start, after_value),
        (false, false) => (type_start, encoded),
    }
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn sortable_i64(n: i64) -> [u8; 8] {
    ((n as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

fn unsortable_i64(bytes: &[u8]) -> Result<i64, Error> {
    Ok((u64::from_be_bytes(fixed(bytes)?) ^ 0x8000_0000_0000_0000) as i64)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], Error> {
    bytes
        .get(..N)
        .and_then(|b| <[u8; N]>::try_from(b).ok())
        .ok_or_else(|| Error::InvalidData(format!("key shorter than {} bytes", N)))
}

fn escape_into(raw: &[u8], buf: &mut Vec<u8>) {
    for &byte in raw {
        buf.push(byte);
        if byte == 0x00 {
            buf.push(0xFF);
        }
    }
    buf.extend_from_slice(&[0x00, 0x00]);
}

fn unescape(bytes: &[u8]) -> Result<(Vec<u8>, usize), Error> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == 0x00 {
            match bytes.get(i + 1) {
                Some(0x00) => return Ok((out, i + 2)),
                Some(0xFF) => {
                    out.push(0x00);
                    i += 2;
                    continue;
                }
                _ => break,
            }
        }
        out.push(byte);
        i += 1;
    }
    Err(Error::InvalidData("unterminated key segment".into()))
}
