//! Wire framing and the UBJSON-like value encoding carried inside each
//! frame.
//!
//! Framing: `00 01` start, `00 02` end, literal `0x00` escaped as `00 00`.
//! `00 03`/`00 04` are the one-off PING/PONG heartbeat sequences. Any other
//! `00 XX` on the receive path is a protocol violation.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const START: [u8; 2] = [0x00, 0x01];
pub const END: [u8; 2] = [0x00, 0x02];
pub const PING: [u8; 2] = [0x00, 0x03];
pub const PONG: [u8; 2] = [0x00, 0x04];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Escapes literal `0x00` bytes and wraps the result in start/end markers.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(&START);
    for &b in payload {
        out.push(b);
        if b == 0x00 {
            out.push(0x00);
        }
    }
    out.extend_from_slice(&END);
    out
}

/// One complete parse result from the receive stream.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Payload(Vec<u8>),
    Ping,
    Pong,
}

/// Incrementally reassembles frames from a byte stream, handling the
/// `0x00`-escape one byte of lookahead at a time.
#[derive(Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

enum ReadState {
    AwaitStart,
    InFrame,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader { buf: Vec::new() }
    }

    /// Feeds newly-received bytes in and drains any frames that became
    /// complete. Bytes that don't yet form a complete frame are buffered.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        loop {
            match self.try_take_one()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }

    fn try_take_one(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < 2 || self.buf[0] != 0x00 {
            return Ok(None);
        }
        match self.buf[1] {
            0x01 => {} // start marker, continue below
            0x03 => {
                self.buf.drain(0..2);
                return Ok(Some(Frame::Ping));
            }
            0x04 => {
                self.buf.drain(0..2);
                return Ok(Some(Frame::Pong));
            }
            0x00 | 0x02 => {
                return Err(Error::InvalidEncoding(format!(
                    "unexpected 00 {:02x} outside a frame",
                    self.buf[1]
                )))
            }
            other => return Err(Error::InvalidEncoding(format!("unknown marker 00 {other:02x}"))),
        }

        let mut i = 2;
        let mut payload = Vec::new();
        while i < self.buf.len() {
            if self.buf[i] == 0x00 {
                if i + 1 >= self.buf.len() {
                    return Ok(None); // need more data to disambiguate
                }
                match self.buf[i + 1] {
                    0x00 => {
                        payload.push(0x00);
                        i += 2;
                    }
                    0x02 => {
                        let total = i + 2;
                        self.buf.drain(0..total);
                        return Ok(Some(Frame::Payload(payload)));
                    }
                    other => {
                        return Err(Error::InvalidEncoding(format!(
                            "unexpected 00 {other:02x} inside frame payload"
                        )))
                    }
                }
            } else {
                payload.push(self.buf[i]);
                i += 1;
            }
        }
        Ok(None)
    }
}

// --- UBJSON-like value encoding -------------------------------------------

const TAG_NULL: u8 = b'Z';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT: u8 = b'L';
const TAG_FLOAT: u8 = b'D';
const TAG_STR: u8 = b'S';
const TAG_BYTES: u8 = b'B';
const TAG_ARRAY_START: u8 = b'[';
const TAG_ARRAY_END: u8 = b']';
const TAG_OBJECT_START: u8 = b'{';
const TAG_OBJECT_END: u8 = b'}';

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STR);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u32).to_be_bytes());
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY_START);
            for item in items {
                encode_into(item, out);
            }
            out.push(TAG_ARRAY_END);
        }
        Value::Object(map) => {
            out.push(TAG_OBJECT_START);
            for (k, v) in map {
                out.push(TAG_STR);
                out.extend_from_slice(&(k.len() as u32).to_be_bytes());
                out.extend_from_slice(k.as_bytes());
                encode_into(v, out);
            }
            out.push(TAG_OBJECT_END);
        }
    }
}

pub fn decode(data: &[u8]) -> Result<Value> {
    let mut pos = 0;
    let value = decode_one(data, &mut pos)?;
    Ok(value)
}

fn take(data: &[u8], pos: &mut usize, n: usize) -> Result<&[u8]> {
    if *pos + n > data.len() {
        return Err(Error::InvalidEncoding("truncated value".into()));
    }
    let out = &data[*pos..*pos + n];
    *pos += n;
    Ok(out)
}

fn decode_one(data: &[u8], pos: &mut usize) -> Result<Value> {
    let tag = *take(data, pos, 1)?.first().unwrap();
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_INT => {
            let b = take(data, pos, 8)?;
            Ok(Value::Int(i64::from_be_bytes(b.try_into().unwrap())))
        }
        TAG_FLOAT => {
            let b = take(data, pos, 8)?;
            Ok(Value::Float(f64::from_be_bytes(b.try_into().unwrap())))
        }
        TAG_STR => {
            let len = u32::from_be_bytes(take(data, pos, 4)?.try_into().unwrap()) as usize;
            let s = take(data, pos, len)?;
            Ok(Value::Str(
                String::from_utf8(s.to_vec()).map_err(|e| Error::InvalidEncoding(e.to_string()))?,
            ))
        }
        TAG_BYTES => {
            let len = u32::from_be_bytes(take(data, pos, 4)?.try_into().unwrap()) as usize;
            let b = take(data, pos, len)?;
            Ok(Value::Bytes(b.to_vec()))
        }
        TAG_ARRAY_START => {
            let mut items = Vec::new();
            loop {
                if data.get(*pos) == Some(&TAG_ARRAY_END) {
                    *pos += 1;
                    break;
                }
                items.push(decode_one(data, pos)?);
            }
            Ok(Value::Array(items))
        }
        TAG_OBJECT_START => {
            let mut map = BTreeMap::new();
            loop {
                if data.get(*pos) == Some(&TAG_OBJECT_END) {
                    *pos += 1;
                    break;
                }
                let key = match decode_one(data, pos)? {
                    Value::Str(s) => s,
                    _ => return Err(Error::InvalidEncoding("object key must be a string".into())),
                };
                let value = decode_one(data, pos)?;
                map.insert(key, value);
            }
            Ok(Value::Object(map))
        }
        other => Err(Error::InvalidEncoding(format!("unknown value tag 0x{other:02x}"))),
    }
}

/// Convenience builder for `{ "<op>": { ... } }` requests.
pub fn request(op: &str, fields: BTreeMap<String, Value>) -> Value {
    let mut top = BTreeMap::new();
    top.insert(op.to_string(), Value::Object(fields));
    Value::Object(top)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_single_zero_byte_frame() {
        let encoded = frame(&[0x00]);
        assert_eq!(encoded, vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x02]);
        let mut reader = FrameReader::new();
        let frames = reader.feed(&encoded).unwrap();
        assert_eq!(frames, vec![Frame::Payload(vec![0x00])]);
    }

    #[test]
    fn frame_roundtrip_arbitrary_bytes() {
        let payload: Vec<u8> = (0..=255).collect();
        let encoded = frame(&payload);
        let mut reader = FrameReader::new();
        let frames = reader.feed(&encoded).unwrap();
        assert_eq!(frames, vec![Frame::Payload(payload)]);
    }

    #[test]
    fn heartbeat_sequences_round_trip() {
        let mut reader = FrameReader::new();
        let frames = reader.feed(&[0x00, 0x03, 0x00, 0x04]).unwrap();
        assert_eq!(frames, vec![Frame::Ping, Frame::Pong]);
    }

    #[test]
    fn partial_frame_is_buffered() {
        let mut reader = FrameReader::new();
        assert!(reader.feed(&[0x00, 0x01, 0x01, 0x02]).unwrap().is_empty());
        let frames = reader.feed(&[0x00, 0x02]).unwrap();
        assert_eq!(frames, vec![Frame::Payload(vec![0x01, 0x02])]);
    }

    #[test]
    fn value_roundtrip() {
        let mut obj = BTreeMap::new();
        obj.insert("frequency".to_string(), Value::Int(868_100_000));
        obj.insert("payload".to_string(), Value::Bytes(vec![1, 2, 3]));
        let value = Value::Object(obj);
        let encoded = encode(&value);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
