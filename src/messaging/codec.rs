// OSC 1.0 wire codec
// Messages travel inside a one-element #bundle whose time tag carries the sample timestamp

use smallvec::SmallVec;
use std::borrow::Cow;
use thiserror::Error;

use super::message::{Argument, Message};

const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Deepest bundle nesting accepted by `decode_packet`
pub const MAX_BUNDLE_DEPTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet length {0} is not a multiple of 4")]
    Misaligned(usize),

    #[error("Packet truncated")]
    Truncated,

    #[error("String is not NUL terminated")]
    UnterminatedString,

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("Missing type tag string")]
    MissingTypeTags,

    #[error("Unknown type tag {0:?}")]
    UnknownTypeTag(char),

    #[error("Invalid bundle element size {0}")]
    BadElementSize(i32),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("Bundles nested more than 8 levels deep")]
    TooDeep,

    #[error("Expected exactly one message, found {0}")]
    UnexpectedMessageCount(usize),

    #[error("String argument contains NUL")]
    EmbeddedNul,

    #[error("Element of {0} bytes is too large to encode")]
    TooLarge(usize),
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn write_padded_str(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    if s.as_bytes().contains(&0) {
        return Err(ProtocolError::EmbeddedNul);
    }
    buf.extend_from_slice(s.as_bytes());
    let padded = pad4(s.len() + 1);
    buf.resize(buf.len() + padded - s.len(), 0);
    Ok(())
}

fn write_message(buf: &mut Vec<u8>, message: &Message) -> Result<(), ProtocolError> {
    if !message.address.starts_with('/') {
        return Err(ProtocolError::InvalidAddress(message.address.to_string()));
    }
    write_padded_str(buf, &message.address)?;

    // Type tags: ',' + one byte per argument, NUL terminated and padded
    let start = buf.len();
    buf.push(b',');
    buf.extend(message.args.iter().map(Argument::type_tag));
    let written = buf.len() - start;
    buf.resize(start + pad4(written + 1), 0);

    for arg in &message.args {
        match arg {
            Argument::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Argument::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Argument::Str(s) => write_padded_str(buf, s)?,
            Argument::Blob(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| ProtocolError::TooLarge(bytes.len()))?;
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(bytes);
                buf.resize(buf.len() + pad4(bytes.len()) - bytes.len(), 0);
            }
            Argument::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Argument::Double(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Argument::Bool(_) | Argument::Nil => {}
        }
    }

    Ok(())
}

/// Encode a message as a single-element bundle into `buf` (cleared first)
pub fn encode_into(message: &Message, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    buf.clear();
    buf.extend_from_slice(BUNDLE_TAG);
    buf.extend_from_slice(&message.timestamp.to_be_bytes());

    let size_at = buf.len();
    buf.extend_from_slice(&[0; 4]);
    write_message(buf, message)?;

    let size = buf.len() - size_at - 4;
    let size = i32::try_from(size).map_err(|_| ProtocolError::TooLarge(size))?;
    buf[size_at..size_at + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

/// Encode a message as a single-element bundle
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    encode_into(message, &mut buf)?;
    Ok(buf)
}

/// Encode a bare message (no bundle, timestamp not transmitted)
pub fn encode_bare(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    write_message(&mut buf, message)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated);
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn padded_str(&mut self) -> Result<&'a str, ProtocolError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedString)?;
        let padded = pad4(nul + 1);
        if padded > rest.len() {
            return Err(ProtocolError::Truncated);
        }
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| ProtocolError::InvalidUtf8)?;
        self.pos += padded;
        Ok(s)
    }
}

fn read_message(data: &[u8], timestamp: u64) -> Result<Message, ProtocolError> {
    let mut reader = Reader::new(data);

    let address = reader.padded_str()?;
    if !address.starts_with('/') {
        return Err(ProtocolError::InvalidAddress(address.to_string()));
    }

    if reader.remaining() == 0 {
        return Err(ProtocolError::MissingTypeTags);
    }
    let tags = reader.padded_str()?;
    let tags = tags.strip_prefix(',').ok_or(ProtocolError::MissingTypeTags)?;

    let mut args = SmallVec::new();
    for tag in tags.bytes() {
        let arg = match tag {
            b'i' => Argument::Int(reader.i32()?),
            b'f' => Argument::Float(f32::from_bits(u32::from_be_bytes(reader.array()?))),
            b's' => Argument::Str(Cow::Owned(reader.padded_str()?.to_string())),
            b'b' => {
                let len = reader.i32()?;
                let len = usize::try_from(len).map_err(|_| ProtocolError::BadElementSize(len))?;
                let bytes = reader.take(len)?.to_vec();
                reader.take(pad4(len) - len)?;
                Argument::Blob(bytes)
            }
            b'h' => Argument::Long(i64::from_be_bytes(reader.array()?)),
            b'd' => Argument::Double(f64::from_bits(u64::from_be_bytes(reader.array()?))),
            b'T' => Argument::Bool(true),
            b'F' => Argument::Bool(false),
            b'N' => Argument::Nil,
            other => return Err(ProtocolError::UnknownTypeTag(other as char)),
        };
        args.push(arg);
    }

    if reader.remaining() != 0 {
        return Err(ProtocolError::TrailingBytes(reader.remaining()));
    }

    Ok(Message {
        address: Cow::Owned(address.to_string()),
        args,
        timestamp,
    })
}

fn read_packet(data: &[u8], timestamp: u64, depth: usize, out: &mut Vec<Message>) -> Result<(), ProtocolError> {
    if data.len() % 4 != 0 {
        return Err(ProtocolError::Misaligned(data.len()));
    }

    if !data.starts_with(BUNDLE_TAG) {
        out.push(read_message(data, timestamp)?);
        return Ok(());
    }

    if depth >= MAX_BUNDLE_DEPTH {
        return Err(ProtocolError::TooDeep);
    }

    let mut reader = Reader::new(data);
    reader.take(BUNDLE_TAG.len())?;
    let time_tag = reader.u64()?;

    while reader.remaining() > 0 {
        let size = reader.i32()?;
        if size < 0 || size % 4 != 0 {
            return Err(ProtocolError::BadElementSize(size));
        }
        let element = reader
            .take(size as usize)
            .map_err(|_| ProtocolError::BadElementSize(size))?;
        read_packet(element, time_tag, depth + 1, out)?;
    }

    Ok(())
}

/// Decode every message in a packet, flattening nested bundles.
/// Messages inherit the time tag of their innermost bundle; bare messages get 0.
pub fn decode_packet(data: &[u8]) -> Result<Vec<Message>, ProtocolError> {
    let mut out = Vec::new();
    read_packet(data, 0, 0, &mut out)?;
    Ok(out)
}

/// Decode a bare message or a bundle holding exactly one message
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let mut messages = decode_packet(data)?;
    if messages.len() != 1 {
        return Err(ProtocolError::UnexpectedMessageCount(messages.len()));
    }
    messages.pop().ok_or(ProtocolError::UnexpectedMessageCount(0))
}
