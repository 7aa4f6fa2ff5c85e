//! OSC 1.0 binary layout.
//!
//! Every atom is big-endian and every variable-length item is NUL padded to a
//! multiple of four bytes, so encoded packets are always 4-byte aligned.

use crate::error::{OscError, Result};
use crate::osc::timetag::TimeTag;
use crate::osc::types::{Arg, Blob, Bundle, Message, Packet};

pub const BUNDLE_TAG: &str = "#bundle";

/// How deep bundles may nest inside one packet. The outermost bundle is at
/// depth 0.
pub const MAX_BUNDLE_DEPTH: usize = 32;

fn pad(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// Writes `s` up to its first NUL, a terminator, and padding. The padding is
/// relative to the start of `buf`, which is always an item boundary.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    buf.extend_from_slice(&bytes[..end]);
    buf.push(0);
    pad(buf);
}

fn write_blob(buf: &mut Vec<u8>, blob: &Blob) {
    buf.extend_from_slice(&(blob.len() as u32).to_be_bytes());
    buf.extend_from_slice(blob.as_bytes());
    pad(buf);
}

fn write_timetag(buf: &mut Vec<u8>, tag: TimeTag) {
    buf.extend_from_slice(&tag.seconds().to_be_bytes());
    buf.extend_from_slice(&tag.fraction().to_be_bytes());
}

fn write_arg(buf: &mut Vec<u8>, arg: &Arg) {
    match arg {
        Arg::Int(i) => buf.extend_from_slice(&i.to_be_bytes()),
        Arg::Float(f) => buf.extend_from_slice(&f.to_be_bytes()),
        Arg::String(s) => write_string(buf, s),
        Arg::Blob(b) => write_blob(buf, b),
        Arg::TimeTag(t) => write_timetag(buf, *t),
    }
}

fn write_message(buf: &mut Vec<u8>, msg: &Message) {
    write_string(buf, msg.address());
    write_string(buf, &format!(",{}", msg.types()));
    for arg in msg.args() {
        write_arg(buf, arg);
    }
}

fn write_bundle(buf: &mut Vec<u8>, bundle: &Bundle) {
    write_string(buf, BUNDLE_TAG);
    write_timetag(buf, bundle.timetag());
    for element in bundle.elements() {
        let encoded = encode(element);
        buf.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        buf.extend_from_slice(&encoded);
    }
}

/// Encodes a single atom on its own.
pub fn encode_arg(arg: &Arg) -> Vec<u8> {
    let mut buf = Vec::new();
    write_arg(&mut buf, arg);
    buf
}

pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.address().len() + 8 + msg.args().len() * 4);
    write_message(&mut buf, msg);
    buf
}

pub fn encode_bundle(bundle: &Bundle) -> Vec<u8> {
    let mut buf = Vec::new();
    write_bundle(&mut buf, bundle);
    buf
}

pub fn encode(packet: &Packet) -> Vec<u8> {
    match packet {
        Packet::Message(m) => encode_message(m),
        Packet::Bundle(b) => encode_bundle(b),
    }
}

/// Rejects addresses that do not start with `/`, including the empty one.
pub fn validate_address(address: &str) -> Result<()> {
    if address.starts_with('/') {
        Ok(())
    } else {
        Err(OscError::malformed(format!(
            "address '{address}' does not start with '/'"
        )))
    }
}

/// Checks that `packet` can go on the wire and be decoded again: every
/// address is valid and bundles nest no deeper than [`MAX_BUNDLE_DEPTH`].
pub fn validate(packet: &Packet) -> Result<()> {
    let mut pending = vec![(packet, 0)];
    while let Some((packet, depth)) = pending.pop() {
        match packet {
            Packet::Message(msg) => validate_address(msg.address())?,
            Packet::Bundle(bundle) => {
                check_depth(depth)?;
                pending.extend(bundle.elements().iter().map(|e| (e, depth + 1)));
            }
        }
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<()> {
    if depth >= MAX_BUNDLE_DEPTH {
        return Err(OscError::malformed("bundle nesting too deep"));
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(OscError::malformed(format!(
                "{what} needs {n} bytes at offset {} but only {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        self.take(n, what).map(|_| ())
    }

    // Trailing padding that runs past the end of the input is tolerated.
    fn skip_padding(&mut self) {
        let aligned = (self.pos + 3) & !3;
        self.pos = aligned.min(self.buf.len());
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.read_u32("int32").map(|v| v as i32)
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.read_u32("float32").map(f32::from_bits)
    }

    fn read_str(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| OscError::malformed(format!("unterminated string at offset {}", self.pos)))?;
        let s = std::str::from_utf8(&rest[..len])
            .map_err(|e| OscError::malformed(format!("string at offset {} is not UTF-8: {e}", self.pos)))?;
        self.pos += len + 1;
        self.skip_padding();
        Ok(s)
    }

    fn read_blob(&mut self) -> Result<Blob> {
        let len = self.read_u32("blob length")? as usize;
        let bytes = self.take(len, "blob")?;
        self.skip_padding();
        Ok(Blob::new(bytes))
    }

    fn read_timetag(&mut self) -> Result<TimeTag> {
        let seconds = self.read_u32("timetag")?;
        let fraction = self.read_u32("timetag")?;
        Ok(TimeTag::new(seconds, fraction))
    }
}

/// Decodes one packet.
///
/// An empty input decodes to an argument-less message addressed to `/`. This
/// tolerance is kept for compatibility with peers that send empty datagrams.
///
/// Bundles nested deeper than [`MAX_BUNDLE_DEPTH`] are `MalformedPacket`.
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    decode_at(bytes, 0)
}

fn decode_at(bytes: &[u8], depth: usize) -> Result<Packet> {
    if bytes.is_empty() {
        return Ok(Message::new("/").into());
    }
    let mut reader = Reader::new(bytes);
    let head = reader.read_str()?;
    if head == BUNDLE_TAG {
        check_depth(depth)?;
        decode_bundle(&mut reader, depth).map(Packet::Bundle)
    } else if head.starts_with('/') {
        decode_message(head, &mut reader).map(Packet::Message)
    } else {
        Err(OscError::malformed(format!(
            "packet starts with '{head}', expected an address or {BUNDLE_TAG}"
        )))
    }
}

fn decode_bundle(reader: &mut Reader<'_>, depth: usize) -> Result<Bundle> {
    let mut bundle = Bundle::new(reader.read_timetag()?);
    while !reader.is_empty() {
        let len = reader.read_u32("bundle element length")? as usize;
        let element = reader.take(len, "bundle element")?;
        bundle.push(decode_at(element, depth + 1)?);
    }
    Ok(bundle)
}

fn decode_message(address: &str, reader: &mut Reader<'_>) -> Result<Message> {
    let mut msg = Message::new(address);
    // Very old peers omit the type-tag string entirely; such messages have
    // no decodable arguments.
    if reader.peek() != Some(b',') {
        return Ok(msg);
    }
    reader.pos += 1;
    let tags = reader.read_str()?;
    for tag in tags.chars() {
        match tag {
            'i' => msg.push(reader.read_i32()?),
            'f' => msg.push(reader.read_f32()?),
            's' => msg.push(reader.read_str()?),
            'b' => msg.push(reader.read_blob()?),
            // Extended types are stepped over, not materialized.
            'h' | 't' | 'd' => reader.skip(8, "8-byte argument")?,
            'S' => {
                reader.read_str()?;
            }
            'c' | 'r' | 'm' => reader.skip(4, "4-byte argument")?,
            'T' | 'F' | 'N' | 'I' | '[' | ']' => {}
            other => log::debug!("ignoring unknown type tag '{other}' in {address}"),
        }
    }
    Ok(msg)
}
