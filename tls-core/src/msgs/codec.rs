//! Canonical big-endian wire encoding shared by every message in `msgs`.

use crate::error::CodecError;

/// A growable byte sink that message types serialize themselves into.
pub trait Codec: Sized {
  fn encode(&self, bytes: &mut Vec<u8>);

  fn decode(r: &mut Reader) -> Result<Self, CodecError>;

  fn get_encoding(&self) -> Vec<u8> {
    let mut bytes = Vec::new();
    self.encode(&mut bytes);
    bytes
  }
}

/// A cursor over an immutable byte slice with bounds-checked reads.
pub struct Reader<'a> {
  buf: &'a [u8],
  offset: usize,
}

impl<'a> Reader<'a> {
  pub fn init(buf: &'a [u8]) -> Self { Self { buf, offset: 0 } }

  pub fn rest(&self) -> &'a [u8] { &self.buf[self.offset..] }

  pub fn remaining(&self) -> usize { self.buf.len() - self.offset }

  pub fn used(&self) -> usize { self.offset }

  pub fn any_left(&self) -> bool { self.offset < self.buf.len() }

  pub fn expect_exhausted(&self) -> Result<(), CodecError> {
    if self.any_left() { Err(CodecError::TrailingData) } else { Ok(()) }
  }

  pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
    if self.remaining() < len {
      return Err(CodecError::UnexpectedEof);
    }
    let slice = &self.buf[self.offset..self.offset + len];
    self.offset += len;
    Ok(slice)
  }

  pub fn take_u8(&mut self) -> Result<u8, CodecError> { Ok(self.take(1)?[0]) }

  pub fn take_u16(&mut self) -> Result<u16, CodecError> {
    let b = self.take(2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
  }

  pub fn take_u24(&mut self) -> Result<u32, CodecError> {
    let b = self.take(3)?;
    Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
  }

  pub fn take_u48(&mut self) -> Result<u64, CodecError> {
    let b = self.take(6)?;
    Ok(b.iter().fold(0u64, |acc, &byte| (acc << 8) | byte as u64))
  }

  pub fn take_u64(&mut self) -> Result<u64, CodecError> {
    let b = self.take(8)?;
    Ok(u64::from_be_bytes(b.try_into().unwrap()))
  }

  /// Reads a sub-slice whose length is itself a `len_size`-byte big-endian prefix.
  pub fn take_vec(&mut self, len_size: usize) -> Result<&'a [u8], CodecError> {
    let len = match len_size {
      1 => self.take_u8()? as usize,
      2 => self.take_u16()? as usize,
      3 => self.take_u24()? as usize,
      _ => unreachable!("length prefixes are 1, 2 or 3 bytes in this protocol"),
    };
    self.take(len)
  }

  /// Returns a bounded sub-reader over exactly `len` bytes and advances past them.
  pub fn sub(&mut self, len: usize) -> Result<Reader<'a>, CodecError> {
    Ok(Reader::init(self.take(len)?))
  }
}

pub fn put_u16(v: u16, bytes: &mut Vec<u8>) { bytes.extend_from_slice(&v.to_be_bytes()); }

pub fn put_u24(v: u32, bytes: &mut Vec<u8>) {
  let b = v.to_be_bytes();
  bytes.extend_from_slice(&b[1..4]);
}

pub fn put_u48(v: u64, bytes: &mut Vec<u8>) {
  let b = v.to_be_bytes();
  bytes.extend_from_slice(&b[2..8]);
}

pub fn put_u64(v: u64, bytes: &mut Vec<u8>) { bytes.extend_from_slice(&v.to_be_bytes()); }

/// Encodes `body` preceded by a `len_size`-byte big-endian length prefix.
pub fn encode_vec_u8(len_size: usize, body: &[u8], out: &mut Vec<u8>) {
  match len_size {
    1 => out.push(body.len() as u8),
    2 => put_u16(body.len() as u16, out),
    3 => put_u24(body.len() as u32, out),
    _ => unreachable!("length prefixes are 1, 2 or 3 bytes in this protocol"),
  }
  out.extend_from_slice(body);
}

/// Encodes a list of `Codec` items preceded by a `len_size`-byte byte-length prefix
/// (not an item count, per RFC 5246 vector framing).
pub fn encode_vec<T: Codec>(len_size: usize, items: &[T], out: &mut Vec<u8>) {
  let mut body = Vec::new();
  for item in items {
    item.encode(&mut body);
  }
  encode_vec_u8(len_size, &body, out);
}

pub fn read_vec<T: Codec>(r: &mut Reader, len_size: usize) -> Result<Vec<T>, CodecError> {
  let bytes = r.take_vec(len_size)?;
  let mut sub = Reader::init(bytes);
  let mut out = Vec::new();
  while sub.any_left() {
    out.push(T::decode(&mut sub)?);
  }
  Ok(out)
}
