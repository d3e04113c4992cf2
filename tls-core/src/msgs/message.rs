//! The record envelope: `TLSPlaintext`/`TLSCiphertext` (and their DTLS
//! counterparts), alert bodies, and the one-byte ChangeCipherSpec message.

use crate::error::CodecError;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{AlertDescription, AlertLevel, ContentType, ProtocolVersion};

/// Maximum plaintext payload per record (2^14), per RFC 5246 §6.2.1.
pub const MAX_FRAGMENT_LEN: usize = 1 << 14;
/// Ciphertext may grow by at most this much over the plaintext bound before
/// `RecordOverflow` is raised on receive (§4.1).
pub const MAX_CIPHERTEXT_OVERHEAD: usize = 2048;

/// A record's sequencing metadata. TLS uses a 64-bit counter implicit to the
/// epoch; DTLS carries a 16-bit epoch and 48-bit sequence number on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSequence {
  pub epoch: u16,
  pub sequence: u64,
}

impl RecordSequence {
  pub fn zero() -> Self { Self { epoch: 0, sequence: 0 } }

  /// The 8-byte `seq_num` field MAC/AEAD inputs are computed over: for TLS,
  /// the bare 64-bit counter; for DTLS, `epoch || 48-bit sequence`.
  pub fn as_mac_input_dtls(&self) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..2].copy_from_slice(&self.epoch.to_be_bytes());
    out[2..8].copy_from_slice(&self.sequence.to_be_bytes()[2..8]);
    out
  }

  pub fn as_mac_input_tls(&self) -> [u8; 8] { self.sequence.to_be_bytes() }
}

/// An unencrypted record body paired with its content type and version —
/// what the record layer hands to/receives from the cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainMessage {
  pub typ: ContentType,
  pub version: ProtocolVersion,
  pub payload: Vec<u8>,
}

/// An encrypted (or null-cipher) record body as it appears on the wire,
/// including any explicit IV prefix and authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueMessage {
  pub typ: ContentType,
  pub version: ProtocolVersion,
  pub payload: Vec<u8>,
}

impl OpaqueMessage {
  /// Reads one record header + body from `r`, given whether DTLS framing
  /// (2-byte epoch + 6-byte sequence) or TLS framing (no sequence, implicit)
  /// applies. Returns the parsed message and, for DTLS, the sequence field.
  pub fn read_tls(r: &mut Reader) -> Result<Self, CodecError> {
    let typ = ContentType::decode(r)?;
    let version = ProtocolVersion::decode(r)?;
    let len = r.take_u16()? as usize;
    if len > MAX_FRAGMENT_LEN + MAX_CIPHERTEXT_OVERHEAD {
      return Err(CodecError::SizeExceeded("record payload exceeds maximum ciphertext length".into()));
    }
    let payload = r.take(len)?.to_vec();
    Ok(Self { typ, version, payload })
  }

  pub fn write_tls(&self, out: &mut Vec<u8>) {
    self.typ.encode(out);
    self.version.encode(out);
    crate::msgs::codec::put_u16(self.payload.len() as u16, out);
    out.extend_from_slice(&self.payload);
  }

  /// DTLS adds a 2-byte epoch + 6-byte sequence number between version and
  /// length (RFC 6347 §4.1).
  pub fn read_dtls(r: &mut Reader) -> Result<(Self, RecordSequence), CodecError> {
    let typ = ContentType::decode(r)?;
    let version = ProtocolVersion::decode(r)?;
    let epoch = r.take_u16()?;
    let sequence = r.take_u48()?;
    let len = r.take_u16()? as usize;
    if len > MAX_FRAGMENT_LEN + MAX_CIPHERTEXT_OVERHEAD {
      return Err(CodecError::SizeExceeded("record payload exceeds maximum ciphertext length".into()));
    }
    let payload = r.take(len)?.to_vec();
    Ok((Self { typ, version, payload }, RecordSequence { epoch, sequence }))
  }

  pub fn write_dtls(&self, seq: RecordSequence, out: &mut Vec<u8>) {
    self.typ.encode(out);
    self.version.encode(out);
    out.extend_from_slice(&seq.epoch.to_be_bytes());
    crate::msgs::codec::put_u48(seq.sequence, out);
    crate::msgs::codec::put_u16(self.payload.len() as u16, out);
    out.extend_from_slice(&self.payload);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertMessage {
  pub level: AlertLevel,
  pub description: AlertDescription,
}

impl Codec for AlertMessage {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.level.encode(bytes);
    self.description.encode(bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let level = AlertLevel::decode(r)?;
    let description = AlertDescription::decode(r)?;
    r.expect_exhausted()?;
    Ok(Self { level, description })
  }
}

/// ChangeCipherSpec is a single byte carrying the constant value 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeCipherSpecMessage;

impl Codec for ChangeCipherSpecMessage {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.push(1); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let v = r.take_u8()?;
    r.expect_exhausted()?;
    if v != 1 {
      return Err(CodecError::InvalidValue("ChangeCipherSpec body must be 1".into()));
    }
    Ok(Self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn alert_round_trips() {
    let msg = AlertMessage { level: AlertLevel::Fatal, description: AlertDescription::BadRecordMac };
    let bytes = msg.get_encoding();
    let mut r = Reader::init(&bytes);
    assert_eq!(AlertMessage::decode(&mut r).unwrap(), msg);
  }

  #[test]
  fn oversized_record_rejected() {
    let mut bytes = vec![23u8, 3, 3];
    bytes.extend_from_slice(&((MAX_FRAGMENT_LEN + MAX_CIPHERTEXT_OVERHEAD + 1) as u16).to_be_bytes());
    let mut r = Reader::init(&bytes);
    assert!(OpaqueMessage::read_tls(&mut r).is_err());
  }
}
