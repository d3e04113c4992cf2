//! The handshake aggregator (§4.2): reassembles whole handshake messages
//! from record-layer bytes, in message-sequence order, regardless of how
//! the peer fragmented them.

use std::collections::HashMap;

use tls_core::msgs::codec::Reader;
use tls_core::msgs::handshake::HandshakeHeader;

use crate::error::EngineError;
use crate::record::Variant;

/// A whole handshake message body, ready for `HandshakePayload::decode`.
#[derive(Debug, Clone)]
pub struct ReassembledMessage {
  pub header: HandshakeHeader,
  pub body: Vec<u8>,
  /// Set when this delivery is a replay of an already-processed message —
  /// the peer's flight retransmitted because our ACK-equivalent was lost.
  pub retransmit: bool,
}

struct DtlsCollector {
  total_length: u32,
  typ: tls_core::msgs::enums::HandshakeType,
  buffer: Vec<u8>,
  filled: Vec<(u32, u32)>,
}

impl DtlsCollector {
  fn new(typ: tls_core::msgs::enums::HandshakeType, total_length: u32) -> Self {
    Self { total_length, typ, buffer: vec![0u8; total_length as usize], filled: Vec::new() }
  }

  /// Inserts `bytes` at `offset`. Returns `Err` if it overlaps a previously
  /// filled range with different content (§4.2: invalid, not a discard).
  fn insert(&mut self, offset: u32, bytes: &[u8]) -> Result<(), EngineError> {
    let end = offset + bytes.len() as u32;
    for &(f_start, f_end) in &self.filled {
      let overlap_start = offset.max(f_start);
      let overlap_end = end.min(f_end);
      if overlap_start < overlap_end {
        let existing = &self.buffer[overlap_start as usize..overlap_end as usize];
        let incoming = &bytes[(overlap_start - offset) as usize..(overlap_end - offset) as usize];
        if existing != incoming {
          return Err(EngineError::Codec(tls_core::error::CodecError::InvalidValue(
            "overlapping DTLS handshake fragments disagree".into(),
          )));
        }
      }
    }
    self.buffer[offset as usize..end as usize].copy_from_slice(bytes);
    self.filled.push((offset, end));
    self.filled.sort_by_key(|&(s, _)| s);
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (s, e) in self.filled.drain(..) {
      if let Some(last) = merged.last_mut() {
        if s <= last.1 {
          last.1 = last.1.max(e);
          continue;
        }
      }
      merged.push((s, e));
    }
    self.filled = merged;
    Ok(())
  }

  fn is_complete(&self) -> bool {
    self.filled.len() == 1 && self.filled[0] == (0, self.total_length)
  }
}

pub struct Aggregator {
  variant: Variant,
  tls_buffer: Vec<u8>,
  tls_next_message_seq: u16,
  dtls_collectors: HashMap<u16, DtlsCollector>,
  dtls_next_expected: u16,
  dtls_delivered: HashMap<u16, (HandshakeHeader, Vec<u8>)>,
}

impl Aggregator {
  pub fn new(variant: Variant) -> Self {
    Self {
      variant,
      tls_buffer: Vec::new(),
      tls_next_message_seq: 0,
      dtls_collectors: HashMap::new(),
      dtls_next_expected: 0,
      dtls_delivered: HashMap::new(),
    }
  }

  /// Feeds plaintext handshake-content-type bytes (TLS mode: a rolling byte
  /// stream; a single record may hold several concatenated messages, or one
  /// message may straddle several records).
  pub fn on_tls_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ReassembledMessage>, EngineError> {
    debug_assert_eq!(self.variant, Variant::Tls);
    self.tls_buffer.extend_from_slice(bytes);
    let mut out = Vec::new();
    loop {
      if self.tls_buffer.len() < HandshakeHeader::TLS_LEN {
        break;
      }
      let mut r = Reader::init(&self.tls_buffer);
      let header = HandshakeHeader::decode_tls(&mut r)?;
      let total = HandshakeHeader::TLS_LEN + header.length as usize;
      if self.tls_buffer.len() < total {
        break;
      }
      let body = self.tls_buffer[HandshakeHeader::TLS_LEN..total].to_vec();
      self.tls_buffer.drain(0..total);
      let header = HandshakeHeader::whole(header.typ, header.length, self.tls_next_message_seq);
      self.tls_next_message_seq += 1;
      out.push(ReassembledMessage { header, body, retransmit: false });
    }
    Ok(out)
  }

  /// Feeds one DTLS handshake record (one record == one fragment, per this
  /// engine's sender — see `Connection::send_handshake_flight`). May yield
  /// more than one message if completing `next_expected` unblocks buffered
  /// successors.
  pub fn on_dtls_record(&mut self, record_bytes: &[u8]) -> Result<Vec<ReassembledMessage>, EngineError> {
    debug_assert_eq!(self.variant, Variant::Dtls);
    let mut r = Reader::init(record_bytes);
    let header = HandshakeHeader::decode_dtls(&mut r)?;
    let fragment = r.rest();
    if fragment.len() != header.fragment_length as usize {
      return Err(EngineError::Codec(tls_core::error::CodecError::InvalidValue(
        "DTLS fragment_length does not match delivered bytes".into(),
      )));
    }

    if header.message_seq < self.dtls_next_expected {
      return Ok(match self.dtls_delivered.get(&header.message_seq) {
        Some((h, body)) => vec![ReassembledMessage { header: *h, body: body.clone(), retransmit: true }],
        None => Vec::new(),
      });
    }

    let collector = self
      .dtls_collectors
      .entry(header.message_seq)
      .or_insert_with(|| DtlsCollector::new(header.typ, header.length));
    collector.insert(header.fragment_offset, fragment)?;

    let mut out = Vec::new();
    while let Some(collector) = self.dtls_collectors.get(&self.dtls_next_expected) {
      if !collector.is_complete() {
        break;
      }
      let collector = self.dtls_collectors.remove(&self.dtls_next_expected).unwrap();
      let whole = HandshakeHeader::whole(collector.typ, collector.total_length, self.dtls_next_expected);
      self.dtls_delivered.insert(self.dtls_next_expected, (whole, collector.buffer.clone()));
      out.push(ReassembledMessage { header: whole, body: collector.buffer, retransmit: false });
      self.dtls_next_expected += 1;
    }
    Ok(out)
  }

  /// Rewinds DTLS message-sequence expectations to 0: the server doesn't
  /// advance its own counter sending HelloVerifyRequest, so the client's
  /// next expected message (the real ServerHello) also carries seq 0 (§4.2).
  pub fn reset_dtls_sequence(&mut self) {
    debug_assert_eq!(self.variant, Variant::Dtls);
    self.dtls_next_expected = 0;
    self.dtls_collectors.clear();
    self.dtls_delivered.clear();
  }

  /// Discards all in-flight reassembly state and zeroizes fragment buffers
  /// (§4.2 Cleanup).
  pub fn reset(&mut self) {
    for (_, collector) in self.dtls_collectors.drain() {
      let mut buf = collector.buffer;
      buf.fill(0);
    }
    self.tls_buffer.fill(0);
    self.tls_buffer.clear();
    self.tls_next_message_seq = 0;
    self.dtls_next_expected = 0;
    self.dtls_delivered.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tls_core::msgs::enums::HandshakeType;

  fn dtls_record(typ: HandshakeType, message_seq: u16, total_len: u32, offset: u32, frag: &[u8]) -> Vec<u8> {
    let header = HandshakeHeader { typ, length: total_len, message_seq, fragment_offset: offset, fragment_length: frag.len() as u32 };
    let mut out = Vec::new();
    header.encode_dtls(&mut out);
    out.extend_from_slice(frag);
    out
  }

  #[test]
  fn tls_mode_splits_concatenated_messages() {
    let mut agg = Aggregator::new(Variant::Tls);
    let mut bytes = Vec::new();
    HandshakeHeader::whole(HandshakeType::ClientHello, 3, 0).encode_tls(&mut bytes);
    bytes.extend_from_slice(b"abc");
    HandshakeHeader::whole(HandshakeType::ServerHello, 2, 0).encode_tls(&mut bytes);
    bytes.extend_from_slice(b"xy");
    let msgs = agg.on_tls_bytes(&bytes).unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].body, b"abc");
    assert_eq!(msgs[1].body, b"xy");
  }

  #[test]
  fn tls_mode_handles_message_straddling_two_feeds() {
    let mut agg = Aggregator::new(Variant::Tls);
    let mut whole = Vec::new();
    HandshakeHeader::whole(HandshakeType::ClientHello, 4, 0).encode_tls(&mut whole);
    whole.extend_from_slice(b"wxyz");
    let (first, second) = whole.split_at(5);
    assert!(agg.on_tls_bytes(first).unwrap().is_empty());
    let msgs = agg.on_tls_bytes(second).unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].body, b"wxyz");
  }

  #[test]
  fn dtls_mode_reassembles_out_of_order_fragments() {
    let mut agg = Aggregator::new(Variant::Dtls);
    let r2 = dtls_record(HandshakeType::ClientHello, 0, 6, 3, b"def");
    let r1 = dtls_record(HandshakeType::ClientHello, 0, 6, 0, b"abc");
    assert!(agg.on_dtls_record(&r2).unwrap().is_empty());
    let msgs = agg.on_dtls_record(&r1).unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].body, b"abcdef");
  }

  #[test]
  fn dtls_mode_delivers_buffered_successor_on_completion() {
    let mut agg = Aggregator::new(Variant::Dtls);
    let seq1 = dtls_record(HandshakeType::ServerHello, 1, 2, 0, b"hi");
    assert!(agg.on_dtls_record(&seq1).unwrap().is_empty());
    let seq0 = dtls_record(HandshakeType::ClientHello, 0, 2, 0, b"go");
    let msgs = agg.on_dtls_record(&seq0).unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].header.message_seq, 0);
    assert_eq!(msgs[1].header.message_seq, 1);
  }

  #[test]
  fn dtls_mode_flags_retransmission_of_already_delivered_message() {
    let mut agg = Aggregator::new(Variant::Dtls);
    let seq0 = dtls_record(HandshakeType::ClientHello, 0, 3, 0, b"abc");
    agg.on_dtls_record(&seq0).unwrap();
    let replay = agg.on_dtls_record(&seq0).unwrap();
    assert_eq!(replay.len(), 1);
    assert!(replay[0].retransmit);
  }

  #[test]
  fn dtls_mode_rejects_disagreeing_overlap() {
    let mut agg = Aggregator::new(Variant::Dtls);
    let a = dtls_record(HandshakeType::ClientHello, 0, 6, 0, b"abc");
    let b = dtls_record(HandshakeType::ClientHello, 0, 6, 2, b"XYZ");
    agg.on_dtls_record(&a).unwrap();
    assert!(agg.on_dtls_record(&b).is_err());
  }
}
