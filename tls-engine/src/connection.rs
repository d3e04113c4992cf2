//! `Connection`: the object the framework drives. Owns the record layer,
//! aggregator, transcript, and in-progress negotiation state; wires
//! transport/timer events into the dispatch-table state machine of §4.4.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use tls_backend::{CryptoProvider, Timer, X25519PrivateKey};
use tls_core::key::{Entity, SecurityParameters};
use tls_core::msgs::codec::{Codec, Reader};
use tls_core::msgs::enums::{AlertDescription, AlertLevel, ContentType, ProtocolVersion};
use tls_core::msgs::handshake::{CipherSuiteId, HandshakeHeader, HandshakeMessage, KexFlavor, Random};
use tls_core::msgs::message::{AlertMessage, ChangeCipherSpecMessage, OpaqueMessage, RecordSequence, MAX_FRAGMENT_LEN};
use tls_core::suites::SuiteParams;
use tls_core::transcript::Transcript;

use crate::aggregator::{Aggregator, ReassembledMessage};
use crate::error::EngineError;
use crate::record::{RecordLayer, Unprotected, Variant};
use crate::state::{client, server, ClientState, HandshakeEvent, ServerState, StateId};

pub const DEFAULT_INITIAL_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_RETRY_BUDGET: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Client,
  Server,
}

#[derive(Debug, Clone)]
pub struct PskConfig {
  /// The identity bytes a client offers in `ClientKeyExchange`.
  pub identity: Vec<u8>,
  /// The hint a server advertises in `ServerKeyExchange`.
  pub hint: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CertificateLabels {
  /// DER of the trust anchor used to validate the peer's chain.
  pub trust_root: Vec<u8>,
  /// This endpoint's own chain, sent in its `Certificate` message.
  pub own_cert_chain: Vec<Vec<u8>>,
  /// Label passed to `CryptoProvider::ed25519_sign` to sign with our key.
  pub own_key_uuid: String,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub role: Role,
  pub variant: Variant,
  /// Offered/accepted suites in priority order, <= 10 entries (§4.3).
  pub cipher_suites: Vec<CipherSuiteId>,
  pub psk: Option<PskConfig>,
  pub certificates: Option<CertificateLabels>,
  /// DTLS server only: reply HelloVerifyRequest before processing ClientHello.
  pub cookie_verification_enabled: bool,
  /// Per-listener secret folded into the HelloVerifyRequest cookie MAC.
  pub verification_secret: [u8; 32],
  pub send_close_notify: bool,
}

pub trait ConnectionCallbacks {
  fn write_to_transport(&mut self, bytes: &[u8]);
  fn write_to_comm_party(&mut self, bytes: &[u8]);
  fn on_connected(&mut self) {}
  fn on_disconnected(&mut self, alert: Option<AlertDescription>) {
    let _ = alert;
  }
}

#[derive(Default)]
pub(crate) struct RetryState {
  pub timeout_ms: u64,
  pub retries_left: u32,
  /// Raw encoded handshake-message bytes (header + body) from the last
  /// flight we sent, kept so a timer expiry can resend verbatim with fresh
  /// record sequence numbers but unchanged message-sequence numbers.
  pub last_flight: Vec<Vec<u8>>,
  pub armed: bool,
}

/// Negotiation-in-progress state: everything a handler needs beyond the
/// record layer and transcript. Reset to defaults on close.
#[derive(Default)]
pub(crate) struct HandshakeData {
  pub client_random: Option<Random>,
  pub server_random: Option<Random>,
  pub selected_suite: Option<&'static SuiteParams>,
  pub kex_flavor: Option<KexFlavor>,
  pub own_x25519_private: Option<X25519PrivateKey>,
  pub own_x25519_public: Option<[u8; 32]>,
  pub peer_x25519_public: Option<[u8; 32]>,
  pub psk_identity: Option<Vec<u8>>,
  pub peer_leaf_pubkey: Option<[u8; 32]>,
  pub client_auth_required: bool,
  pub dtls_cookie: Vec<u8>,
  pub next_message_seq: u16,
  pub retry: RetryState,
  pub pending_security: Option<SecurityParameters>,
}

pub struct Connection<C: ConnectionCallbacks> {
  pub(crate) role: Role,
  pub(crate) variant: Variant,
  pub(crate) config: Config,
  pub(crate) crypto: Arc<dyn CryptoProvider>,
  pub(crate) timer: Box<dyn Timer>,
  pub(crate) record: RecordLayer,
  pub(crate) aggregator: Aggregator,
  pub(crate) transcript: Transcript,
  pub(crate) state: StateId,
  pub(crate) hs: HandshakeData,
  pub(crate) callbacks: C,
  pub(crate) has_error: bool,
  pub(crate) closed: bool,
}

impl<C: ConnectionCallbacks> Connection<C> {
  pub fn new(config: Config, crypto: Arc<dyn CryptoProvider>, timer: Box<dyn Timer>, callbacks: C) -> Self {
    let role = config.role;
    let variant = config.variant;
    let entity = match role {
      Role::Client => Entity::Client,
      Role::Server => Entity::Server,
    };
    let state = match role {
      Role::Client => StateId::Client(ClientState::Disconnected),
      Role::Server => StateId::Server(ServerState::Disconnected),
    };
    Self {
      role,
      variant,
      config,
      crypto,
      timer,
      record: RecordLayer::new(variant, entity),
      aggregator: Aggregator::new(variant),
      transcript: Transcript::new(),
      state,
      hs: HandshakeData::default(),
      callbacks,
      has_error: false,
      closed: false,
    }
  }

  pub fn protocol_version(&self) -> ProtocolVersion {
    if self.variant == Variant::Dtls { ProtocolVersion::DTLS1_2 } else { ProtocolVersion::TLS1_2 }
  }

  pub fn is_connected(&self) -> bool {
    matches!(self.state, StateId::Client(ClientState::Connected) | StateId::Server(ServerState::Connected))
  }

  /// Client-only: begins the handshake by sending ClientHello.
  pub fn open(&mut self) -> Result<(), EngineError> {
    if self.role != Role::Client {
      return Err(EngineError::InvalidState);
    }
    self.transition(StateId::Client(ClientState::ClientHelloSent))
  }

  pub fn send_application_data(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
    if !self.is_connected() {
      return Err(EngineError::InvalidState);
    }
    self.send_record(ContentType::ApplicationData, bytes)
  }

  /// Feeds bytes received from the transport. For DTLS, one call == one
  /// datagram, which may itself hold more than one record back-to-back.
  pub fn on_transport_bytes(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
    if self.closed {
      return Err(EngineError::InvalidState);
    }
    let mut r = Reader::init(bytes);
    while r.any_left() {
      let (opaque, seq) = if self.variant == Variant::Dtls {
        match OpaqueMessage::read_dtls(&mut r) {
          Ok(v) => v,
          Err(e) => {
            self.fail(e.into());
            return Ok(());
          }
        }
      } else {
        match OpaqueMessage::read_tls(&mut r) {
          Ok(v) => (v, RecordSequence::zero()),
          Err(e) => {
            self.fail(e.into());
            return Ok(());
          }
        }
      };
      if let Err(e) = self.process_record(opaque, seq) {
        self.fail(e);
        return Ok(());
      }
    }
    Ok(())
  }

  fn process_record(&mut self, opaque: OpaqueMessage, seq: RecordSequence) -> Result<(), EngineError> {
    let typ = opaque.typ;
    let plaintext = match self.record.unprotect(self.crypto.as_ref(), typ, opaque.version, seq, &opaque.payload)? {
      Unprotected::Plaintext(p) => p,
      Unprotected::Dropped => {
        trace!("dropped record (epoch mismatch or replay)");
        return Ok(());
      }
    };

    match typ {
      ContentType::Handshake => self.on_handshake_bytes(&plaintext)?,
      ContentType::ChangeCipherSpec => {
        ChangeCipherSpecMessage::decode(&mut Reader::init(&plaintext))?;
        self.record.activate_pending_read()?;
        self.dispatch(HandshakeEvent::OnChangeCipherMessageReceived)?;
      }
      ContentType::Alert => {
        let alert = AlertMessage::decode(&mut Reader::init(&plaintext))?;
        self.dispatch(HandshakeEvent::OnAlertMessageReceived { level: alert.level, description: alert.description })?;
      }
      ContentType::ApplicationData => {
        if !self.is_connected() {
          return Err(EngineError::UnexpectedMessage);
        }
        self.callbacks.write_to_comm_party(&plaintext);
      }
      ContentType::Unknown(_) => return Err(EngineError::UnexpectedMessage),
    }
    Ok(())
  }

  fn on_handshake_bytes(&mut self, plaintext: &[u8]) -> Result<(), EngineError> {
    let messages = if self.variant == Variant::Dtls {
      self.aggregator.on_dtls_record(plaintext)?
    } else {
      self.aggregator.on_tls_bytes(plaintext)?
    };
    for msg in messages {
      self.deliver_handshake_message(msg)?;
    }
    Ok(())
  }

  fn deliver_handshake_message(&mut self, msg: ReassembledMessage) -> Result<(), EngineError> {
    use tls_core::msgs::enums::HandshakeType;
    if msg.retransmit {
      // The peer never saw our answer to this message; resend our last
      // flight rather than re-running the handler (§4.2).
      return self.retransmit_last_flight();
    }
    // Finished is excluded here too: its own verify_data is checked against
    // the transcript hash *not including itself*, so the handler appends it
    // manually once verification succeeds (§4.4).
    let excluded = matches!(
      msg.header.typ,
      HandshakeType::HelloRequest | HandshakeType::HelloVerifyRequest | HandshakeType::Finished
    );
    if !excluded {
      self.append_received_to_transcript(&msg);
    }
    self.dispatch(HandshakeEvent::OnHandshakeMessageReceived(&msg))
  }

  fn append_received_to_transcript(&mut self, msg: &ReassembledMessage) {
    let mut header_bytes = Vec::new();
    if self.variant == Variant::Dtls {
      msg.header.encode_dtls(&mut header_bytes);
    } else {
      msg.header.encode_tls(&mut header_bytes);
    }
    self.transcript.append(&header_bytes);
    self.transcript.append(&msg.body);
  }

  /// Appends a received Finished message to the transcript. Called by the
  /// state handlers after `verify_data` has been checked against the
  /// transcript hash as it stood *before* this message (§4.4).
  pub(crate) fn append_finished_to_transcript(&mut self, msg: &ReassembledMessage) {
    self.append_received_to_transcript(msg);
  }

  /// Timer expiry delivered by the framework (§5 — the only asynchronous
  /// input). DTLS: retransmits the last flight. TLS: any handshake timeout
  /// is fatal.
  pub fn on_timer_event(&mut self) -> Result<(), EngineError> {
    if self.closed {
      return Ok(());
    }
    self.dispatch(HandshakeEvent::OnTimerEvent)
  }

  pub fn close(&mut self) -> Result<(), EngineError> {
    if self.closed {
      return Ok(());
    }
    if self.config.send_close_notify {
      let _ = self.send_alert(AlertLevel::Warning, AlertDescription::CloseNotify);
    }
    self.timer.stop();
    let mut waited = Duration::ZERO;
    while self.timer.is_callback_executing() && waited < Duration::from_secs(1) {
      std::thread::sleep(Duration::from_millis(10));
      waited += Duration::from_millis(10);
    }
    self.teardown();
    Ok(())
  }

  fn teardown(&mut self) {
    self.closed = true;
    self.aggregator.reset();
    self.hs = HandshakeData::default();
  }

  /// An alert the peer sent us. Unlike `fail`, this never echoes an alert
  /// back — we only originate alerts for errors we detect ourselves (§7).
  pub(crate) fn handle_peer_alert(&mut self, level: AlertLevel, description: AlertDescription) {
    if self.has_error || self.closed {
      return;
    }
    if level == AlertLevel::Fatal || description == AlertDescription::CloseNotify {
      self.has_error = true;
      self.state = match self.role {
        Role::Client => StateId::Client(ClientState::Disconnected),
        Role::Server => StateId::Server(ServerState::Disconnected),
      };
      self.callbacks.on_disconnected(Some(description));
      self.teardown();
    }
  }

  pub(crate) fn transition(&mut self, next: StateId) -> Result<(), EngineError> {
    self.state = next;
    debug!(next_state = ?next, "handshake state transition");
    self.dispatch(HandshakeEvent::OnEnter)
  }

  fn dispatch(&mut self, event: HandshakeEvent) -> Result<(), EngineError> {
    match self.state {
      StateId::Client(s) => client::dispatch(self, s, event),
      StateId::Server(s) => server::dispatch(self, s, event),
    }
  }

  /// Central error sink (§7 propagation policy): only the first error on a
  /// flow is honored; everything after it is ignored so the original cause
  /// survives.
  pub(crate) fn fail(&mut self, err: EngineError) {
    if self.has_error || self.closed {
      return;
    }
    warn!(error = %err, "handshake failed");
    if !err.is_fatal() {
      // e.g. NoRenegotiation: reject on the wire at Warning level and keep
      // the connection exactly where it was.
      if let Some(alert) = err.alert() {
        let _ = self.send_alert(AlertLevel::Warning, alert);
      }
      return;
    }
    self.has_error = true;
    if let Some(alert) = err.alert() {
      let _ = self.send_alert(AlertLevel::Fatal, alert);
    }
    self.state = match self.role {
      Role::Client => StateId::Client(ClientState::Disconnected),
      Role::Server => StateId::Server(ServerState::Disconnected),
    };
    self.callbacks.on_disconnected(err.alert());
    self.teardown();
  }

  pub(crate) fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), EngineError> {
    let msg = AlertMessage { level, description };
    self.send_record(ContentType::Alert, &msg.get_encoding())
  }

  pub(crate) fn send_record(&mut self, typ: ContentType, bytes: &[u8]) -> Result<(), EngineError> {
    let version = self.protocol_version();
    if bytes.is_empty() {
      return self.send_one_record(typ, version, &[]);
    }
    for chunk in bytes.chunks(MAX_FRAGMENT_LEN) {
      self.send_one_record(typ, version, chunk)?;
    }
    Ok(())
  }

  fn send_one_record(&mut self, typ: ContentType, version: ProtocolVersion, chunk: &[u8]) -> Result<(), EngineError> {
    let (seq, ciphertext) = self.record.protect(self.crypto.as_ref(), typ, version, chunk)?;
    let opaque = OpaqueMessage { typ, version, payload: ciphertext };
    let mut out = Vec::new();
    if self.variant == Variant::Dtls {
      opaque.write_dtls(seq, &mut out);
    } else {
      opaque.write_tls(&mut out);
    }
    self.callbacks.write_to_transport(&out);
    Ok(())
  }

  /// Encodes one handshake message and appends it to the transcript,
  /// without sending it yet. Used when a later message in the same flight
  /// (CertificateVerify) must sign over the transcript hash of everything
  /// sent so far — the caller batches these and transmits with
  /// `transmit_raw_flight` once the whole flight is framed (§4.4).
  pub(crate) fn encode_and_append_transcript(&mut self, msg: &HandshakeMessage) -> Vec<u8> {
    let encoded = if self.variant == Variant::Dtls { msg.encode_dtls() } else { msg.encode_tls() };
    self.transcript.append(&encoded);
    encoded
  }

  /// Sends a flight of handshake messages: appends each to the transcript,
  /// frames and transmits it, and (DTLS) arms the retransmission timer.
  pub(crate) fn send_handshake_flight(&mut self, messages: Vec<HandshakeMessage>) -> Result<(), EngineError> {
    let raw_flight: Vec<Vec<u8>> = messages.iter().map(|msg| self.encode_and_append_transcript(msg)).collect();
    self.transmit_raw_flight(raw_flight)
  }

  /// Transmits already-framed (and already transcript-appended) handshake
  /// messages as one flight, arming the DTLS retransmission timer. Each
  /// entry in `raw_flight` is a whole-message encoding (the form the
  /// transcript hashes per RFC 6347 §4.2.6); `send_one_handshake_message`
  /// re-fragments it for the wire when it doesn't fit one DTLS record.
  pub(crate) fn transmit_raw_flight(&mut self, raw_flight: Vec<Vec<u8>>) -> Result<(), EngineError> {
    for encoded in &raw_flight {
      self.send_one_handshake_message(encoded)?;
    }
    if self.variant == Variant::Dtls {
      self.hs.retry.last_flight = raw_flight;
      self.hs.retry.timeout_ms = DEFAULT_INITIAL_TIMEOUT_MS;
      self.hs.retry.retries_left = DEFAULT_RETRY_BUDGET;
      self.hs.retry.armed = true;
      self.timer.start(self.hs.retry.timeout_ms);
    }
    Ok(())
  }

  /// Retransmits the stored last flight verbatim; doubles the timeout and
  /// decrements the retry budget (§4.4 Retransmission).
  pub(crate) fn retransmit_last_flight(&mut self) -> Result<(), EngineError> {
    if self.hs.retry.retries_left == 0 {
      return Err(EngineError::HandshakeFailure("retransmission budget exhausted".into()));
    }
    let flight = std::mem::take(&mut self.hs.retry.last_flight);
    for encoded in &flight {
      self.send_one_handshake_message(encoded)?;
    }
    self.hs.retry.last_flight = flight;
    self.hs.retry.retries_left -= 1;
    self.hs.retry.timeout_ms = (self.hs.retry.timeout_ms * 2).min(DEFAULT_MAX_TIMEOUT_MS);
    self.timer.start(self.hs.retry.timeout_ms);
    Ok(())
  }

  /// Sends one whole-message handshake encoding. For TLS this is just a
  /// generic byte stream split at `MAX_FRAGMENT_LEN` (the record layer
  /// carries no per-chunk metadata; the peer's codec just concatenates
  /// across record boundaries). For DTLS each wire record must carry its
  /// own valid `fragment_offset`/`fragment_length` header (§4.2), so a
  /// message bigger than one record is re-split here into fresh
  /// single-fragment-per-record encodings rather than sliced as raw bytes.
  fn send_one_handshake_message(&mut self, encoded: &[u8]) -> Result<(), EngineError> {
    if self.variant != Variant::Dtls {
      return self.send_record(ContentType::Handshake, encoded);
    }
    for fragment in dtls_handshake_fragments(encoded)? {
      self.send_record(ContentType::Handshake, &fragment)?;
    }
    Ok(())
  }

  pub(crate) fn next_message_seq(&mut self) -> u16 {
    let seq = self.hs.next_message_seq;
    self.hs.next_message_seq += 1;
    seq
  }

  pub(crate) fn disarm_retry_timer(&mut self) {
    self.hs.retry.armed = false;
    self.hs.retry.last_flight.clear();
    self.timer.stop();
  }
}

/// Assembles the `seq_num`-independent portion shared by client and server
/// key derivation: builds `next` SecurityParameters from the negotiated
/// suite and randoms, then stages it into the record layer for the upcoming
/// ChangeCipherSpec pivot (§4.5).
pub(crate) fn stage_security_parameters<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  pre_master_secret: &[u8],
) -> Result<(), EngineError> {
  let entity = match conn.role {
    Role::Client => Entity::Client,
    Role::Server => Entity::Server,
  };
  let mut params = SecurityParameters::initial(entity);
  params.suite = conn.hs.selected_suite.expect("cipher suite must be selected before key derivation");
  params.client_random = conn.hs.client_random.expect("client random must be set");
  params.server_random = conn.hs.server_random.expect("server random must be set");
  params.derive_master_secret(pre_master_secret);
  params.derive_keys();
  conn.record.stage_next(params.clone());
  conn.hs.pending_security = Some(params);
  Ok(())
}

/// Splits one whole-message DTLS handshake encoding (header with
/// `fragment_offset = 0`, `fragment_length = length`) into the fragments
/// actually sent over the wire, each carrying its own header (§4.2). A
/// message whose body already fits one record is returned unchanged.
fn dtls_handshake_fragments(encoded: &[u8]) -> Result<Vec<Vec<u8>>, EngineError> {
  let mut r = Reader::init(encoded);
  let header = HandshakeHeader::decode_dtls(&mut r)?;
  let body = r.rest();
  let max_fragment_body = MAX_FRAGMENT_LEN - HandshakeHeader::DTLS_LEN;

  if body.len() <= max_fragment_body {
    return Ok(vec![encoded.to_vec()]);
  }

  Ok(
    body
      .chunks(max_fragment_body)
      .scan(0u32, |offset, chunk| {
        let fragment_header = HandshakeHeader {
          typ: header.typ,
          length: header.length,
          message_seq: header.message_seq,
          fragment_offset: *offset,
          fragment_length: chunk.len() as u32,
        };
        *offset += chunk.len() as u32;
        let mut out = Vec::with_capacity(HandshakeHeader::DTLS_LEN + chunk.len());
        fragment_header.encode_dtls(&mut out);
        out.extend_from_slice(chunk);
        Some(out)
      })
      .collect(),
  )
}

/// `Finished.verify_data = PRF(master_secret, label, Hash(transcript))[..12]` (§4.4).
pub(crate) fn verify_data<C: ConnectionCallbacks>(conn: &Connection<C>, label: &'static [u8]) -> Vec<u8> {
  let params = conn.hs.pending_security.as_ref().expect("security parameters must be staged");
  let hash = conn.transcript.hash(params.prf_hash());
  let mut out = vec![0u8; tls_core::msgs::handshake::VERIFY_DATA_LEN];
  tls_core::prf::prf(params.prf_hash(), params.master_secret.as_ref().unwrap().expose(), label, &hash, &mut out);
  out
}

#[cfg(test)]
mod tests {
  use tls_core::msgs::enums::HandshakeType;

  use super::*;
  use crate::aggregator::Aggregator;

  fn whole_encoding(typ: HandshakeType, message_seq: u16, body: &[u8]) -> Vec<u8> {
    let header = HandshakeHeader::whole(typ, body.len() as u32, message_seq);
    let mut out = Vec::new();
    header.encode_dtls(&mut out);
    out.extend_from_slice(body);
    out
  }

  #[test]
  fn small_message_is_sent_as_a_single_unfragmented_record() {
    let body = vec![0xABu8; 64];
    let encoded = whole_encoding(HandshakeType::Certificate, 3, &body);
    let fragments = dtls_handshake_fragments(&encoded).unwrap();
    assert_eq!(fragments, vec![encoded]);
  }

  /// A handshake message bigger than one DTLS record (a large certificate
  /// chain, say) must come out as several records, each with its own
  /// correct `fragment_offset`/`fragment_length`, and reassemble back to
  /// the original body through the real aggregator.
  #[test]
  fn oversized_message_is_split_into_correctly_headed_fragments_and_reassembles() {
    let body: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let encoded = whole_encoding(HandshakeType::Certificate, 0, &body);
    let fragments = dtls_handshake_fragments(&encoded).unwrap();
    assert!(fragments.len() > 1, "expected more than one fragment for a 40000-byte body");

    let max_fragment_body = MAX_FRAGMENT_LEN - HandshakeHeader::DTLS_LEN;
    let mut reassembled = Vec::new();
    for raw in &fragments {
      let mut r = Reader::init(raw);
      let header = HandshakeHeader::decode_dtls(&mut r).unwrap();
      assert_eq!(header.typ, HandshakeType::Certificate);
      assert_eq!(header.message_seq, 0);
      assert_eq!(header.length, body.len() as u32);
      assert_eq!(header.fragment_offset as usize, reassembled.len());
      let fragment_body = r.rest();
      assert_eq!(fragment_body.len(), header.fragment_length as usize);
      assert!(fragment_body.len() <= max_fragment_body);
      reassembled.extend_from_slice(fragment_body);
    }
    assert_eq!(reassembled, body);

    let mut aggregator = Aggregator::new(Variant::Dtls);
    let mut delivered = Vec::new();
    for raw in &fragments {
      delivered.extend(aggregator.on_dtls_record(raw).unwrap());
    }
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].body, body);
  }
}
