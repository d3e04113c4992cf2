//! Client-side handshake handlers (§4.4 client happy path): 9 states, one
//! handler each, dispatched by an exhaustive match rather than a literal
//! `(State, Event) -> fn` table (Design Note §9).

use subtle::ConstantTimeEq;

use tls_core::msgs::codec::{encode_vec_u8, Codec, Reader};
use tls_core::msgs::enums::{CompressionMethod, EcPointFormat, HandshakeType, NamedGroup, SignatureScheme};
use tls_core::msgs::handshake::{
  cookie, session_id, CertificatePayload, CertificateVerifyPayload, ClientExtension, ClientHelloPayload,
  ClientKeyExchangePayload, HandshakeMessage, HandshakePayload, KexFlavor, Random,
};
use tls_core::msgs::message::ChangeCipherSpecMessage;
use tls_core::suites::{Authentication, KeyExchange};

use crate::aggregator::ReassembledMessage;
use crate::connection::{stage_security_parameters, verify_data, Connection, ConnectionCallbacks};
use crate::error::EngineError;
use crate::record::Variant;
use crate::state::{ClientState, HandshakeEvent, StateId};

pub(crate) fn dispatch<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  state: ClientState,
  event: HandshakeEvent,
) -> Result<(), EngineError> {
  match event {
    HandshakeEvent::OnAlertMessageReceived { level, description } => {
      conn.handle_peer_alert(level, description);
      Ok(())
    }
    HandshakeEvent::OnEnter => on_enter(conn, state),
    HandshakeEvent::OnHandshakeMessageReceived(msg) => on_message(conn, state, msg),
    HandshakeEvent::OnChangeCipherMessageReceived => on_ccs(conn, state),
    HandshakeEvent::OnTimerEvent => on_timer(conn, state),
  }
}

fn on_enter<C: ConnectionCallbacks>(conn: &mut Connection<C>, state: ClientState) -> Result<(), EngineError> {
  match state {
    ClientState::ClientHelloSent => send_client_hello(conn),
    ClientState::Connected => {
      conn.disarm_retry_timer();
      conn.callbacks.on_connected();
      tracing::info!(suite = ?conn.hs.selected_suite.map(|s| s.suite), "client handshake complete");
      Ok(())
    }
    _ => Ok(()),
  }
}

fn on_timer<C: ConnectionCallbacks>(conn: &mut Connection<C>, state: ClientState) -> Result<(), EngineError> {
  if conn.variant == Variant::Tls {
    // TLS has no retransmission path; any timeout mid-handshake is fatal (§4.4).
    return Err(EngineError::HandshakeFailure("handshake timed out".into()));
  }
  if matches!(state, ClientState::Disconnected | ClientState::Connected) {
    return Ok(());
  }
  conn.retransmit_last_flight()
}

fn on_ccs<C: ConnectionCallbacks>(conn: &mut Connection<C>, state: ClientState) -> Result<(), EngineError> {
  match state {
    ClientState::ServerHelloDone => conn.transition(StateId::Client(ClientState::ServerChangeCipherSpec)),
    _ => Err(EngineError::UnexpectedMessage),
  }
}

fn on_message<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  state: ClientState,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  if msg.header.typ == HandshakeType::HelloRequest {
    // Renegotiation is out of scope; reject it the way a fixed-suite
    // embedded stack would rather than silently restarting (§4.4 Non-goals).
    return Err(EngineError::NoRenegotiation);
  }
  match (state, msg.header.typ) {
    (ClientState::ClientHelloSent, HandshakeType::HelloVerifyRequest) => handle_hello_verify_request(conn, msg),
    (ClientState::ClientHelloSent, HandshakeType::ServerHello) => handle_server_hello(conn, msg),
    (ClientState::ServerHelloReceived, HandshakeType::Certificate) => handle_certificate(conn, msg),
    (ClientState::ServerHelloReceived, HandshakeType::ServerKeyExchange) => handle_server_key_exchange(conn, msg),
    (ClientState::ServerCertificateExchange, HandshakeType::ServerKeyExchange) => handle_server_key_exchange(conn, msg),
    (ClientState::ServerKeyExchange, HandshakeType::CertificateRequest) => handle_certificate_request(conn, msg),
    (ClientState::ServerKeyExchange, HandshakeType::ServerHelloDone) => handle_server_hello_done(conn, msg),
    (ClientState::CertificateRequest, HandshakeType::ServerHelloDone) => handle_server_hello_done(conn, msg),
    (ClientState::ServerChangeCipherSpec, HandshakeType::Finished) => handle_server_finished(conn, msg),
    _ => Err(EngineError::UnexpectedMessage),
  }
}

fn send_client_hello<C: ConnectionCallbacks>(conn: &mut Connection<C>) -> Result<(), EngineError> {
  // A cookie-triggered resend reuses the random from the first attempt so
  // the two ClientHellos only differ by the cookie field (§4.4).
  let random = match conn.hs.client_random {
    Some(r) => r,
    None => {
      let mut bytes = [0u8; 32];
      conn.crypto.random(&mut bytes)?;
      let r = Random(bytes);
      conn.hs.client_random = Some(r);
      r
    }
  };

  let wants_ecdhe = conn
    .config
    .cipher_suites
    .iter()
    .any(|id| tls_core::suites::by_id(id.0).map(|s| s.kex == KeyExchange::EcdheX25519).unwrap_or(false));

  let mut extensions = Vec::new();
  if wants_ecdhe {
    extensions.push(ClientExtension::SupportedGroups(vec![NamedGroup::X25519]));
    extensions.push(ClientExtension::SignatureAlgorithms(vec![SignatureScheme::ED25519]));
    extensions.push(ClientExtension::EcPointFormats(vec![EcPointFormat::Uncompressed]));
  }

  let cookie_field =
    if conn.variant == Variant::Dtls { Some(cookie(conn.hs.dtls_cookie.clone())?) } else { None };

  let payload = ClientHelloPayload {
    client_version: conn.protocol_version(),
    random,
    session_id: session_id(Vec::new())?,
    cookie: cookie_field,
    cipher_suites: conn.config.cipher_suites.clone(),
    compression_methods: vec![CompressionMethod::Null],
    extensions,
  };

  let seq = conn.next_message_seq();
  conn.send_handshake_flight(vec![HandshakeMessage { message_seq: seq, payload: HandshakePayload::ClientHello(payload) }])
}

fn handle_hello_verify_request<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  let payload = match HandshakePayload::decode(HandshakeType::HelloVerifyRequest, None, &mut Reader::init(&msg.body))? {
    HandshakePayload::HelloVerifyRequest(p) => p,
    _ => unreachable!(),
  };
  conn.hs.dtls_cookie = payload.cookie.bytes;
  // The server never advanced its own counter sending this; we reset ours
  // so the resent ClientHello restarts message-seq at 0, and rewind our
  // reassembly expectations to match the server's (§4.2).
  conn.hs.next_message_seq = 0;
  conn.aggregator.reset_dtls_sequence();
  conn.transition(StateId::Client(ClientState::ClientHelloSent))
}

fn handle_server_hello<C: ConnectionCallbacks>(conn: &mut Connection<C>, msg: &ReassembledMessage) -> Result<(), EngineError> {
  let payload = match HandshakePayload::decode(HandshakeType::ServerHello, None, &mut Reader::init(&msg.body))? {
    HandshakePayload::ServerHello(p) => p,
    _ => unreachable!(),
  };

  let expected = conn.protocol_version();
  let dtls_cookie_downgrade = conn.variant == Variant::Dtls && payload.server_version == tls_core::msgs::enums::ProtocolVersion::DTLS1_0;
  if payload.server_version != expected && !dtls_cookie_downgrade {
    return Err(EngineError::UnexpectedVersion);
  }

  let suite = tls_core::suites::by_id(payload.cipher_suite.0)
    .ok_or_else(|| EngineError::HandshakeFailure("server selected an unknown cipher suite".into()))?;
  if !conn.config.cipher_suites.iter().any(|id| id.0 == suite.id) {
    return Err(EngineError::IllegalParameter("server selected a suite we did not offer".into()));
  }

  conn.hs.server_random = Some(payload.random);
  conn.hs.selected_suite = Some(suite);
  conn.hs.kex_flavor = Some(match suite.kex {
    KeyExchange::Psk => KexFlavor::Psk,
    KeyExchange::EcdheX25519 => KexFlavor::Dh,
    KeyExchange::None => return Err(EngineError::InsufficientSecurity("negotiated suite has no key exchange".into())),
  });

  tracing::debug!(suite = ?suite.suite, "negotiated cipher suite");
  conn.transition(StateId::Client(ClientState::ServerHelloReceived))
}

fn handle_certificate<C: ConnectionCallbacks>(conn: &mut Connection<C>, msg: &ReassembledMessage) -> Result<(), EngineError> {
  let payload = match HandshakePayload::decode(HandshakeType::Certificate, None, &mut Reader::init(&msg.body))? {
    HandshakePayload::Certificate(p) => p,
    _ => unreachable!(),
  };
  if payload.0.is_empty() {
    return Err(EngineError::BadCertificate("server sent an empty certificate chain".into()));
  }
  let leaf = conn.crypto.verify_chain(&payload.0).map_err(|e| EngineError::BadCertificate(e.to_string()))?;
  conn.hs.peer_leaf_pubkey = Some(leaf);
  conn.transition(StateId::Client(ClientState::ServerCertificateExchange))
}

fn handle_server_key_exchange<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  let kex = conn.hs.kex_flavor.ok_or_else(|| EngineError::Internal("kex flavor not yet negotiated".into()))?;
  let payload = match HandshakePayload::decode(HandshakeType::ServerKeyExchange, Some(kex), &mut Reader::init(&msg.body))? {
    HandshakePayload::ServerKeyExchange(p) => p,
    _ => unreachable!(),
  };

  match payload {
    tls_core::msgs::handshake::ServerKeyExchangePayload::Psk { .. } => {}
    tls_core::msgs::handshake::ServerKeyExchangePayload::Dh { named_group, public_key, scheme, signature } => {
      let suite = conn.hs.selected_suite.expect("suite set before ServerKeyExchange");
      if suite.auth != Authentication::Ed25519 {
        return Err(EngineError::IllegalParameter("DH key exchange requires an Ed25519 suite".into()));
      }
      if named_group != NamedGroup::X25519 {
        return Err(EngineError::IllegalParameter("unsupported named group".into()));
      }
      if scheme != SignatureScheme::ED25519 {
        return Err(EngineError::UnsupportedExtension);
      }
      let leaf = conn
        .hs
        .peer_leaf_pubkey
        .ok_or_else(|| EngineError::HandshakeFailure("no peer certificate to verify signature against".into()))?;

      let mut signed = Vec::new();
      signed.extend_from_slice(&conn.hs.client_random.expect("client random set").0);
      signed.extend_from_slice(&conn.hs.server_random.expect("server random set").0);
      signed.extend_from_slice(&tls_core::msgs::handshake::ServerKeyExchangePayload::ec_params(named_group));
      encode_vec_u8(1, &public_key, &mut signed);

      conn
        .crypto
        .ed25519_verify(&leaf, &signed, &signature)
        .map_err(|_| EngineError::IllegalParameter("ServerKeyExchange signature invalid".into()))?;

      let public_key: [u8; 32] =
        public_key.try_into().map_err(|_| EngineError::IllegalParameter("x25519 public key must be 32 bytes".into()))?;
      conn.hs.peer_x25519_public = Some(public_key);
    }
  }

  conn.transition(StateId::Client(ClientState::ServerKeyExchange))
}

fn handle_certificate_request<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  HandshakePayload::decode(HandshakeType::CertificateRequest, None, &mut Reader::init(&msg.body))?;
  conn.hs.client_auth_required = true;
  conn.transition(StateId::Client(ClientState::CertificateRequest))
}

fn handle_server_hello_done<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  HandshakePayload::decode(HandshakeType::ServerHelloDone, None, &mut Reader::init(&msg.body))?;
  send_client_flight(conn)?;
  conn.transition(StateId::Client(ClientState::ServerHelloDone))
}

/// Builds and sends Certificate?/ClientKeyExchange/CertificateVerify? as one
/// flight, pivots to the new epoch, then sends ChangeCipherSpec/Finished
/// (§4.4/§4.5).
fn send_client_flight<C: ConnectionCallbacks>(conn: &mut Connection<C>) -> Result<(), EngineError> {
  let kex = conn.hs.kex_flavor.ok_or_else(|| EngineError::Internal("kex flavor not yet negotiated".into()))?;
  let client_auth_required = conn.hs.client_auth_required;

  let mut raw_flight = Vec::new();

  if client_auth_required {
    let chain = conn
      .config
      .certificates
      .as_ref()
      .map(|c| c.own_cert_chain.clone())
      .ok_or_else(|| EngineError::BadCertificate("client certificate requested but none configured".into()))?;
    let seq = conn.next_message_seq();
    let cert_msg = HandshakeMessage { message_seq: seq, payload: HandshakePayload::Certificate(CertificatePayload(chain)) };
    raw_flight.push(conn.encode_and_append_transcript(&cert_msg));
  }

  let pre_master_secret = match kex {
    KexFlavor::Psk => {
      let psk_cfg = conn.config.psk.clone().ok_or_else(|| EngineError::PskIdentityNotFound("no PSK configured".into()))?;
      let key = conn.crypto.psk_lookup(&psk_cfg.identity)?;
      conn.hs.psk_identity = Some(psk_cfg.identity.clone());
      let seq = conn.next_message_seq();
      let cke_msg = HandshakeMessage {
        message_seq: seq,
        payload: HandshakePayload::ClientKeyExchange(ClientKeyExchangePayload::Psk { identity: psk_cfg.identity }),
      };
      raw_flight.push(conn.encode_and_append_transcript(&cke_msg));
      tls_core::key::psk_pre_master_secret(&key)
    }
    KexFlavor::Dh => {
      let (private, public) = conn.crypto.x25519_generate()?;
      let peer_public = conn
        .hs
        .peer_x25519_public
        .ok_or_else(|| EngineError::HandshakeFailure("no peer key share to agree with".into()))?;
      let shared = conn.crypto.x25519_agree(private, &peer_public)?;
      conn.hs.own_x25519_public = Some(public);
      let seq = conn.next_message_seq();
      let cke_msg = HandshakeMessage {
        message_seq: seq,
        payload: HandshakePayload::ClientKeyExchange(ClientKeyExchangePayload::Dh { public_key: public.to_vec() }),
      };
      raw_flight.push(conn.encode_and_append_transcript(&cke_msg));
      shared.to_vec()
    }
  };

  if client_auth_required {
    let labels = conn
      .config
      .certificates
      .clone()
      .ok_or_else(|| EngineError::BadCertificate("client certificate requested but none configured".into()))?;
    let suite = conn.hs.selected_suite.expect("suite set before building the client flight");
    conn.transcript.mark_certificate_verify_cutoff();
    let hash = conn.transcript.hash_for_certificate_verify(suite.prf_hash);
    let signature = conn.crypto.ed25519_sign(&labels.own_key_uuid, &hash)?;
    let seq = conn.next_message_seq();
    let cv_msg = HandshakeMessage {
      message_seq: seq,
      payload: HandshakePayload::CertificateVerify(CertificateVerifyPayload { scheme: SignatureScheme::ED25519, signature }),
    };
    raw_flight.push(conn.encode_and_append_transcript(&cv_msg));
  }

  conn.transmit_raw_flight(raw_flight)?;

  stage_security_parameters(conn, &pre_master_secret)?;

  conn.send_record(tls_core::msgs::enums::ContentType::ChangeCipherSpec, &ChangeCipherSpecMessage.get_encoding())?;
  conn.record.activate_pending_write()?;

  let verify = verify_data(conn, b"client finished");
  let seq = conn.next_message_seq();
  let fin_msg = HandshakeMessage { message_seq: seq, payload: HandshakePayload::Finished(tls_core::msgs::handshake::FinishedPayload { verify_data: verify }) };
  let fin_raw = conn.encode_and_append_transcript(&fin_msg);
  conn.transmit_raw_flight(vec![fin_raw])
}

fn handle_server_finished<C: ConnectionCallbacks>(conn: &mut Connection<C>, msg: &ReassembledMessage) -> Result<(), EngineError> {
  let payload = match HandshakePayload::decode(HandshakeType::Finished, None, &mut Reader::init(&msg.body))? {
    HandshakePayload::Finished(p) => p,
    _ => unreachable!(),
  };
  let expected = verify_data(conn, b"server finished");
  if !bool::from(expected.as_slice().ct_eq(payload.verify_data.as_slice())) {
    return Err(EngineError::DecryptError);
  }
  conn.append_finished_to_transcript(msg);
  conn.transition(StateId::Client(ClientState::Connected))
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use tls_backend::Timer;
  use tls_core::msgs::enums::HandshakeType;
  use tls_crypto::RingCryptoProvider;

  use crate::connection::{Config, Connection, ConnectionCallbacks, Role};
  use crate::record::Variant;

  use super::*;

  struct NoopTimer;
  impl Timer for NoopTimer {
    fn start(&mut self, _duration_ms: u64) {}
    fn stop(&mut self) {}
    fn is_callback_executing(&self) -> bool { false }
  }

  struct NoopCallbacks;
  impl ConnectionCallbacks for NoopCallbacks {
    fn write_to_transport(&mut self, _bytes: &[u8]) {}
    fn write_to_comm_party(&mut self, _bytes: &[u8]) {}
  }

  #[derive(Default)]
  struct CapturingCallbacks {
    transport: Vec<u8>,
  }
  impl ConnectionCallbacks for CapturingCallbacks {
    fn write_to_transport(&mut self, bytes: &[u8]) { self.transport.extend_from_slice(bytes); }
    fn write_to_comm_party(&mut self, _bytes: &[u8]) {}
  }

  fn client_config() -> Config {
    Config {
      role: Role::Client,
      variant: Variant::Tls,
      cipher_suites: vec![tls_core::msgs::handshake::CipherSuiteId(0x00A8)],
      psk: None,
      certificates: None,
      cookie_verification_enabled: false,
      verification_secret: [0u8; 32],
      send_close_notify: true,
    }
  }

  fn connected_client() -> Connection<NoopCallbacks> {
    Connection::new(client_config(), Arc::new(RingCryptoProvider::new()), Box::new(NoopTimer), NoopCallbacks)
  }

  /// A `HelloRequest` is rejected outright rather than triggering
  /// renegotiation, regardless of which client state it arrives in — this
  /// stack never renegotiates (§4.4 Non-goals).
  #[test]
  fn hello_request_is_rejected_as_unsupported_renegotiation() {
    let mut conn = connected_client();
    let msg = ReassembledMessage {
      header: tls_core::msgs::handshake::HandshakeHeader {
        typ: HandshakeType::HelloRequest,
        length: 0,
        message_seq: 0,
        fragment_offset: 0,
        fragment_length: 0,
      },
      body: Vec::new(),
      retransmit: false,
    };
    let result = on_message(&mut conn, ClientState::Connected, &msg);
    assert!(matches!(result, Err(EngineError::NoRenegotiation)));
  }

  /// Driven through `Connection::fail` (the real `on_transport_bytes` path),
  /// a `HelloRequest` gets a Warning-level `NoRenegotiation` alert on the
  /// wire and the connection stays exactly where it was (§8 scenario 6).
  #[test]
  fn hello_request_survives_as_a_warning_alert_while_connected() {
    use tls_core::msgs::codec::{Codec, Reader};
    use tls_core::msgs::enums::{AlertDescription, AlertLevel, ContentType};
    use tls_core::msgs::message::{AlertMessage, OpaqueMessage};

    let mut conn =
      Connection::new(client_config(), Arc::new(RingCryptoProvider::new()), Box::new(NoopTimer), CapturingCallbacks::default());
    conn.state = StateId::Client(ClientState::Connected);

    let msg = ReassembledMessage {
      header: tls_core::msgs::handshake::HandshakeHeader {
        typ: HandshakeType::HelloRequest,
        length: 0,
        message_seq: 0,
        fragment_offset: 0,
        fragment_length: 0,
      },
      body: Vec::new(),
      retransmit: false,
    };
    let err = on_message(&mut conn, ClientState::Connected, &msg).unwrap_err();
    conn.fail(err);

    assert!(conn.is_connected());
    assert_eq!(conn.state, StateId::Client(ClientState::Connected));

    let mut r = Reader::init(&conn.callbacks.transport);
    let opaque = OpaqueMessage::read_tls(&mut r).expect("an alert record was written");
    assert_eq!(opaque.typ, ContentType::Alert);
    let mut body = Reader::init(&opaque.payload);
    let alert = AlertMessage::decode(&mut body).expect("a well-formed alert");
    assert_eq!(alert.level, AlertLevel::Warning);
    assert_eq!(alert.description, AlertDescription::NoRenegotiation);
  }
}
