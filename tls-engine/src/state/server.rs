//! Server-side handshake handlers (§4.4 server happy path): 5 states,
//! plus the DTLS cookie exchange (RFC 6347 §4.2.1).

use subtle::ConstantTimeEq;

use tls_core::msgs::codec::{encode_vec_u8, Codec, Reader};
use tls_core::msgs::enums::{CompressionMethod, HandshakeType, SignatureScheme};
use tls_core::msgs::handshake::{
  cookie, session_id, CertificatePayload, ClientKeyExchangePayload, HandshakeMessage, HandshakePayload,
  HelloVerifyRequestPayload, KexFlavor, ServerHelloDonePayload, ServerHelloPayload, ServerKeyExchangePayload,
};
use tls_core::msgs::message::ChangeCipherSpecMessage;
use tls_core::suites::{Authentication, KeyExchange, MacAlgorithm};

use crate::aggregator::ReassembledMessage;
use crate::connection::{stage_security_parameters, verify_data, Connection, ConnectionCallbacks};
use crate::error::EngineError;
use crate::record::Variant;
use crate::state::{HandshakeEvent, ServerState, StateId};

pub(crate) fn dispatch<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  state: ServerState,
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

fn on_enter<C: ConnectionCallbacks>(conn: &mut Connection<C>, state: ServerState) -> Result<(), EngineError> {
  match state {
    ServerState::Connected => {
      conn.disarm_retry_timer();
      conn.callbacks.on_connected();
      tracing::info!(suite = ?conn.hs.selected_suite.map(|s| s.suite), "server handshake complete");
      Ok(())
    }
    _ => Ok(()),
  }
}

fn on_timer<C: ConnectionCallbacks>(conn: &mut Connection<C>, state: ServerState) -> Result<(), EngineError> {
  if conn.variant == Variant::Tls {
    return Err(EngineError::HandshakeFailure("handshake timed out".into()));
  }
  if matches!(state, ServerState::Disconnected | ServerState::Connected) {
    return Ok(());
  }
  conn.retransmit_last_flight()
}

fn on_ccs<C: ConnectionCallbacks>(conn: &mut Connection<C>, state: ServerState) -> Result<(), EngineError> {
  match state {
    ServerState::ClientKeyExchange => conn.transition(StateId::Server(ServerState::ClientChangeCipherSpec)),
    _ => Err(EngineError::UnexpectedMessage),
  }
}

fn on_message<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  state: ServerState,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  if msg.header.typ == HandshakeType::HelloRequest {
    return Err(EngineError::NoRenegotiation);
  }
  match (state, msg.header.typ) {
    (ServerState::Disconnected, HandshakeType::ClientHello) => handle_client_hello(conn, msg),
    (ServerState::ClientHelloReceived, HandshakeType::ClientKeyExchange) => handle_client_key_exchange(conn, msg),
    (ServerState::ClientChangeCipherSpec, HandshakeType::Finished) => handle_client_finished(conn, msg),
    _ => Err(EngineError::UnexpectedMessage),
  }
}

fn handle_client_hello<C: ConnectionCallbacks>(conn: &mut Connection<C>, msg: &ReassembledMessage) -> Result<(), EngineError> {
  let payload = match HandshakePayload::decode(HandshakeType::ClientHello, None, &mut Reader::init(&msg.body))? {
    HandshakePayload::ClientHello(p) => p,
    _ => unreachable!(),
  };

  let expected = conn.protocol_version();
  let dtls_downgrade = conn.variant == Variant::Dtls && payload.client_version == tls_core::msgs::enums::ProtocolVersion::DTLS1_0;
  if payload.client_version != expected && !dtls_downgrade {
    return Err(EngineError::UnexpectedVersion);
  }

  if conn.variant == Variant::Dtls && conn.config.cookie_verification_enabled {
    let offered = payload.cookie.as_ref().map(|c| c.bytes.as_slice()).unwrap_or(&[]);
    let expected_cookie = compute_cookie(conn, &payload)?;
    if offered != expected_cookie.as_slice() {
      // The corrected ClientHello the client resends after this also lands
      // at message_seq 0; without rewinding our own reassembly expectations
      // it reads as a retransmission of the message we just saw, not a new
      // one (§4.2).
      conn.aggregator.reset_dtls_sequence();
      return send_hello_verify_request(conn, expected_cookie);
    }
  }

  let suite = payload
    .cipher_suites
    .iter()
    .find_map(|offered| conn.config.cipher_suites.iter().find(|c| c.0 == offered.0))
    .and_then(|id| tls_core::suites::by_id(id.0))
    .ok_or_else(|| EngineError::HandshakeFailure("no mutually supported cipher suite".into()))?;

  conn.hs.client_random = Some(payload.random);
  conn.hs.selected_suite = Some(suite);
  conn.hs.kex_flavor = Some(match suite.kex {
    KeyExchange::Psk => KexFlavor::Psk,
    KeyExchange::EcdheX25519 => KexFlavor::Dh,
    KeyExchange::None => return Err(EngineError::InsufficientSecurity("negotiated suite has no key exchange".into())),
  });
  tracing::debug!(suite = ?suite.suite, "negotiated cipher suite");

  send_server_flight(conn)?;
  conn.transition(StateId::Server(ServerState::ClientHelloReceived))
}

fn compute_cookie<C: ConnectionCallbacks>(
  conn: &Connection<C>,
  payload: &tls_core::msgs::handshake::ClientHelloPayload,
) -> Result<Vec<u8>, EngineError> {
  let mac = conn.crypto.hmac(MacAlgorithm::HmacSha256, &conn.config.verification_secret, &payload.encode_for_cookie())?;
  Ok(mac[..32.min(mac.len())].to_vec())
}

fn send_hello_verify_request<C: ConnectionCallbacks>(conn: &mut Connection<C>, cookie_bytes: Vec<u8>) -> Result<(), EngineError> {
  let payload = HelloVerifyRequestPayload { server_version: conn.protocol_version(), cookie: cookie(cookie_bytes)? };
  // The server does not advance its own message-seq counter sending this
  // (§4.2); message_seq 0 is a placeholder that is never checked for
  // HelloVerifyRequest by the aggregator's exclusion rule.
  let raw = HandshakeMessage { message_seq: 0, payload: HandshakePayload::HelloVerifyRequest(payload) }.encode_for(conn.variant);
  conn.send_record(tls_core::msgs::enums::ContentType::Handshake, &raw)
}

fn handle_client_key_exchange<C: ConnectionCallbacks>(
  conn: &mut Connection<C>,
  msg: &ReassembledMessage,
) -> Result<(), EngineError> {
  let kex = conn.hs.kex_flavor.ok_or_else(|| EngineError::Internal("kex flavor not yet negotiated".into()))?;
  let payload = match HandshakePayload::decode(HandshakeType::ClientKeyExchange, Some(kex), &mut Reader::init(&msg.body))? {
    HandshakePayload::ClientKeyExchange(p) => p,
    _ => unreachable!(),
  };

  let pre_master_secret = match payload {
    ClientKeyExchangePayload::Psk { identity } => {
      let key = conn.crypto.psk_lookup(&identity)?;
      conn.hs.psk_identity = Some(identity);
      tls_core::key::psk_pre_master_secret(&key)
    }
    ClientKeyExchangePayload::Dh { public_key } => {
      let public_key: [u8; 32] =
        public_key.try_into().map_err(|_| EngineError::IllegalParameter("x25519 public key must be 32 bytes".into()))?;
      let private =
        conn.hs.own_x25519_private.take().ok_or_else(|| EngineError::Internal("no ephemeral key staged for agreement".into()))?;
      let shared = conn.crypto.x25519_agree(private, &public_key)?;
      conn.hs.peer_x25519_public = Some(public_key);
      shared.to_vec()
    }
  };

  stage_security_parameters(conn, &pre_master_secret)?;
  conn.transition(StateId::Server(ServerState::ClientKeyExchange))
}

fn handle_client_finished<C: ConnectionCallbacks>(conn: &mut Connection<C>, msg: &ReassembledMessage) -> Result<(), EngineError> {
  let payload = match HandshakePayload::decode(HandshakeType::Finished, None, &mut Reader::init(&msg.body))? {
    HandshakePayload::Finished(p) => p,
    _ => unreachable!(),
  };
  let expected = verify_data(conn, b"client finished");
  if !bool::from(expected.as_slice().ct_eq(payload.verify_data.as_slice())) {
    return Err(EngineError::DecryptError);
  }
  conn.append_finished_to_transcript(msg);

  conn.send_record(tls_core::msgs::enums::ContentType::ChangeCipherSpec, &ChangeCipherSpecMessage.get_encoding())?;
  conn.record.activate_pending_write()?;
  let verify = verify_data(conn, b"server finished");
  let seq = conn.next_message_seq();
  let fin_msg = HandshakeMessage {
    message_seq: seq,
    payload: HandshakePayload::Finished(tls_core::msgs::handshake::FinishedPayload { verify_data: verify }),
  };
  let fin_raw = conn.encode_and_append_transcript(&fin_msg);
  conn.transmit_raw_flight(vec![fin_raw])?;

  conn.transition(StateId::Server(ServerState::Connected))
}

/// Sends ServerHello, [Certificate], [ServerKeyExchange], [CertificateRequest],
/// ServerHelloDone as one flight (§4.4).
fn send_server_flight<C: ConnectionCallbacks>(conn: &mut Connection<C>) -> Result<(), EngineError> {
  let suite = conn.hs.selected_suite.expect("suite set before building the server flight");
  let kex = conn.hs.kex_flavor.expect("kex flavor set before building the server flight");

  let mut bytes = [0u8; 32];
  conn.crypto.random(&mut bytes)?;
  let server_random = tls_core::msgs::handshake::Random(bytes);
  conn.hs.server_random = Some(server_random);

  let mut messages = Vec::new();

  let seq = conn.next_message_seq();
  messages.push(HandshakeMessage {
    message_seq: seq,
    payload: HandshakePayload::ServerHello(ServerHelloPayload {
      server_version: conn.protocol_version(),
      random: server_random,
      session_id: session_id(Vec::new())?,
      cipher_suite: tls_core::msgs::handshake::CipherSuiteId(suite.id),
      compression_method: CompressionMethod::Null,
      extensions: Vec::new(),
    }),
  });

  if suite.auth == Authentication::Ed25519 {
    let labels = conn
      .config
      .certificates
      .clone()
      .ok_or_else(|| EngineError::BadCertificate("ECDHE-ECDSA suite selected but no certificate configured".into()))?;
    let seq = conn.next_message_seq();
    messages.push(HandshakeMessage {
      message_seq: seq,
      payload: HandshakePayload::Certificate(CertificatePayload(labels.own_cert_chain.clone())),
    });

    let (private, public) = conn.crypto.x25519_generate()?;
    conn.hs.own_x25519_public = Some(public);

    let named_group = suite.group().expect("ECDHE suite always has a named group");
    let mut signed = Vec::new();
    signed.extend_from_slice(&conn.hs.client_random.expect("client random set by ClientHello").0);
    signed.extend_from_slice(&server_random.0);
    signed.extend_from_slice(&ServerKeyExchangePayload::ec_params(named_group));
    encode_vec_u8(1, &public, &mut signed);
    let signature = conn.crypto.ed25519_sign(&labels.own_key_uuid, &signed)?;

    let seq = conn.next_message_seq();
    messages.push(HandshakeMessage {
      message_seq: seq,
      payload: HandshakePayload::ServerKeyExchange(ServerKeyExchangePayload::Dh {
        named_group,
        public_key: public.to_vec(),
        scheme: SignatureScheme::ED25519,
        signature,
      }),
    });
    conn.hs.own_x25519_private = Some(private);
  } else if kex == KexFlavor::Psk {
    let psk_cfg = conn.config.psk.clone().ok_or_else(|| EngineError::PskIdentityNotFound("no PSK configured".into()))?;
    let seq = conn.next_message_seq();
    messages.push(HandshakeMessage {
      message_seq: seq,
      payload: HandshakePayload::ServerKeyExchange(ServerKeyExchangePayload::Psk { identity_hint: psk_cfg.hint }),
    });
  }

  let seq = conn.next_message_seq();
  messages.push(HandshakeMessage { message_seq: seq, payload: HandshakePayload::ServerHelloDone(ServerHelloDonePayload) });

  conn.send_handshake_flight(messages)
}

trait EncodeFor {
  fn encode_for(&self, variant: Variant) -> Vec<u8>;
}

impl EncodeFor for HandshakeMessage {
  fn encode_for(&self, variant: Variant) -> Vec<u8> {
    if variant == Variant::Dtls { self.encode_dtls() } else { self.encode_tls() }
  }
}
