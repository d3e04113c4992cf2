//! End-to-end scenarios: two `Connection`s wired to each other through an
//! in-memory channel, driven only through the public API.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use tls_backend::Timer;
use tls_core::msgs::enums::AlertDescription;
use tls_core::msgs::handshake::CipherSuiteId;
use tls_crypto::RingCryptoProvider;
use tls_engine::{CertificateLabels, Config, Connection, ConnectionCallbacks, PskConfig, Role, Variant};

const PSK_SUITE: CipherSuiteId = CipherSuiteId(0x00A8); // TLS_PSK_WITH_AES_128_GCM_SHA256
const ECDHE_SUITE: CipherSuiteId = CipherSuiteId(0xC02B); // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256

fn base_config(role: Role, variant: Variant, suites: Vec<CipherSuiteId>) -> Config {
  Config {
    role,
    variant,
    cipher_suites: suites,
    psk: None,
    certificates: None,
    cookie_verification_enabled: false,
    verification_secret: [7u8; 32],
    send_close_notify: true,
  }
}

fn psk_config(role: Role, variant: Variant, identity: Vec<u8>) -> Config {
  let mut config = base_config(role, variant, vec![PSK_SUITE]);
  config.psk = Some(PskConfig { identity, hint: b"hint".to_vec() });
  config
}

/// A timer that never fires on its own; tests decide exactly when to call
/// `Connection::on_timer_event` to simulate expiry (§5: the timer is the
/// only asynchronous input, and nothing about its wiring is under test here).
#[derive(Default)]
struct ManualTimer;
impl Timer for ManualTimer {
  fn start(&mut self, _duration_ms: u64) {}
  fn stop(&mut self) {}
  fn is_callback_executing(&self) -> bool { false }
}

#[derive(Default)]
struct Recorder {
  connected: bool,
  disconnected: Option<AlertDescription>,
  received: Vec<u8>,
}

struct Harness {
  out: Rc<RefCell<VecDeque<Vec<u8>>>>,
  state: Rc<RefCell<Recorder>>,
}

impl ConnectionCallbacks for Harness {
  fn write_to_transport(&mut self, bytes: &[u8]) { self.out.borrow_mut().push_back(bytes.to_vec()); }

  fn write_to_comm_party(&mut self, bytes: &[u8]) { self.state.borrow_mut().received.extend_from_slice(bytes); }

  fn on_connected(&mut self) { self.state.borrow_mut().connected = true; }

  fn on_disconnected(&mut self, alert: Option<AlertDescription>) { self.state.borrow_mut().disconnected = alert; }
}

struct Peer {
  conn: Connection<Harness>,
  out: Rc<RefCell<VecDeque<Vec<u8>>>>,
  state: Rc<RefCell<Recorder>>,
}

fn make_peer(config: Config, crypto: Arc<RingCryptoProvider>) -> Peer {
  let out = Rc::new(RefCell::new(VecDeque::new()));
  let state = Rc::new(RefCell::new(Recorder::default()));
  let callbacks = Harness { out: out.clone(), state: state.clone() };
  let conn = Connection::new(config, crypto, Box::new(ManualTimer), callbacks);
  Peer { conn, out, state }
}

/// Drains whatever each side has queued and hands it to the other, back and
/// forth, until neither side has anything left to deliver or the round cap
/// is hit (a stuck exchange is a test failure, not a silent pass).
fn pump(a: &mut Peer, b: &mut Peer) {
  for _ in 0..32 {
    let mut moved = false;
    while let Some(pkt) = a.out.borrow_mut().pop_front() {
      b.conn.on_transport_bytes(&pkt).unwrap();
      moved = true;
    }
    while let Some(pkt) = b.out.borrow_mut().pop_front() {
      a.conn.on_transport_bytes(&pkt).unwrap();
      moved = true;
    }
    if !moved {
      break;
    }
  }
}

fn ed25519_cert_and_key() -> (Vec<u8>, Vec<u8>) {
  use ring::signature::{Ed25519KeyPair, KeyPair};
  const ED25519_SPKI_PREFIX: [u8; 12] = [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
  let rng = ring::rand::SystemRandom::new();
  let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
  let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
  let mut cert = ED25519_SPKI_PREFIX.to_vec();
  cert.extend_from_slice(pair.public_key().as_ref());
  (cert, pkcs8.as_ref().to_vec())
}

#[test]
fn psk_handshake_completes_and_carries_application_data() {
  let identity = b"device-42".to_vec();
  let key = b"0123456789abcdef".to_vec();
  let crypto = Arc::new(RingCryptoProvider::new().with_psk(identity.clone(), key));

  let mut client = make_peer(psk_config(Role::Client, Variant::Tls, identity.clone()), crypto.clone());
  let mut server = make_peer(psk_config(Role::Server, Variant::Tls, identity), crypto);

  client.conn.open().unwrap();
  pump(&mut client, &mut server);

  assert!(client.state.borrow().connected);
  assert!(server.state.borrow().connected);

  client.conn.send_application_data(b"ping").unwrap();
  pump(&mut client, &mut server);
  assert_eq!(server.state.borrow().received, b"ping");
}

#[test]
fn dtls_server_requires_a_cookie_before_completing_the_handshake() {
  let identity = b"dev".to_vec();
  let key = b"fedcba9876543210".to_vec();
  let crypto = Arc::new(RingCryptoProvider::new().with_psk(identity.clone(), key));

  let mut client = make_peer(psk_config(Role::Client, Variant::Dtls, identity.clone()), crypto.clone());

  let mut server_config = psk_config(Role::Server, Variant::Dtls, identity);
  server_config.cookie_verification_enabled = true;
  let mut server = make_peer(server_config, crypto);

  client.conn.open().unwrap();
  pump(&mut client, &mut server);
  assert!(client.state.borrow().connected, "cookie round trip must not block the handshake from completing");
  assert!(server.state.borrow().connected);
}

#[test]
fn ecdhe_ecdsa_handshake_completes_with_certificate_verification() {
  let (server_cert, server_pkcs8) = ed25519_cert_and_key();

  let server_crypto =
    Arc::new(RingCryptoProvider::new().with_signing_key("server-key", &server_pkcs8).unwrap());
  let client_crypto = Arc::new(RingCryptoProvider::new().with_trust_anchor(server_cert.clone()));

  let mut server_config = base_config(Role::Server, Variant::Tls, vec![ECDHE_SUITE]);
  server_config.certificates =
    Some(CertificateLabels { trust_root: Vec::new(), own_cert_chain: vec![server_cert], own_key_uuid: "server-key".into() });
  let mut server = make_peer(server_config, server_crypto);

  let mut client = make_peer(base_config(Role::Client, Variant::Tls, vec![ECDHE_SUITE]), client_crypto);

  client.conn.open().unwrap();
  pump(&mut client, &mut server);

  assert!(client.state.borrow().connected);
  assert!(server.state.borrow().connected);

  server.conn.send_application_data(b"served over x25519+ed25519").unwrap();
  pump(&mut client, &mut server);
  assert_eq!(client.state.borrow().received, b"served over x25519+ed25519");
}

/// A leaf whose SPKI doesn't match the client's pinned trust anchor must
/// fail the handshake rather than being accepted regardless of content —
/// `verify_chain` is a real check, not a pass-through.
#[test]
fn ecdhe_ecdsa_handshake_fails_when_leaf_key_does_not_match_pinned_trust_anchor() {
  let (server_cert, server_pkcs8) = ed25519_cert_and_key();
  let (wrong_cert, _unused_pkcs8) = ed25519_cert_and_key();

  let server_crypto =
    Arc::new(RingCryptoProvider::new().with_signing_key("server-key", &server_pkcs8).unwrap());
  let client_crypto = Arc::new(RingCryptoProvider::new().with_trust_anchor(wrong_cert));

  let mut server_config = base_config(Role::Server, Variant::Tls, vec![ECDHE_SUITE]);
  server_config.certificates =
    Some(CertificateLabels { trust_root: Vec::new(), own_cert_chain: vec![server_cert], own_key_uuid: "server-key".into() });
  let mut server = make_peer(server_config, server_crypto);

  let mut client = make_peer(base_config(Role::Client, Variant::Tls, vec![ECDHE_SUITE]), client_crypto);

  client.conn.open().unwrap();
  while let Some(pkt) = client.out.borrow_mut().pop_front() {
    server.conn.on_transport_bytes(&pkt).unwrap();
  }
  // Stop feeding the client once it has disconnected: it won't accept any
  // more transport bytes, and the rest of the server's flight is moot.
  while client.state.borrow().disconnected.is_none() {
    let Some(pkt) = server.out.borrow_mut().pop_front() else { break };
    client.conn.on_transport_bytes(&pkt).unwrap();
  }

  assert!(!client.state.borrow().connected);
  assert_eq!(client.state.borrow().disconnected, Some(AlertDescription::BadCertificate));
}

#[test]
fn corrupted_application_record_disconnects_instead_of_delivering_garbage() {
  let identity = b"dev".to_vec();
  let key = b"0123456789abcdef".to_vec();
  let crypto = Arc::new(RingCryptoProvider::new().with_psk(identity.clone(), key));

  let mut client = make_peer(psk_config(Role::Client, Variant::Tls, identity.clone()), crypto.clone());
  let mut server = make_peer(psk_config(Role::Server, Variant::Tls, identity), crypto);

  client.conn.open().unwrap();
  pump(&mut client, &mut server);
  assert!(server.state.borrow().connected);

  client.conn.send_application_data(b"trust me").unwrap();
  let mut tampered = client.out.borrow_mut().pop_front().expect("one queued application record");
  *tampered.last_mut().unwrap() ^= 0xFF;
  server.conn.on_transport_bytes(&tampered).unwrap();

  assert!(server.state.borrow().received.is_empty(), "no partial application data after a decrypt failure");
  assert_eq!(server.state.borrow().disconnected, Some(AlertDescription::BadRecordMac));
}

#[test]
fn dtls_client_retransmits_client_hello_after_a_lost_flight() {
  let identity = b"dev".to_vec();
  let key = b"0123456789abcdef".to_vec();
  let crypto = Arc::new(RingCryptoProvider::new().with_psk(identity.clone(), key));

  let mut client = make_peer(psk_config(Role::Client, Variant::Dtls, identity.clone()), crypto.clone());
  let mut server = make_peer(psk_config(Role::Server, Variant::Dtls, identity), crypto);

  client.conn.open().unwrap();
  // Drop the first ClientHello flight on the floor (simulates packet loss)
  // instead of delivering it, then force the retry timer.
  client.out.borrow_mut().clear();
  client.conn.on_timer_event().unwrap();
  assert_eq!(client.out.borrow().len(), 1, "timer expiry must resend the dropped flight");

  pump(&mut client, &mut server);

  assert!(client.state.borrow().connected);
  assert!(server.state.borrow().connected);
}

