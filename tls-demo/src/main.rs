//! Thin glue over the library crates: reads a `Config`, builds a
//! `Connection` against a real socket, and drives the client or server
//! happy path over loopback — mirroring the teacher's `src/bin/tlsnotary.rs`
//! pattern of a small binary wiring config straight into library calls.

mod config;

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tls_core::msgs::enums::AlertDescription;
use tls_crypto::{RingCryptoProvider, StdTimer};
use tls_engine::{Connection, ConnectionCallbacks, Role, Variant};
use tracing::{error, info};

use crate::config::Config;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Transport {
  Tcp(TcpStream),
  Udp(UdpSocket),
}

impl Transport {
  fn send(&self, bytes: &[u8]) {
    match self {
      Transport::Tcp(s) => {
        let mut s = s.try_clone().expect("tcp clone");
        if let Err(e) = s.write_all(bytes) {
          error!(error = %e, "transport write failed");
        }
      }
      Transport::Udp(s) => {
        if let Err(e) = s.send(bytes) {
          error!(error = %e, "transport send failed");
        }
      }
    }
  }

  /// Reads whatever is available within `POLL_INTERVAL`; `Ok(0)` means the
  /// poll window elapsed with nothing to deliver, not end-of-stream.
  fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    match self {
      Transport::Tcp(s) => {
        s.set_read_timeout(Some(POLL_INTERVAL))?;
        match s.read(buf) {
          Ok(n) => Ok(n),
          Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(0),
          Err(e) => Err(e),
        }
      }
      Transport::Udp(s) => {
        s.set_read_timeout(Some(POLL_INTERVAL))?;
        match s.recv(buf) {
          Ok(n) => Ok(n),
          Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(0),
          Err(e) => Err(e),
        }
      }
    }
  }
}

/// Forwards `write_to_transport` straight to the socket and prints
/// delivered application data to stdout — a stand-in for `write_to_comm_party`
/// wiring into a real local application.
struct DemoCallbacks {
  transport: Arc<Mutex<Transport>>,
  connected: Arc<Mutex<bool>>,
}

impl ConnectionCallbacks for DemoCallbacks {
  fn write_to_transport(&mut self, bytes: &[u8]) {
    self.transport.lock().unwrap().send(bytes);
  }

  fn write_to_comm_party(&mut self, bytes: &[u8]) {
    info!(len = bytes.len(), "application data delivered to local app");
    let _ = io::stdout().write_all(bytes);
    let _ = io::stdout().write_all(b"\n");
  }

  fn on_connected(&mut self) {
    *self.connected.lock().unwrap() = true;
    info!("handshake complete");
  }

  fn on_disconnected(&mut self, alert: Option<AlertDescription>) {
    info!(?alert, "connection closed");
  }
}

/// Forwards `Timer` calls to a shared `StdTimer` so the main loop can poll
/// the same clock the `Connection` armed (§5: the timer is the only
/// asynchronous input, delivered back in as an ordinary event).
struct SharedTimer(Arc<Mutex<StdTimer>>);

impl tls_backend::Timer for SharedTimer {
  fn start(&mut self, duration_ms: u64) { self.0.lock().unwrap().start(duration_ms); }
  fn stop(&mut self) { self.0.lock().unwrap().stop(); }
  fn is_callback_executing(&self) -> bool { self.0.lock().unwrap().is_callback_executing() }
}

fn build_crypto(config: &Config) -> Arc<RingCryptoProvider> {
  let mut provider = RingCryptoProvider::new();
  if let Some(certs) = &config.certificates {
    if !certs.own_cert_chain.is_empty() && !config.own_key_der.is_empty() {
      provider = provider
        .with_signing_key(&certs.own_key_uuid, &config.own_key_der)
        .expect("own signing key must be valid PKCS#8");
    }
    if !certs.trust_root.is_empty() {
      provider = provider.with_trust_anchor(certs.trust_root.clone());
    }
  }
  if let Some(psk) = &config.psk {
    provider = provider.with_psk(psk.identity.clone(), config.psk_key.clone());
  }
  Arc::new(provider)
}

fn build_transport(config: &Config) -> io::Result<Transport> {
  match (config.role, config.variant) {
    (Role::Client, Variant::Tls) => Ok(Transport::Tcp(TcpStream::connect(&config.listen)?)),
    (Role::Server, Variant::Tls) => {
      let listener = TcpListener::bind(&config.listen)?;
      info!(addr = %config.listen, "waiting for a TLS peer");
      let (stream, peer) = listener.accept()?;
      info!(%peer, "accepted TLS peer");
      Ok(Transport::Tcp(stream))
    }
    (Role::Client, Variant::Dtls) => {
      let socket = UdpSocket::bind("0.0.0.0:0")?;
      socket.connect(&config.listen)?;
      Ok(Transport::Udp(socket))
    }
    (Role::Server, Variant::Dtls) => {
      let socket = UdpSocket::bind(&config.listen)?;
      info!(addr = %config.listen, "waiting for a DTLS peer");
      let mut probe = [0u8; 2048];
      let (n, peer) = socket.recv_from(&mut probe)?;
      socket.connect(peer)?;
      info!(%peer, "accepted DTLS peer");
      // Re-deliver the datagram that woke us up — `connect()` above doesn't
      // replay it, and it's almost certainly the opening ClientHello.
      socket.send_to(&probe[..n], peer).ok();
      Ok(Transport::Udp(socket))
    }
  }
}

fn main() {
  tracing_subscriber::fmt::try_init().ok();

  let config = match config::read_config() {
    Ok(c) => c,
    Err(e) => {
      eprintln!("configuration error: {e}");
      std::process::exit(1);
    }
  };

  let crypto = build_crypto(&config);
  let transport = match build_transport(&config) {
    Ok(t) => Arc::new(Mutex::new(t)),
    Err(e) => {
      eprintln!("transport setup failed: {e}");
      std::process::exit(1);
    }
  };

  let engine_config = tls_engine::Config {
    role: config.role,
    variant: config.variant,
    cipher_suites: config.cipher_suites.clone(),
    psk: config.psk.clone(),
    certificates: config.certificates.clone(),
    cookie_verification_enabled: config.cookie_verification_enabled,
    verification_secret: config.verification_secret,
    send_close_notify: config.send_close_notify,
  };

  let timer_handle = Arc::new(Mutex::new(StdTimer::new()));
  let connected = Arc::new(Mutex::new(false));
  let callbacks = DemoCallbacks { transport: transport.clone(), connected: connected.clone() };
  let timer = Box::new(SharedTimer(timer_handle.clone()));

  let mut conn = Connection::new(engine_config, crypto, timer, callbacks);

  if config.role == Role::Client {
    if let Err(e) = conn.open() {
      eprintln!("failed to start handshake: {e}");
      std::process::exit(1);
    }
  }

  let mut buf = [0u8; 16 * 1024];
  let mut announced_app_data = false;
  loop {
    if timer_handle.lock().unwrap().poll_expired() {
      if let Err(e) = conn.on_timer_event() {
        error!(error = %e, "timer event handling failed");
      }
      timer_handle.lock().unwrap().callback_finished();
    }

    let n = match transport.lock().unwrap().recv(&mut buf) {
      Ok(n) => n,
      Err(e) => {
        error!(error = %e, "transport read failed");
        break;
      }
    };
    if n > 0 {
      if let Err(e) = conn.on_transport_bytes(&buf[..n]) {
        error!(error = %e, "handshake/record processing failed");
      }
    }

    if *connected.lock().unwrap() && config.role == Role::Client && !announced_app_data {
      announced_app_data = true;
      let _ = conn.send_application_data(b"hello over a real TLS 1.2 record layer");
    }
  }
}
