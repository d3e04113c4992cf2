//! The dispatch-table handshake state machine (§4.4, Design Note §9):
//! client and server each get a small, exhaustively-matched state enum and a
//! handler per state. The match arms are the table — the compiler rejects
//! an incomplete one, which is what a runtime `(State, Event) -> fn` map
//! would only catch by testing.

pub mod client;
pub mod server;

use tls_core::msgs::enums::{AlertDescription, AlertLevel};

use crate::aggregator::ReassembledMessage;

/// The finite input alphabet every state reacts to (§4.4). Anything else is
/// a protocol error.
pub enum HandshakeEvent<'a> {
  OnEnter,
  OnHandshakeMessageReceived(&'a ReassembledMessage),
  OnChangeCipherMessageReceived,
  OnTimerEvent,
  OnAlertMessageReceived { level: AlertLevel, description: AlertDescription },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
  Disconnected,
  ClientHelloSent,
  ServerHelloReceived,
  ServerCertificateExchange,
  ServerKeyExchange,
  CertificateRequest,
  ServerHelloDone,
  ServerChangeCipherSpec,
  Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
  Disconnected,
  ClientHelloReceived,
  ClientKeyExchange,
  ClientChangeCipherSpec,
  Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateId {
  Client(ClientState),
  Server(ServerState),
}
