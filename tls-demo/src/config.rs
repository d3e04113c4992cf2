//! CLI + layered file/env configuration for the demo binary. Keeps `clap`
//! and `config` out of the core crates — they stay embeddable without this
//! binary's dependency surface.

use std::fs;

use clap::Parser;
use serde::Deserialize;
use tls_core::msgs::handshake::CipherSuiteId;
use tls_engine::{CertificateLabels, PskConfig, Role, Variant};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
  #[arg(short, long, default_value = "config.toml")]
  config: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
  role: String,
  variant: String,
  #[serde(default = "default_cipher_suites")]
  cipher_suites: Vec<String>,
  #[serde(default)]
  psk_hint: String,
  #[serde(default)]
  psk_identity: String,
  #[serde(default)]
  psk_key_hex: String,
  #[serde(default)]
  trust_root_path: String,
  #[serde(default)]
  own_cert_path: String,
  #[serde(default)]
  own_key_path: String,
  #[serde(default)]
  own_key_uuid: String,
  #[serde(default)]
  cookie_verification_enabled: bool,
  #[serde(default = "default_verification_secret")]
  verification_secret_hex: String,
  #[serde(default = "default_listen")]
  listen: String,
  #[serde(default = "default_true")]
  send_close_notify: bool,
}

fn default_cipher_suites() -> Vec<String> { vec!["0xC02B".into()] }
fn default_verification_secret() -> String { "00".repeat(32) }
fn default_listen() -> String { "127.0.0.1:8443".into() }
fn default_true() -> bool { true }

/// The demo's fully-resolved configuration: a `role`/`variant` pair plus
/// everything needed to build a `tls_engine::Config` and a transport
/// endpoint (§6 Configuration surface).
#[derive(Debug)]
pub struct Config {
  pub role: Role,
  pub variant: Variant,
  pub cipher_suites: Vec<CipherSuiteId>,
  pub psk: Option<PskConfig>,
  /// The actual shared secret, handed to `RingCryptoProvider::with_psk` —
  /// kept out of `tls_engine::PskConfig`, which only carries the identity
  /// and hint the wire protocol exchanges.
  pub psk_key: Vec<u8>,
  pub certificates: Option<CertificateLabels>,
  /// PKCS#8 DER of this endpoint's own signing key, handed to
  /// `RingCryptoProvider::with_signing_key` under `own_key_uuid`'s label.
  pub own_key_der: Vec<u8>,
  pub cookie_verification_enabled: bool,
  pub verification_secret: [u8; 32],
  pub listen: String,
  pub send_close_notify: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("config source error: {0}")]
  Source(#[from] config::ConfigError),
  #[error("invalid role {0:?}, expected \"client\" or \"server\"")]
  InvalidRole(String),
  #[error("invalid variant {0:?}, expected \"tls\" or \"dtls\"")]
  InvalidVariant(String),
  #[error("invalid cipher suite id {0:?}")]
  InvalidCipherSuite(String),
  #[error("invalid hex in {0}: {1}")]
  InvalidHex(&'static str, hex::FromHexError),
  #[error("verification_secret_hex must decode to exactly 32 bytes, got {0}")]
  WrongSecretLen(usize),
}

/// Parses CLI args, loads `config.toml` if present, then lets `TLSDEMO_*`
/// environment variables override individual fields (mirrors the teacher's
/// `NOTARY_*` convention, one prefix per binary).
pub fn read_config() -> Result<Config, ConfigError> {
  let args = Args::parse();

  let builder = config::Config::builder()
    .set_default("role", "client")?
    .set_default("variant", "tls")?
    .set_default("listen", default_listen())?
    .set_default("cookie_verification_enabled", false)?
    .set_default("send_close_notify", true)?;

  let config_file = args.config;
  let builder = if fs::metadata(&config_file).is_ok() {
    builder.add_source(config::File::new(&config_file, config::FileFormat::Toml))
  } else {
    builder
  };

  let builder =
    builder.add_source(config::Environment::with_prefix("TLSDEMO").try_parsing(true).separator("_"));

  let raw: RawConfig = builder.build()?.try_deserialize()?;
  parse(raw)
}

fn parse(raw: RawConfig) -> Result<Config, ConfigError> {
  let role = match raw.role.as_str() {
    "client" => Role::Client,
    "server" => Role::Server,
    other => return Err(ConfigError::InvalidRole(other.to_string())),
  };
  let variant = match raw.variant.as_str() {
    "tls" => Variant::Tls,
    "dtls" => Variant::Dtls,
    other => return Err(ConfigError::InvalidVariant(other.to_string())),
  };

  let cipher_suites = raw
    .cipher_suites
    .iter()
    .map(|s| {
      let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
      u16::from_str_radix(trimmed, 16)
        .map(CipherSuiteId)
        .map_err(|_| ConfigError::InvalidCipherSuite(s.clone()))
    })
    .collect::<Result<Vec<_>, _>>()?;

  let psk_key =
    if raw.psk_key_hex.is_empty() { Vec::new() } else { hex::decode(&raw.psk_key_hex).map_err(|e| ConfigError::InvalidHex("psk_key_hex", e))? };
  let psk = if raw.psk_identity.is_empty() {
    None
  } else {
    Some(PskConfig { identity: raw.psk_identity.into_bytes(), hint: raw.psk_hint.into_bytes() })
  };

  let certificates = if !raw.trust_root_path.is_empty() || !raw.own_cert_path.is_empty() {
    let trust_root = if raw.trust_root_path.is_empty() {
      Vec::new()
    } else {
      load_first_der(&raw.trust_root_path)?
    };
    let own_cert_chain =
      if raw.own_cert_path.is_empty() { Vec::new() } else { vec![load_first_der(&raw.own_cert_path)?] };
    Some(CertificateLabels { trust_root, own_cert_chain, own_key_uuid: raw.own_key_uuid })
  } else {
    None
  };
  let own_key_der = if raw.own_key_path.is_empty() { Vec::new() } else { load_first_der(&raw.own_key_path)? };

  let secret_bytes =
    hex::decode(&raw.verification_secret_hex).map_err(|e| ConfigError::InvalidHex("verification_secret_hex", e))?;
  if secret_bytes.len() != 32 {
    return Err(ConfigError::WrongSecretLen(secret_bytes.len()));
  }
  let mut verification_secret = [0u8; 32];
  verification_secret.copy_from_slice(&secret_bytes);

  Ok(Config {
    role,
    variant,
    cipher_suites,
    psk,
    psk_key,
    certificates,
    own_key_der,
    cookie_verification_enabled: raw.cookie_verification_enabled,
    verification_secret,
    listen: raw.listen,
    send_close_notify: raw.send_close_notify,
  })
}

/// Reads a PEM file and returns the DER of its first entry, whatever type.
fn load_first_der(path: &str) -> Result<Vec<u8>, ConfigError> {
  let bytes = fs::read(path).map_err(|_| ConfigError::InvalidRole(format!("cannot read {path}")))?;
  let mut reader = std::io::BufReader::new(bytes.as_slice());
  loop {
    match rustls_pemfile::read_one(&mut reader) {
      Ok(Some(rustls_pemfile::Item::X509Certificate(der))) => return Ok(der),
      Ok(Some(rustls_pemfile::Item::PKCS8Key(der))) => return Ok(der),
      Ok(Some(rustls_pemfile::Item::RSAKey(der))) => return Ok(der),
      Ok(Some(_)) => continue,
      Ok(None) => return Err(ConfigError::InvalidRole(format!("no PEM entries in {path}"))),
      Err(_) => return Err(ConfigError::InvalidRole(format!("malformed PEM in {path}"))),
    }
  }
}
