pub mod codec;
pub mod enums;
pub mod handshake;
pub mod message;
