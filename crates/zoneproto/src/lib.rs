//! `zoneproto`: the binary lobby protocol spoken by zoned.
//!
//! All messages travel inside a `zoneio::frame` length-prefixed frame:
//! - outer framing: `u32` little-endian byte length + payload
//! - payload: first byte is a message type; remaining bytes are type-specific
//!
//! Primitive encodings are little-endian throughout; strings are a `u16`
//! little-endian byte length followed by UTF-8 bytes. A frame whose body does
//! not consume exactly the declared length is malformed.

pub mod lobby;
pub mod session;
pub mod wire;

#[derive(Debug, Clone)]
pub enum ProtoError {
    TooShort { need: usize, got: usize },
    UnknownType { code: u8, remaining: usize },
    Malformed(&'static str),
    VersionMismatch { got: i32 },
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::TooShort { need, got } => {
                write!(f, "message too short: need {need}, got {got}")
            }
            ProtoError::UnknownType { code, remaining } => {
                write!(f, "unknown message type: 0x{code:02x} ({remaining} bytes buffered)")
            }
            ProtoError::Malformed(s) => write!(f, "malformed message: {s}"),
            ProtoError::VersionMismatch { got } => {
                write!(f, "protocol version mismatch: client sent {got}")
            }
        }
    }
}

impl std::error::Error for ProtoError {}
