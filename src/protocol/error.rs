//! Protocol error types

use std::fmt;

/// Errors that can occur while decoding a frame from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes buffered yet; caller should read more and retry.
    InsufficientData,
    /// The fixed header names a packet type this broker does not know.
    InvalidPacketType(u8),
    /// Remaining-length varint did not terminate within 4 bytes.
    InvalidRemainingLength,
    /// CONNECT protocol name was neither `MQIsdp` (expected) nor recognized.
    InvalidProtocolName,
    /// CONNECT protocol version byte was not 3.
    InvalidProtocolVersion(u8),
    /// A QoS field carried the reserved value 3.
    InvalidQoS(u8),
    /// A length-prefixed string was not valid UTF-8.
    InvalidUtf8,
    /// Packet-level flags did not match the fixed values MQTT 3.1 requires.
    InvalidFlags,
    /// Catch-all for structurally broken packets.
    MalformedPacket(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidProtocolName => write!(f, "invalid protocol name"),
            Self::InvalidProtocolVersion(v) => write!(f, "invalid protocol version: {}", v),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur while encoding a frame to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A string or binary field exceeded the 16-bit length prefix.
    FieldTooLong,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldTooLong => write!(f, "field exceeds maximum encodable length"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// High-level protocol violations raised by the connection state machine,
/// as distinct from low-level decode/encode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Decode(DecodeError),
    Encode(EncodeError),
    /// A frame kind was not legal in the connection's current state (see
    /// the reader state machine's transition table).
    Violation(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::Violation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        ProtocolError::Decode(e)
    }
}

impl From<EncodeError> for ProtocolError {
    fn from(e: EncodeError) -> Self {
        ProtocolError::Encode(e)
    }
}
