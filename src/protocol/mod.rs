//! MQTT 3.1 wire types shared by the codec, connection state machine, and
//! client library.

mod error;
mod packet;

pub use error::{DecodeError, EncodeError, ProtocolError};
pub use packet::{
    ConnAck, Connect, ConnectReturnCode, Packet, PubAck, Publish, SubAck, Subscribe, UnsubAck,
    Unsubscribe, Will,
};

/// The protocol name this broker accepts on CONNECT. MQTT 3.1 uses
/// "MQIsdp"; MQTT 3.1.1's "MQTT" is a different, unsupported version.
pub const PROTOCOL_NAME: &str = "MQIsdp";

/// The only protocol level this broker accepts.
pub const PROTOCOL_LEVEL: u8 = 3;

/// Quality of service level. The broker decodes all three wire values but
/// only ever delivers at `AtMostOnce`: QoS above that on an inbound PUBLISH
/// is a protocol violation that closes the connection (see the reader state
/// machine), and SUBACK always grants `AtLeastOnce` regardless of what was
/// requested without the broker tracking any acknowledgement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
