//! MQTT 3.1 packet encoding.

use bytes::{BufMut, BytesMut};

use super::{write_binary, write_string, write_variable_int};
use crate::protocol::{EncodeError, Packet, PROTOCOL_LEVEL, PROTOCOL_NAME};

/// Encodes MQTT 3.1 packets to their wire representation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => {
                let mut remaining_length = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
                remaining_length += 2 + p.client_id.len();
                if let Some(will) = &p.will {
                    remaining_length += 2 + will.topic.len();
                    remaining_length += 2 + will.payload.len();
                }
                if let Some(username) = &p.username {
                    remaining_length += 2 + username.len();
                }
                if let Some(password) = &p.password {
                    remaining_length += 2 + password.len();
                }

                buf.put_u8(0x10);
                write_variable_int(buf, remaining_length as u32);

                write_string(buf, PROTOCOL_NAME)?;
                buf.put_u8(PROTOCOL_LEVEL);

                let mut flags = 0u8;
                if p.clean_session {
                    flags |= 0x02;
                }
                if let Some(will) = &p.will {
                    flags |= 0x04;
                    flags |= (will.qos.as_u8()) << 3;
                    if will.retain {
                        flags |= 0x20;
                    }
                }
                if p.password.is_some() {
                    flags |= 0x40;
                }
                if p.username.is_some() {
                    flags |= 0x80;
                }
                buf.put_u8(flags);

                buf.put_u16(p.keep_alive);
                write_string(buf, &p.client_id)?;

                if let Some(will) = &p.will {
                    write_string(buf, &will.topic)?;
                    write_binary(buf, &will.payload)?;
                }
                if let Some(username) = &p.username {
                    write_string(buf, username)?;
                }
                if let Some(password) = &p.password {
                    write_binary(buf, password)?;
                }

                Ok(())
            }
            Packet::ConnAck(p) => {
                buf.put_u8(0x20);
                write_variable_int(buf, 2);
                buf.put_u8(0x00); // this broker never sets session-present
                buf.put_u8(p.return_code as u8);
                Ok(())
            }
            Packet::Publish(p) => {
                let mut remaining_length = 2 + p.topic.len();
                if p.packet_id.is_some() {
                    remaining_length += 2;
                }
                remaining_length += p.payload.len();

                let mut first_byte: u8 = 0x30;
                if p.dup {
                    first_byte |= 0x08;
                }
                first_byte |= p.qos.as_u8() << 1;
                if p.retain {
                    first_byte |= 0x01;
                }
                buf.put_u8(first_byte);
                write_variable_int(buf, remaining_length as u32);

                write_string(buf, &p.topic)?;
                if let Some(packet_id) = p.packet_id {
                    buf.put_u16(packet_id);
                }
                buf.put_slice(&p.payload);
                Ok(())
            }
            Packet::PubAck(p) => {
                buf.put_u8(0x40);
                write_variable_int(buf, 2);
                buf.put_u16(p.packet_id);
                Ok(())
            }
            Packet::Subscribe(p) => {
                let mut remaining_length = 2;
                for (filter, _) in &p.filters {
                    remaining_length += 2 + filter.len() + 1;
                }

                buf.put_u8(0x82);
                write_variable_int(buf, remaining_length as u32);
                buf.put_u16(p.packet_id);
                for (filter, qos) in &p.filters {
                    write_string(buf, filter)?;
                    buf.put_u8(qos.as_u8());
                }
                Ok(())
            }
            Packet::SubAck(p) => {
                let remaining_length = 2 + p.granted.len();
                buf.put_u8(0x90);
                write_variable_int(buf, remaining_length as u32);
                buf.put_u16(p.packet_id);
                for qos in &p.granted {
                    buf.put_u8(qos.as_u8());
                }
                Ok(())
            }
            Packet::Unsubscribe(p) => {
                let mut remaining_length = 2;
                for filter in &p.filters {
                    remaining_length += 2 + filter.len();
                }
                buf.put_u8(0xA2);
                write_variable_int(buf, remaining_length as u32);
                buf.put_u16(p.packet_id);
                for filter in &p.filters {
                    write_string(buf, filter)?;
                }
                Ok(())
            }
            Packet::UnsubAck(p) => {
                buf.put_u8(0xB0);
                write_variable_int(buf, 2);
                buf.put_u16(p.packet_id);
                Ok(())
            }
            Packet::PingReq => {
                buf.put_u8(0xC0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::PingResp => {
                buf.put_u8(0xD0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::Disconnect => {
                buf.put_u8(0xE0);
                buf.put_u8(0x00);
                Ok(())
            }
        }
    }
}
