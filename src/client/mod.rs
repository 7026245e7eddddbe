//! A minimal MQTT 3.1 client, just capable enough to drive the broker
//! end-to-end: connect, publish, subscribe, unsubscribe, and read back
//! incoming frames. No reconnect logic, no QoS > 0 retry, no TLS — a real
//! application wanting those should reach for a fuller client crate.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec::{Decoder, Encoder};
use crate::protocol::{
    Connect, ConnectReturnCode, Packet, Publish, QoS, Subscribe, Unsubscribe,
};

/// Errors a client call can produce.
#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Decode(crate::protocol::DecodeError),
    Encode(crate::protocol::EncodeError),
    /// The broker replied to CONNECT with anything but `Accepted`.
    Rejected(ConnectReturnCode),
    /// The broker's first reply to CONNECT was not CONNACK.
    UnexpectedPacket,
    /// The connection was closed before a complete frame arrived.
    ConnectionClosed,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::Rejected(code) => write!(f, "CONNECT rejected: {:?}", code),
            Self::UnexpectedPacket => write!(f, "unexpected packet from broker"),
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<crate::protocol::DecodeError> for ClientError {
    fn from(e: crate::protocol::DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<crate::protocol::EncodeError> for ClientError {
    fn from(e: crate::protocol::EncodeError) -> Self {
        Self::Encode(e)
    }
}

/// Options for [`Client::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<bytes::Bytes>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
        }
    }
}

/// A single TCP connection to an MQTT 3.1 broker.
pub struct Client {
    stream: TcpStream,
    decoder: Decoder,
    encoder: Encoder,
    read_buf: BytesMut,
}

impl Client {
    /// Open a TCP connection to `addr` and perform the CONNECT/CONNACK
    /// handshake. Returns an error unless the broker accepts the CONNECT.
    pub async fn connect(addr: &str, options: ConnectOptions) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let mut client = Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_buf: BytesMut::with_capacity(4096),
        };

        client
            .write_packet(&Packet::Connect(Connect {
                client_id: options.client_id,
                clean_session: options.clean_session,
                keep_alive: options.keep_alive,
                will: None,
                username: options.username,
                password: options.password,
            }))
            .await?;

        match client.read_packet().await? {
            Packet::ConnAck(ack) => {
                if matches!(ack.return_code, ConnectReturnCode::Accepted) {
                    Ok(client)
                } else {
                    Err(ClientError::Rejected(ack.return_code))
                }
            }
            _ => Err(ClientError::UnexpectedPacket),
        }
    }

    /// Publish `payload` to `topic` at QoS AtMostOnce.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<bytes::Bytes>,
        retain: bool,
    ) -> Result<(), ClientError> {
        self.write_packet(&Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain,
            topic: topic.into(),
            packet_id: None,
            payload: payload.into(),
        }))
        .await
    }

    /// Subscribe to a single topic filter at the given requested QoS and
    /// wait for the broker's SUBACK.
    pub async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), ClientError> {
        self.write_packet(&Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: vec![(filter.to_string(), qos)],
        }))
        .await?;

        match self.read_packet().await? {
            Packet::SubAck(_) => Ok(()),
            _ => Err(ClientError::UnexpectedPacket),
        }
    }

    /// Unsubscribe from a single topic filter and wait for the broker's
    /// UNSUBACK.
    pub async fn unsubscribe(&mut self, filter: &str) -> Result<(), ClientError> {
        self.write_packet(&Packet::Unsubscribe(Unsubscribe {
            packet_id: 1,
            filters: vec![filter.to_string()],
        }))
        .await?;

        match self.read_packet().await? {
            Packet::UnsubAck(_) => Ok(()),
            _ => Err(ClientError::UnexpectedPacket),
        }
    }

    /// Read the next frame the broker sends, blocking until one arrives.
    /// Intended for draining PUBLISHes after subscribing.
    pub async fn next_packet(&mut self) -> Result<Packet, ClientError> {
        self.read_packet().await
    }

    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.write_packet(&Packet::Disconnect).await
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let mut buf = BytesMut::new();
        self.encoder.encode(packet, &mut buf)?;
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet, ClientError> {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.read_buf)? {
                self.read_buf.split_to(consumed);
                return Ok(packet);
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}
