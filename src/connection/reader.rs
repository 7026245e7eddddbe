//! The reader task: decodes frames off the socket and drives the
//! `fresh -> named -> closing` connection state machine.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::codec::Decoder;
use crate::connection::{ConnRef, ConnectionError, Post};
use crate::protocol::{
    ConnAck, ConnectReturnCode, DecodeError, Packet, ProtocolError, PubAck, QoS, SubAck, UnsubAck,
};
use crate::registry::ClientRegistry;
use crate::subscription::SubscriptionTable;
use crate::topic;

/// Where a connection is in its lifecycle. `Closing` is terminal: once
/// reached, the reader stops processing frames and returns.
enum State {
    Fresh,
    Named,
    Closing,
}

const READ_CHUNK: usize = 4096;

/// Drive one connection's reader half until it disconnects, errs, or the
/// peer closes the socket. Always ends by queuing a `Disconnect` sentinel
/// for this connection's own writer task, which is how the writer learns
/// to stop and run its cleanup (see [`crate::connection::writer`]).
pub async fn run<R>(
    mut stream: R,
    conn: ConnRef,
    subscriptions: Arc<SubscriptionTable>,
    registry: Arc<ClientRegistry>,
    dispatch: tokio::sync::mpsc::Sender<Post>,
    max_packet_size: usize,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let result = drive(
        &mut stream,
        &conn,
        &subscriptions,
        &registry,
        &dispatch,
        max_packet_size,
    )
    .await;

    if let Err(e) = result {
        warn!(addr = %conn.addr, error = %e, "connection reader ending with error");
    }

    conn.submit(Packet::Disconnect).await;
}

async fn drive<R>(
    stream: &mut R,
    conn: &ConnRef,
    subscriptions: &Arc<SubscriptionTable>,
    registry: &Arc<ClientRegistry>,
    dispatch: &tokio::sync::mpsc::Sender<Post>,
    max_packet_size: usize,
) -> Result<(), ConnectionError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let decoder = Decoder::new().with_max_packet_size(max_packet_size);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut state = State::Fresh;

    loop {
        if matches!(state, State::Closing) {
            return Ok(());
        }

        loop {
            match decoder.decode(&buf) {
                Ok(Some((packet, consumed))) => {
                    buf.split_to(consumed);
                    handle_packet(
                        packet,
                        &mut state,
                        conn,
                        subscriptions,
                        registry,
                        dispatch,
                    )
                    .await?;
                    if matches!(state, State::Closing) {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                // A CONNECT naming an unsupported protocol name or version
                // still gets a graceful CONNACK, matching the reject paths
                // the state machine itself drives for other bad CONNECTs.
                Err(DecodeError::InvalidProtocolName | DecodeError::InvalidProtocolVersion(_))
                    if matches!(state, State::Fresh) =>
                {
                    conn.submit(Packet::ConnAck(ConnAck {
                        return_code: ConnectReturnCode::UnacceptableProtocolVersion,
                    }))
                    .await;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            debug!(addr = %conn.addr, "peer closed connection");
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn handle_packet(
    packet: Packet,
    state: &mut State,
    conn: &ConnRef,
    subscriptions: &Arc<SubscriptionTable>,
    registry: &Arc<ClientRegistry>,
    dispatch: &tokio::sync::mpsc::Sender<Post>,
) -> Result<(), ConnectionError> {
    match (&state, packet) {
        (State::Fresh, Packet::Connect(connect)) => {
            // The client identifier must be 1-23 characters, unconditionally.
            if connect.client_id.is_empty() || connect.client_id.len() > 23 {
                conn.submit(Packet::ConnAck(ConnAck {
                    return_code: ConnectReturnCode::IdentifierRejected,
                }))
                .await;
                *state = State::Closing;
                return Ok(());
            }

            let client_id: Arc<str> = Arc::from(connect.client_id.as_str());
            conn.set_client_id(client_id.clone());

            if let Some(displaced) = registry.register(client_id.clone(), conn.clone()) {
                info!(%client_id, "displacing existing connection for client id");
                let (done_tx, done_rx) = tokio::sync::oneshot::channel();
                displaced
                    .submit_with_done(Packet::Disconnect, done_tx)
                    .await;
                // Wait for the displaced writer to flush the DISCONNECT (or
                // drop the sender on its way out) before this connection
                // proceeds, so the old session is guaranteed torn down first.
                let _ = done_rx.await;
            }

            conn.submit(Packet::ConnAck(ConnAck {
                return_code: ConnectReturnCode::Accepted,
            }))
            .await;
            *state = State::Named;
            Ok(())
        }
        (State::Fresh, _) => Err(ProtocolError::Violation(
            "first packet on a connection must be CONNECT",
        )
        .into()),
        (State::Named, Packet::Connect(_)) => {
            Err(ProtocolError::Violation("CONNECT received twice").into())
        }
        (State::Named, Packet::Subscribe(sub)) => {
            let mut granted = Vec::with_capacity(sub.filters.len());
            let mut retained = Vec::new();

            for (filter, _requested_qos) in &sub.filters {
                if topic::validate_topic_filter(filter).is_err() {
                    return Err(
                        ProtocolError::Violation("invalid topic filter in SUBSCRIBE").into(),
                    );
                }
                subscriptions.add(filter, conn.clone());
                retained.extend(subscriptions.send_retained(filter));
                // This broker grants AtLeastOnce for every subscription
                // regardless of what was requested: it never tracks
                // delivery acknowledgement state, so there is nothing a
                // lower grant would buy a client.
                granted.push(QoS::AtLeastOnce);
            }

            conn.submit(Packet::SubAck(SubAck {
                packet_id: sub.packet_id,
                granted,
            }))
            .await;

            for publish in retained {
                conn.submit(Packet::Publish(publish)).await;
            }

            Ok(())
        }
        (State::Named, Packet::Unsubscribe(unsub)) => {
            for filter in &unsub.filters {
                subscriptions.unsubscribe(filter, conn);
            }
            conn.submit(Packet::UnsubAck(UnsubAck {
                packet_id: unsub.packet_id,
            }))
            .await;
            Ok(())
        }
        (State::Named, Packet::Publish(publish)) => {
            if !matches!(publish.qos, QoS::AtMostOnce) {
                return Err(ProtocolError::Violation(
                    "PUBLISH must be QoS AtMostOnce",
                )
                .into());
            }

            if topic::validate_topic_name(&publish.topic).is_err() {
                return Err(ProtocolError::Violation("invalid topic name in PUBLISH").into());
            }

            if let Some(packet_id) = publish.packet_id {
                conn.submit(Packet::PubAck(PubAck { packet_id })).await;
            }

            let post = Post {
                publish,
                from: conn.clone(),
            };
            // Backpressure from a full dispatch queue is applied to this
            // connection's reader, not silently dropped.
            let _ = dispatch.send(post).await;

            Ok(())
        }
        (State::Named, Packet::PingReq) => {
            conn.submit(Packet::PingResp).await;
            Ok(())
        }
        (State::Named, Packet::Disconnect) => {
            *state = State::Closing;
            Ok(())
        }
        (State::Named, other) => Err(ProtocolError::Violation(match other {
            Packet::ConnAck(_) => "client sent CONNACK",
            Packet::PubAck(_) => "client sent PUBACK for a PUBLISH this broker never sent at QoS > 0",
            Packet::SubAck(_) => "client sent SUBACK",
            Packet::UnsubAck(_) => "client sent UNSUBACK",
            Packet::PingResp => "client sent PINGRESP",
            _ => "unexpected packet in named state",
        })
        .into()),
        (State::Closing, _) => Ok(()),
    }
}
