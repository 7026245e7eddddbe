//! End-to-end tests driving a real broker over TCP with the bundled client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tokio::time::{sleep, timeout};

use mqisdp::protocol::{ConnectReturnCode, Packet, QoS};
use mqisdp::{BrokerConfig, Client, ConnectOptions, Server};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(18830);

fn next_addr() -> SocketAddr {
    let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    SocketAddr::from(([127, 0, 0, 1], port))
}

async fn spawn_broker(addr: SocketAddr) {
    let config = BrokerConfig {
        bind_addr: addr,
        ..BrokerConfig::default()
    };
    let server = Server::new(config);
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    // Give the listener a moment to bind before any test dials it.
    sleep(Duration::from_millis(100)).await;
}

async fn connect(addr: SocketAddr, client_id: &str) -> Client {
    Client::connect(
        &addr.to_string(),
        ConnectOptions {
            client_id: client_id.to_string(),
            ..ConnectOptions::default()
        },
    )
    .await
    .expect("client should connect")
}

async fn expect_publish(client: &mut Client, topic: &str, payload: &[u8]) {
    let packet = timeout(Duration::from_secs(1), client.next_packet())
        .await
        .expect("timed out waiting for publish")
        .expect("client read should succeed");
    match packet {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic.as_ref(), topic);
            assert_eq!(&publish.payload[..], payload);
        }
        other => panic!("expected PUBLISH, got {:?}", other),
    }
}

async fn expect_silence(client: &mut Client) {
    let result = timeout(Duration::from_millis(200), client.next_packet()).await;
    assert!(result.is_err(), "expected no further frames");
}

#[tokio::test]
async fn exact_topic_subscriber_receives_matching_publish() {
    let addr = next_addr();
    spawn_broker(addr).await;

    let mut subscriber = connect(addr, "sub").await;
    subscriber
        .subscribe("sensors/temp", QoS::AtMostOnce)
        .await
        .unwrap();

    let mut publisher = connect(addr, "pub").await;
    publisher
        .publish("sensors/temp", b"21.5".as_slice(), false)
        .await
        .unwrap();

    expect_publish(&mut subscriber, "sensors/temp", b"21.5").await;
}

#[tokio::test]
async fn plus_wildcard_matches_one_level_but_not_two() {
    let addr = next_addr();
    spawn_broker(addr).await;

    let mut subscriber = connect(addr, "sub").await;
    subscriber
        .subscribe("sensors/+/temperature", QoS::AtMostOnce)
        .await
        .unwrap();

    let mut publisher = connect(addr, "pub").await;
    publisher
        .publish("sensors/kitchen/temperature", b"22.5".as_slice(), false)
        .await
        .unwrap();
    expect_publish(&mut subscriber, "sensors/kitchen/temperature", b"22.5").await;

    publisher
        .publish(
            "sensors/kitchen/extra/temperature",
            b"99".as_slice(),
            false,
        )
        .await
        .unwrap();
    expect_silence(&mut subscriber).await;
}

#[tokio::test]
async fn hash_wildcard_matches_any_number_of_trailing_levels() {
    let addr = next_addr();
    spawn_broker(addr).await;

    let mut subscriber = connect(addr, "sub").await;
    subscriber.subscribe("home/#", QoS::AtMostOnce).await.unwrap();

    let mut publisher = connect(addr, "pub").await;
    publisher
        .publish("home/floor1/room2/sensor/temp", b"21.0".as_slice(), false)
        .await
        .unwrap();

    expect_publish(&mut subscriber, "home/floor1/room2/sensor/temp", b"21.0").await;
}

#[tokio::test]
async fn retained_message_is_replayed_to_a_new_subscriber() {
    let addr = next_addr();
    spawn_broker(addr).await;

    let mut publisher = connect(addr, "pub").await;
    publisher
        .publish("status/device", b"online".as_slice(), true)
        .await
        .unwrap();

    sleep(Duration::from_millis(100)).await;

    let mut subscriber = connect(addr, "sub").await;
    subscriber
        .subscribe("status/device", QoS::AtMostOnce)
        .await
        .unwrap();

    expect_publish(&mut subscriber, "status/device", b"online").await;
}

#[tokio::test]
async fn empty_payload_retained_publish_clears_the_retained_message() {
    let addr = next_addr();
    spawn_broker(addr).await;

    let mut publisher = connect(addr, "pub").await;
    publisher
        .publish("status/device", b"online".as_slice(), true)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    publisher
        .publish("status/device", b"".as_slice(), true)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let mut subscriber = connect(addr, "sub").await;
    subscriber
        .subscribe("status/device", QoS::AtMostOnce)
        .await
        .unwrap();

    expect_silence(&mut subscriber).await;
}

#[tokio::test]
async fn a_second_connect_with_the_same_client_id_disconnects_the_first() {
    let addr = next_addr();
    spawn_broker(addr).await;

    let mut first = connect(addr, "duplicate").await;
    let _second = connect(addr, "duplicate").await;

    let packet = timeout(Duration::from_secs(1), first.next_packet())
        .await
        .expect("timed out waiting for the broker to close the displaced connection");

    // The displaced connection's writer encodes DISCONNECT as its very last
    // frame before closing the socket; a clean EOF right after is also an
    // acceptable observation of the same shutdown.
    match packet {
        Ok(Packet::Disconnect) => {}
        Err(_) => {}
        Ok(other) => panic!("expected DISCONNECT or EOF, got {:?}", other),
    }
}

#[tokio::test]
async fn connect_with_unsupported_protocol_version_is_rejected_not_dropped() {
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let addr = next_addr();
    spawn_broker(addr).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x10, 12]);
    buf.extend_from_slice(&[0x00, 0x06]);
    buf.extend_from_slice(b"MQIsdp");
    buf.extend_from_slice(&[0x04, 0x02, 0x00, 0x3C]);
    stream.write_all(&buf).await.unwrap();

    let mut reply = [0u8; 4];
    let n = timeout(Duration::from_secs(1), stream.read(&mut reply))
        .await
        .expect("timed out waiting for CONNACK")
        .unwrap();

    assert_eq!(n, 4, "expected a full CONNACK frame");
    assert_eq!(reply[0], 0x20, "CONNACK fixed header");
    assert_eq!(reply[3], ConnectReturnCode::UnacceptableProtocolVersion as u8);
}
