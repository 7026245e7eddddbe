//! Per-client connection state: the bounded outbound job queue, the
//! reader's protocol state machine, and the writer that drains the queue.
//!
//! A connection is two cooperating tasks, not one: [`reader::run`] decodes
//! inbound frames and drives the `fresh -> named -> closing` state machine,
//! while [`writer::run`] drains a bounded queue of outbound
//! [`Job`]s and owns the socket's write half. They communicate only through
//! the job queue and the shared [`Connection`] handle; neither task reaches
//! into the other's state directly.

pub mod reader;
pub mod writer;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Packet, Publish};

/// Shared handle to a connection, cloned freely across the dispatch pool,
/// the subscription table, and the client registry. Comparisons between
/// two handles use pointer identity (`ConnRef::ptr_eq`), matching the
/// subscription table's need to tell two connections apart regardless of
/// what client ID either currently holds.
pub type ConnRef = Arc<Connection>;

/// One frame queued for a connection's writer task to encode and send.
/// `done`, when present, fires once the frame has been handed to the
/// socket — used by the reader to delay a state transition (e.g. closing
/// the socket after DISCONNECT) until the write actually happened.
pub struct Job {
    pub packet: Packet,
    pub done: Option<oneshot::Sender<()>>,
}

impl Job {
    pub fn new(packet: Packet) -> Self {
        Self { packet, done: None }
    }

    pub fn with_done(packet: Packet, done: oneshot::Sender<()>) -> Self {
        Self {
            packet,
            done: Some(done),
        }
    }
}

/// A PUBLISH accepted from a connection, queued for the dispatch pool.
/// Carries the originating connection so a future no-local-delivery policy
/// has something to key off of; this broker does not suppress self-receipt
/// today (MQTT 3.1 has no NoLocal flag).
pub struct Post {
    pub publish: Publish,
    pub from: ConnRef,
}

/// Errors surfaced by a connection's reader loop. The server never lets one
/// connection's error escape to another connection or to the accept loop;
/// it is logged and the connection is torn down.
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Protocol(crate::protocol::ProtocolError),
    Decode(crate::protocol::DecodeError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<crate::protocol::ProtocolError> for ConnectionError {
    fn from(e: crate::protocol::ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<crate::protocol::DecodeError> for ConnectionError {
    fn from(e: crate::protocol::DecodeError) -> Self {
        Self::Decode(e)
    }
}

/// A connection's identity and outbound job queue. `reader::run` transitions
/// it from `fresh` to `named` on a successful CONNECT (storing the client
/// ID); everything else is immutable for the connection's lifetime.
pub struct Connection {
    pub addr: SocketAddr,
    client_id: Mutex<Option<Arc<str>>>,
    jobs: mpsc::Sender<Job>,
}

impl Connection {
    pub fn new(addr: SocketAddr, jobs: mpsc::Sender<Job>) -> Self {
        Self {
            addr,
            client_id: Mutex::new(None),
            jobs,
        }
    }

    pub fn client_id(&self) -> Option<Arc<str>> {
        self.client_id.lock().clone()
    }

    pub fn set_client_id(&self, id: Arc<str>) {
        *self.client_id.lock() = Some(id);
    }

    /// Enqueue a frame with no completion signal. Used for fan-out deliveries
    /// where nobody is waiting on the write finishing.
    ///
    /// A full or closed queue is not escalated to an error: a slow or gone
    /// subscriber should never stall or fail the publisher's own request.
    pub async fn submit(&self, packet: Packet) {
        let _ = self.jobs.send(Job::new(packet)).await;
    }

    /// Enqueue a frame and be notified once it has been written, or dropped
    /// without notification if the queue is closed.
    pub async fn submit_with_done(&self, packet: Packet, done: oneshot::Sender<()>) {
        let _ = self.jobs.send(Job::with_done(packet, done)).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("client_id", &self.client_id.lock())
            .finish()
    }
}

/// Connections are identified by which `Arc` they are, not by their
/// contents — two connections from the same client ID at different times
/// are never the same subscriber.
impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
impl Eq for Connection {}

/// Test-only helpers for constructing a [`ConnRef`] without a real socket,
/// used by the subscription table's unit tests.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;

    pub fn fake_connection(client_id: &str) -> ConnRef {
        let (tx, rx) = mpsc::channel(1);
        // Leak the receiver by dropping it immediately: submitted jobs will
        // fail to send, which is fine for tests that only check identity
        // and subscriber-set membership, never delivery.
        drop(rx);
        let conn = Connection::new("127.0.0.1:0".parse().unwrap(), tx);
        conn.set_client_id(Arc::from(client_id));
        Arc::new(conn)
    }
}
