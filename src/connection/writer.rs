//! The writer task: drains a connection's outbound job queue, encodes each
//! frame, and fires its completion signal once the write has gone out.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::Encoder;
use crate::connection::{ConnRef, Job};
use crate::protocol::Packet;
use crate::registry::ClientRegistry;
use crate::subscription::SubscriptionTable;

/// Drain `jobs` onto `stream` until a `Disconnect` frame has been encoded or
/// the queue closes, then deregister `conn` and drop every subscription it
/// still holds. This is the only place a connection's bookkeeping is torn
/// down — the reader never touches the registry or subscription table on
/// its own way out.
pub async fn run<W>(
    mut stream: W,
    mut jobs: mpsc::Receiver<Job>,
    conn: ConnRef,
    subscriptions: Arc<SubscriptionTable>,
    registry: Arc<ClientRegistry>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    let encoder = Encoder::new();
    let mut buf = BytesMut::with_capacity(1024);

    while let Some(job) = jobs.recv().await {
        let is_disconnect = matches!(job.packet, Packet::Disconnect);

        buf.clear();
        let encoded = encoder.encode(&job.packet, &mut buf);
        match encoded {
            Ok(()) => {
                if let Err(e) = stream.write_all(&buf).await {
                    debug!(addr = %conn.addr, error = %e, "write failed, closing connection");
                    if let Some(done) = job.done {
                        let _ = done.send(());
                    }
                    break;
                }
            }
            Err(e) => {
                warn!(addr = %conn.addr, error = %e, "failed to encode outbound frame");
            }
        }

        if let Some(done) = job.done {
            let _ = done.send(());
        }

        if is_disconnect {
            break;
        }
    }

    let _ = stream.shutdown().await;

    if let Some(client_id) = conn.client_id() {
        registry.deregister(&client_id, &conn);
    }
    subscriptions.unsubscribe_all(&conn);

    debug!(addr = %conn.addr, "connection writer exited, state cleaned up");
}
