//! The broker server: owns the listener, the dispatch pool, the
//! subscription table, and the client registry, and spawns a reader/writer
//! pair for every accepted connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::connection::{reader, writer, Connection};
use crate::dispatch::{DispatchPool, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};
use crate::registry::ClientRegistry;
use crate::subscription::SubscriptionTable;

/// Runtime configuration for a [`Server`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the TCP listener binds to.
    pub bind_addr: SocketAddr,
    /// Number of dispatch worker tasks fanning out PUBLISHes.
    pub dispatch_workers: usize,
    /// Bound on the dispatch pool's queue.
    pub dispatch_queue_capacity: usize,
    /// Bound on each connection's outbound job queue.
    pub connection_queue_capacity: usize,
    /// Upper bound on a single packet's size, applied by the decoder.
    pub max_packet_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1883".parse().unwrap(),
            dispatch_workers: DEFAULT_WORKER_COUNT,
            dispatch_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connection_queue_capacity: 100,
            max_packet_size: crate::codec::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// A running (or not-yet-started) broker instance.
pub struct Server {
    config: BrokerConfig,
    subscriptions: Arc<SubscriptionTable>,
    registry: Arc<ClientRegistry>,
    dispatch: DispatchPool,
}

impl Server {
    pub fn new(config: BrokerConfig) -> Self {
        let subscriptions = Arc::new(SubscriptionTable::new());
        let dispatch = DispatchPool::spawn(
            subscriptions.clone(),
            config.dispatch_queue_capacity,
            config.dispatch_workers,
        );

        Self {
            config,
            subscriptions,
            registry: Arc::new(ClientRegistry::new()),
            dispatch,
        }
    }

    /// Bind the listener and accept connections until the listener itself
    /// fails. Each connection is handled on its own pair of spawned tasks;
    /// one connection's error never propagates out of this loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "mqisdp broker listening");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    self.spawn_connection(stream, addr);
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e);
                }
            }
        }
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            error!(%addr, error = %e, "failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (job_tx, job_rx) = mpsc::channel(self.config.connection_queue_capacity);
        let conn = Arc::new(Connection::new(addr, job_tx));

        let subscriptions = self.subscriptions.clone();
        let registry = self.registry.clone();
        let dispatch_sender = self.dispatch.sender();
        let max_packet_size = self.config.max_packet_size;

        info!(%addr, "accepted connection");

        let reader_conn = conn.clone();
        let reader_subs = subscriptions.clone();
        let reader_registry = registry.clone();
        tokio::spawn(async move {
            reader::run(
                read_half,
                reader_conn,
                reader_subs,
                reader_registry,
                dispatch_sender,
                max_packet_size,
            )
            .await;
        });

        tokio::spawn(async move {
            writer::run(write_half, job_rx, conn, subscriptions, registry).await;
        });
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionTable> {
        self.subscriptions.clone()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn shutdown(&self) {
        self.dispatch.shutdown();
    }
}
