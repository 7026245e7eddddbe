//! mqisdp - an MQTT 3.1 (MQIsdp) publish/subscribe broker and client
//! library.
//!
//! The broker routes PUBLISH frames between connections using exact and
//! wildcard topic subscriptions, replays retained messages to new
//! subscribers, and runs connection I/O as a reader/writer task pair per
//! client. See [`server::Server`] for the entry point.

pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod subscription;
pub mod topic;

pub use client::{Client, ClientError, ConnectOptions};
pub use connection::{Connection, ConnRef};
pub use dispatch::DispatchPool;
pub use registry::ClientRegistry;
pub use server::{BrokerConfig, Server};
pub use subscription::SubscriptionTable;
