//! mqisdpd - MQTT 3.1 broker daemon
//!
//! Usage:
//!   mqisdpd [OPTIONS]
//!
//! Options:
//!   -b, --bind <ADDR>       Bind address (default: 127.0.0.1:1883)
//!   -w, --workers <N>       Dispatch worker tasks (default: 2)
//!   --queue-capacity <N>    Dispatch queue capacity (default: 100)
//!   --max-packet-size <N>   Maximum packet size in bytes
//!   -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use mqisdp::server::{BrokerConfig, Server};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// mqisdp - an MQTT 3.1 (MQIsdp) publish/subscribe broker
#[derive(Parser, Debug)]
#[command(name = "mqisdpd")]
#[command(version = "0.1.0")]
#[command(about = "MQTT 3.1 publish/subscribe broker")]
struct Args {
    /// TCP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Number of dispatch worker tasks
    #[arg(short, long)]
    workers: Option<usize>,

    /// Dispatch queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Maximum packet size in bytes
    #[arg(long)]
    max_packet_size: Option<usize>,

    /// Log level
    #[arg(short, long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level.to_tracing_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to install tracing subscriber");

    let mut config = BrokerConfig::default();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(workers) = args.workers {
        config.dispatch_workers = workers;
    }
    if let Some(capacity) = args.queue_capacity {
        config.dispatch_queue_capacity = capacity;
    }
    if let Some(max_packet_size) = args.max_packet_size {
        config.max_packet_size = max_packet_size;
    }

    let server = Server::new(config);
    server.run().await
}
