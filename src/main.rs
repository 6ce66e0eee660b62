//! Binary entrypoint: parse CLI flags, wire the storage driver, queue
//! manager, and HTTP router, and serve. Exits non-zero on any startup
//! error (spec §6), matching the teacher's `main.rs` fail-fast shape.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pluq::clock::{Clock, SystemClock};
use pluq::codec::{LengthPrefixedCodec, MessageCodec};
use pluq::config::{Cli, RuntimeConfig, StorageDriverArg};
use pluq::event_bus::EventBus;
use pluq::id::IdGenerator;
use pluq::property_tree::PropertyTree;
use pluq::queue_manager::QueueManager;
use pluq::storage::memory::MemoryDriver;
use pluq::storage::redb_store::RedbDriver;
use pluq::storage::StorageDriver;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "pluq failed to start");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeConfig::global();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec: Arc<dyn MessageCodec> = Arc::new(LengthPrefixedCodec);
    let events = EventBus::new(runtime.event_bus_capacity);
    events.handle_all(Box::new(|event| {
        tracing::debug!(kind = ?event.kind, queue = %event.queue, "event dispatched");
    }));
    events.spawn();
    let idgen = Arc::new(IdGenerator::new(clock.clone()));

    let driver: Arc<dyn StorageDriver> = match cli.storage_driver {
        StorageDriverArg::Memory => {
            tracing::info!("storage driver: memory (volatile)");
            Arc::new(MemoryDriver::new(clock.clone(), events.clone()))
        }
        StorageDriverArg::Bolt => {
            tracing::info!(path = %cli.data_dir, "storage driver: redb");
            let gc_interval = Duration::from_secs(runtime.reply_index_gc_interval_secs);
            let redb = Arc::new(RedbDriver::open(Path::new(&cli.data_dir), clock.clone(), codec, events.clone(), gc_interval)?);
            redb.spawn_gc();
            redb
        }
    };

    let tree = Arc::new(PropertyTree::new());
    let manager = QueueManager::new(tree, driver, events, idgen);

    let addr = normalize_listen_addr(&cli.listen);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "pluq listening");

    axum::serve(listener, pluq::http::router(manager)).await?;
    Ok(())
}

/// Accept Go-style `:3900` bare-port addresses in addition to full
/// `host:port` pairs, matching the original's `net.Listen` convention.
fn normalize_listen_addr(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen.to_string()
    }
}
