//! Configuration (spec §6): CLI flags via `clap` derive, grounded on
//! `nclav-cli`'s `Cli`/`ValueEnum` shape, plus the ambient env-tunable
//! knobs the CLI doesn't cover, grounded on the teacher's `Config::load`
//! `OnceLock` aggregator / `get_env` pattern.

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "pluq", about = "A persistent, HTTP-accessible, hierarchical message queue broker", version)]
pub struct Cli {
    /// Storage backend: `bolt` persists to disk via redb, `memory` is
    /// volatile and process-lifetime only.
    #[arg(long = "storage-driver", value_enum, default_value_t = StorageDriverArg::Bolt, env = "PLUQ_STORAGE_DRIVER")]
    pub storage_driver: StorageDriverArg,

    /// Listen address, e.g. `:3900` or `127.0.0.1:3900`.
    #[arg(short = 'l', long = "listen", default_value = ":3900", env = "PLUQ_LISTEN")]
    pub listen: String,

    /// Path to the redb database file when `--storage-driver bolt`.
    #[arg(long = "data-dir", default_value = "./data/pluq.redb", env = "PLUQ_DATA_DIR")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum StorageDriverArg {
    Bolt,
    Memory,
}

static RUNTIME: OnceLock<RuntimeConfig> = OnceLock::new();

/// Ambient tuning knobs that aren't worth promoting to CLI flags. Loaded
/// lazily once and cached process-wide, same shape as the teacher's
/// `Config::global()`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub reply_index_gc_interval_secs: u64,
    pub event_bus_capacity: usize,
}

impl RuntimeConfig {
    pub fn global() -> &'static RuntimeConfig {
        RUNTIME.get_or_init(Self::load)
    }

    fn load() -> Self {
        Self {
            reply_index_gc_interval_secs: get_env("PLUQ_REPLY_INDEX_GC_INTERVAL_SECS", "60"),
            event_bus_capacity: get_env("PLUQ_EVENT_BUS_CAPACITY", "1000"),
        }
    }
}

fn get_env<T: FromStr>(key: &str, default: &str) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| default.parse().unwrap_or_else(|_| panic!("invalid default for {key}")))
}
