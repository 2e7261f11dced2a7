//! SnowField miner library
//!
//! Mines the SnowField proof of work over a field split into storage layers:
//! files on disk, chunks held in memory, remote word servers and a fake
//! field for testing. The field math itself (generation, Merkle commits,
//! proofs and header checks) lives in [`snowfield_core`], re-exported here as
//! [`algorithm`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snowfield::config::MinerConfig;
//! use snowfield::engine::{LogSink, Miner};
//!
//! let config = MinerConfig::load("miner.json".as_ref())?;
//! let miner = Miner::from_config(&config, Arc::new(LogSink))?;
//! miner.start()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub use snowfield_core as algorithm;

pub mod config;
pub mod engine;
pub mod error;
pub mod rpc;
pub mod source;

// Convenience re-exports
pub use config::{LayerConfig, LayerType, MinerConfig};
pub use engine::{Miner, PartialWork, WorkUnit};
pub use error::{ConfigError, SourceError};
pub use source::{FieldLayout, FieldSource};
