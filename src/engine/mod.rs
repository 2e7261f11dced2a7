//! Pass engine
//!
//! Attempts ([`PartialWork`]) move between per-layer queues until their
//! passes are done. Workers of a layer only ever read words that layer
//! holds; the [`LayerRouter`] sends each attempt to the layer owning the
//! chunk of its next word.

mod miner;
mod partial;
mod queue;
mod router;
mod submit;
mod work;
mod worker;

pub use miner::{Layer, Miner, load_layers};
pub use partial::PartialWork;
pub use queue::FaQueue;
pub use router::LayerRouter;
pub use submit::{ChannelSink, FileSink, LogSink, ShareCounters, SolutionSink, Submitter};
pub use work::{Publish, WorkBoard, WorkUnit, now_ms};
pub use worker::{BenchWorker, EngineState, LayerWorker, WorkerContext};
