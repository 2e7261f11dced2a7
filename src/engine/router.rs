//! Chunk to layer routing
//!
//! Built once at startup from the layers' holding sets. When several layers
//! hold a chunk, the first layer listed keeps it.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use super::partial::PartialWork;
use super::queue::FaQueue;
use crate::source::FieldSource;

pub struct LayerRouter {
    chunk_to_layer: BTreeMap<u64, usize>,
    queues: Vec<Arc<FaQueue>>,
}

impl LayerRouter {
    pub fn new(sources: &[Arc<dyn FieldSource>], queue_capacity: usize) -> Self {
        let mut chunk_to_layer = BTreeMap::new();
        for (layer, source) in sources.iter().enumerate() {
            for &chunk in source.holding_set() {
                chunk_to_layer.entry(chunk).or_insert(layer);
            }
        }
        let queues = sources
            .iter()
            .map(|_| Arc::new(FaQueue::new(queue_capacity)))
            .collect();
        Self {
            chunk_to_layer,
            queues,
        }
    }

    pub fn layer_of(&self, chunk: u64) -> Option<usize> {
        self.chunk_to_layer.get(&chunk).copied()
    }

    pub fn chunk_map(&self) -> &BTreeMap<u64, usize> {
        &self.chunk_to_layer
    }

    pub fn queue(&self, layer: usize) -> Option<&Arc<FaQueue>> {
        self.queues.get(layer)
    }

    pub fn queues(&self) -> &[Arc<FaQueue>] {
        &self.queues
    }

    /// Queue an attempt on the layer owning `chunk`; unrouted chunks drop it
    pub fn enqueue(&self, chunk: u64, pw: PartialWork) -> bool {
        match self.layer_of(chunk).and_then(|layer| self.queues.get(layer)) {
            Some(queue) => {
                queue.enqueue(pw);
                true
            }
            None => {
                debug!("No layer holds chunk {}, dropping attempt", chunk);
                false
            }
        }
    }

    pub fn try_prune_all(&self) {
        for queue in &self.queues {
            queue.try_prune();
        }
    }

    pub fn clear_all(&self) {
        for queue in &self.queues {
            queue.clear();
        }
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.queues.iter().map(|q| q.size()).collect()
    }
}
