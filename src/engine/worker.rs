//! Layer worker threads
//!
//! Each layer runs a pool of workers over its own queue. A worker takes the
//! most advanced attempt from the queue, reads the word it needs from the
//! layer's source, advances it one pass and routes it to whichever layer
//! holds its next word. With nothing queued it starts a fresh attempt from
//! the current work unit, or sleeps briefly when there is none.
//!
//! Errors are logged and followed by a backoff; workers only exit on stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use snowfield_core::less_than_target;

use super::partial::PartialWork;
use super::queue::FaQueue;
use super::router::LayerRouter;
use super::submit::Submitter;
use super::work::WorkBoard;
use crate::config::EngineSettings;
use crate::source::{FieldLayout, FieldSource};

/// State shared by every worker of a miner
pub struct EngineState {
    pub board: WorkBoard,
    pub router: LayerRouter,
    pub submitter: Submitter,
    pub layout: FieldLayout,
    pub settings: EngineSettings,
    pub stop: AtomicBool,
    /// Finished attempts
    pub op_count: AtomicU64,
}

impl EngineState {
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep up to `duration`, waking early on stop
    pub fn pause(&self, duration: Duration) {
        let step = Duration::from_millis(50);
        let mut left = duration;
        while !left.is_zero() && !self.is_stopped() {
            let nap = left.min(step);
            std::thread::sleep(nap);
            left -= nap;
        }
    }
}

/// Per-thread state a worker carries through its passes
pub struct WorkerContext {
    pub rng: SmallRng,
}

impl WorkerContext {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LayerWorker {
    layer: usize,
    source: Arc<dyn FieldSource>,
    queue: Arc<FaQueue>,
    state: Arc<EngineState>,
    ctx: WorkerContext,
}

impl LayerWorker {
    pub fn new(
        layer: usize,
        source: Arc<dyn FieldSource>,
        queue: Arc<FaQueue>,
        state: Arc<EngineState>,
    ) -> Self {
        Self {
            layer,
            source,
            queue,
            state,
            ctx: WorkerContext::new(),
        }
    }

    pub fn spawn(self, index: usize) -> std::io::Result<JoinHandle<()>> {
        let name = format!("layer-{}-worker-{}", self.layer, index);
        std::thread::Builder::new().name(name).spawn(move || self.run())
    }

    pub fn run(mut self) {
        while !self.state.is_stopped() {
            if let Err(e) = self.run_pass() {
                warn!("Layer {} ({}) error: {:#}", self.layer, self.source.name(), e);
                self.state.pause(self.state.settings.error_backoff);
            }
        }
    }

    fn run_pass(&mut self) -> anyhow::Result<()> {
        if self.source.as_batch().is_some() {
            self.run_batch_pass()
        } else {
            self.run_single_pass()
        }
    }

    fn run_single_pass(&mut self) -> anyhow::Result<()> {
        let word_count = self.state.layout.word_count;
        let pw = match self.queue.poll() {
            Some(mut pw) => {
                let word = self.source.read_word(pw.next_word_index())?;
                pw.do_pass(&word, word_count);
                pw
            }
            None => match self.state.board.current() {
                Some((work, generation)) => {
                    PartialWork::new(work, generation, &mut self.ctx.rng, word_count)
                }
                None => {
                    self.state.pause(self.state.settings.idle_backoff);
                    return Ok(());
                }
            },
        };
        self.process(pw, true)
    }

    /// Fill a batch from the queue, topping up with fresh attempts, and
    /// issue one bulk read for all of it
    fn run_batch_pass(&mut self) -> anyhow::Result<()> {
        let source = self.source.clone();
        let Some(batch) = source.as_batch() else {
            return self.run_single_pass();
        };
        let batch_size = batch.suggested_batch_size().min(self.state.settings.batch_size).max(1);
        let word_count = self.state.layout.word_count;

        let mut items = Vec::with_capacity(batch_size);
        self.queue.super_poll(batch_size, &mut items);

        if items.len() < batch_size {
            let Some((work, generation)) = self.state.board.current() else {
                if items.is_empty() {
                    self.state.pause(self.state.settings.idle_backoff);
                    return Ok(());
                }
                return self.finish_batch(items, word_count);
            };
            for _ in items.len()..batch_size {
                let pw = PartialWork::new(work.clone(), generation, &mut self.ctx.rng, word_count);
                let chunk = self.state.layout.chunk_of(pw.next_word_index());
                if source.has_chunk(chunk) {
                    items.push(pw);
                } else {
                    self.state.router.enqueue(chunk, pw);
                }
            }
            self.state.router.try_prune_all();
        }

        self.finish_batch(items, word_count)
    }

    fn finish_batch(&self, items: Vec<PartialWork>, word_count: u64) -> anyhow::Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let Some(batch) = self.source.as_batch() else {
            return Ok(());
        };
        let indexes: Vec<u64> = items.iter().map(|pw| pw.next_word_index()).collect();
        let words = batch.read_words_bulk(&indexes)?;

        for (mut pw, word) in items.into_iter().zip(words.iter()) {
            pw.do_pass(word, word_count);
            if let Err(e) = self.process(pw, false) {
                warn!("Layer {} ({}) dropped an attempt: {:#}", self.layer, self.source.name(), e);
            }
        }
        Ok(())
    }

    /// Finish, continue inline, or route an attempt onward
    fn process(&self, mut pw: PartialWork, allow_inline: bool) -> anyhow::Result<()> {
        let word_count = self.state.layout.word_count;
        loop {
            if !self.state.board.is_current(pw.generation) {
                return Ok(());
            }

            if pw.is_done() {
                self.state.op_count.fetch_add(1, Ordering::Relaxed);
                if less_than_target(&pw.context, &pw.work.report_target) {
                    info!("Found passable solution: {}", hex::encode(pw.context));
                    self.state.submitter.submit(&pw)?;
                }
                return Ok(());
            }

            let chunk = self.state.layout.chunk_of(pw.next_word_index());
            if allow_inline && self.source.skip_queue_on_rehit() && self.source.has_chunk(chunk) {
                let word = self.source.read_word(pw.next_word_index())?;
                pw.do_pass(&word, word_count);
                continue;
            }

            self.state.router.enqueue(chunk, pw);
            self.state.router.try_prune_all();
            return Ok(());
        }
    }
}

/// Benchmark thread: random reads against one layer as fast as it can
pub struct BenchWorker {
    source: Arc<dyn FieldSource>,
    state: Arc<EngineState>,
    chunks: Vec<u64>,
    ctx: WorkerContext,
}

impl BenchWorker {
    pub fn new(source: Arc<dyn FieldSource>, state: Arc<EngineState>) -> Self {
        let chunks = source.holding_set().iter().copied().collect();
        Self {
            source,
            state,
            chunks,
            ctx: WorkerContext::new(),
        }
    }

    pub fn spawn(self, index: usize) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("bench-{}", index))
            .spawn(move || self.run())
    }

    fn word_index(&mut self) -> u64 {
        let layout = &self.state.layout;
        let chunk = self.chunks[self.ctx.rng.gen_range(0..self.chunks.len())];
        let (start, len) = layout.chunk_words(chunk);
        start + self.ctx.rng.gen_range(0..len.max(1))
    }

    pub fn run(mut self) {
        if self.chunks.is_empty() {
            warn!("Benchmark layer {} holds no chunks", self.source.name());
            return;
        }
        let source = self.source.clone();
        while !self.state.is_stopped() {
            let result = match source.as_batch() {
                Some(batch) => {
                    let n = batch.suggested_batch_size();
                    let indexes: Vec<u64> = (0..n).map(|_| self.word_index()).collect();
                    batch.read_words_bulk(&indexes).map(|_| ())
                }
                None => {
                    let index = self.word_index();
                    source.read_word(index).map(|_| ())
                }
            };
            if let Err(e) = result {
                warn!("Benchmark read error on {}: {}", source.name(), e);
                self.state.pause(self.state.settings.error_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    use snowfield_core::{BlockHeader, POW_LOOK_PASSES, Word};

    use crate::engine::submit::SolutionSink;
    use crate::engine::work::WorkUnit;
    use crate::engine::work::tests::work_at;
    use crate::error::SourceError;
    use crate::source::{BatchSource, FakeSource, ReadCounter};

    fn layout() -> FieldLayout {
        FieldLayout {
            number: 0,
            base: "spoon.0".into(),
            word_count: 256,
            words_per_chunk: 64,
            deck_entries: 4,
        }
    }

    /// Fake field answering scattered reads in one call
    struct BulkFake {
        inner: FakeSource,
        calls: AtomicUsize,
    }

    impl FieldSource for BulkFake {
        fn name(&self) -> &str {
            "bulk"
        }

        fn layout(&self) -> &FieldLayout {
            self.inner.layout()
        }

        fn holding_set(&self) -> &BTreeSet<u64> {
            self.inner.holding_set()
        }

        fn counter(&self) -> &ReadCounter {
            self.inner.counter()
        }

        fn bulk_read(&self, word_index: u64, out: &mut [u8]) -> Result<(), SourceError> {
            self.inner.bulk_read(word_index, out)
        }

        fn as_batch(&self) -> Option<&dyn BatchSource> {
            Some(self)
        }
    }

    impl BatchSource for BulkFake {
        fn suggested_batch_size(&self) -> usize {
            8
        }

        fn read_words_bulk(&self, indexes: &[u64]) -> Result<Vec<Word>, SourceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            indexes.iter().map(|&i| self.inner.read_word(i)).collect()
        }
    }

    /// Fails its first submission
    #[derive(Default)]
    struct FlakySink {
        calls: AtomicUsize,
    }

    impl SolutionSink for FlakySink {
        fn submit(&self, _work: &WorkUnit, _header: &BlockHeader) -> anyhow::Result<bool> {
            if self.calls.fetch_add(1, Ordering::Relaxed) == 0 {
                anyhow::bail!("pool unavailable");
            }
            Ok(true)
        }
    }

    #[test]
    fn test_failed_submit_keeps_rest_of_batch() {
        let bulk = Arc::new(BulkFake {
            inner: FakeSource::new(&layout()),
            calls: AtomicUsize::new(0),
        });
        let source: Arc<dyn FieldSource> = bulk.clone();
        let sink = Arc::new(FlakySink::default());
        let settings = EngineSettings::default();
        let state = Arc::new(EngineState {
            board: WorkBoard::new(0, settings.work_max_age),
            router: LayerRouter::new(&[source.clone()], 100),
            submitter: Submitter::new(source.clone(), None, None, sink.clone()),
            layout: layout(),
            settings,
            stop: AtomicBool::new(false),
            op_count: AtomicU64::new(0),
        });
        state.board.publish(work_at(4, 0));
        let (work, generation) = state.board.current().unwrap();

        // Attempts one pass short of done
        let mut rng = SmallRng::seed_from_u64(9);
        let items: Vec<PartialWork> = (0..4)
            .map(|_| {
                let mut pw = PartialWork::new(work.clone(), generation, &mut rng, 256);
                for _ in 1..POW_LOOK_PASSES {
                    let word = source.read_word(pw.next_word_index()).unwrap();
                    pw.do_pass(&word, 256);
                }
                pw
            })
            .collect();

        let queue = state.router.queue(0).unwrap().clone();
        let worker = LayerWorker::new(0, source.clone(), queue, state.clone());
        worker.finish_batch(items, 256).unwrap();

        assert_eq!(bulk.calls.load(Ordering::Relaxed), 1);
        assert_eq!(sink.calls.load(Ordering::Relaxed), 4);
        assert_eq!(state.op_count.load(Ordering::Relaxed), 4);
        assert_eq!(state.submitter.counters.snapshot().0, 3);
    }

    #[test]
    fn test_batch_pass_respects_batch_size() {
        let bulk = Arc::new(BulkFake {
            inner: FakeSource::new(&layout()),
            calls: AtomicUsize::new(0),
        });
        let source: Arc<dyn FieldSource> = bulk.clone();
        let settings = EngineSettings {
            batch_size: 5,
            ..EngineSettings::default()
        };
        let state = Arc::new(EngineState {
            board: WorkBoard::new(0, settings.work_max_age),
            router: LayerRouter::new(&[source.clone()], 100),
            submitter: Submitter::new(source.clone(), None, None, Arc::new(FlakySink::default())),
            layout: layout(),
            settings,
            stop: AtomicBool::new(false),
            op_count: AtomicU64::new(0),
        });
        state.board.publish(work_at(4, 0));

        let queue = state.router.queue(0).unwrap().clone();
        let mut worker = LayerWorker::new(0, source, queue.clone(), state);
        worker.run_pass().unwrap();

        // Five fresh attempts, one bulk read, all advanced one pass and queued
        assert_eq!(bulk.calls.load(Ordering::Relaxed), 1);
        assert_eq!(queue.size(), 5);
        assert_eq!(queue.bucket_sizes()[1], 5);

        worker.run_pass().unwrap();
        assert_eq!(bulk.calls.load(Ordering::Relaxed), 2);
        assert_eq!(queue.bucket_sizes()[2], 5);
    }
}
