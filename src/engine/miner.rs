//! Miner: layers, queues and worker threads wired together

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, bail};
use log::{error, info, warn};
use snowfield_core::FieldInfo;
use snowfield_core::ProofService;
use snowfield_core::pow::diff_for_target;

use super::router::LayerRouter;
use super::submit::{SolutionSink, Submitter};
use super::work::{Publish, WorkBoard, WorkUnit};
use super::worker::{BenchWorker, EngineState, LayerWorker};
use crate::config::{EngineSettings, LayerType, MinerConfig};
use crate::rpc::WordServer;
use crate::source::{
    CompositeSource, FakeSource, FieldLayout, FieldSource, FileSource, MemSource, RemoteSource,
    SourceReader,
};

/// One configured layer with its loaded source
pub struct Layer {
    pub kind: LayerType,
    pub source: Arc<dyn FieldSource>,
    pub threads: usize,
}

pub struct Miner {
    state: Arc<EngineState>,
    layers: Vec<Layer>,
    composite: Arc<dyn FieldSource>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    word_server: Mutex<Option<Arc<WordServer>>>,
    last_stats: Mutex<Instant>,
}

impl Miner {
    /// Load every layer of `config` and build the miner
    pub fn from_config(config: &MinerConfig, sink: Arc<dyn SolutionSink>) -> anyhow::Result<Self> {
        config.validate()?;
        let field = config
            .network
            .field(config.selected_field)
            .with_context(|| format!("unknown field {}", config.selected_field))?
            .clone();
        let layout = FieldLayout {
            number: field.number,
            base: config.network.field_seed(field.number),
            word_count: field.word_count(),
            words_per_chunk: config.words_per_chunk,
            deck_entries: config.deck_entries,
        };
        info!(
            "Mining field {} ({}) with {} words in {} chunks",
            field.number,
            field.name,
            layout.word_count,
            layout.chunk_count()
        );

        let layers = load_layers(config, &layout)?;
        Self::new(layers, layout, Some(field), config.engine_settings(), sink)
    }

    /// Build a miner over already loaded layers
    ///
    /// `field` enables the self check of solutions when proofs are available.
    pub fn new(
        layers: Vec<Layer>,
        layout: FieldLayout,
        field: Option<FieldInfo>,
        settings: EngineSettings,
        sink: Arc<dyn SolutionSink>,
    ) -> anyhow::Result<Self> {
        if layers.is_empty() {
            bail!("no layers configured");
        }
        let sources: Vec<Arc<dyn FieldSource>> = layers.iter().map(|l| l.source.clone()).collect();
        let router = LayerRouter::new(&sources, settings.queue_capacity);

        let missing = layout.chunk_count().saturating_sub(router.chunk_map().len() as u64);
        if missing > 0 {
            warn!("{} of {} chunks are held by no layer", missing, layout.chunk_count());
        }
        for (chunk, layer) in router.chunk_map() {
            log::debug!("Chunk {} -> layer {}", chunk, layer);
        }

        let local: Vec<Arc<dyn FieldSource>> = layers
            .iter()
            .filter(|l| l.kind != LayerType::Remote)
            .map(|l| l.source.clone())
            .collect();
        let composite: Arc<dyn FieldSource> = Arc::new(CompositeSource::new(&layout, local));

        let has_fake = layers.iter().any(|l| l.kind == LayerType::Fake);
        let decks = layers
            .iter()
            .filter(|l| l.kind != LayerType::Remote)
            .find_map(|l| l.source.deck_set());
        let proofs = match decks {
            Some(decks) => {
                info!("Using decks with {} levels", decks.spans().count());
                Some(ProofService::new(SourceReader::new(composite.clone()), decks)?)
            }
            None if has_fake => {
                info!("No deck files; fake field solutions go out without proofs");
                None
            }
            None => bail!("no layer has the deck files needed to build proofs"),
        };
        let field = match (&proofs, settings.self_check) {
            (Some(_), true) => field,
            _ => None,
        };

        let submitter = Submitter::new(composite.clone(), proofs, field, sink);
        let state = Arc::new(EngineState {
            board: WorkBoard::new(settings.selected_field, settings.work_max_age),
            router,
            submitter,
            layout,
            settings,
            stop: AtomicBool::new(false),
            op_count: AtomicU64::new(0),
        });

        Ok(Self {
            state,
            layers,
            composite,
            handles: Mutex::new(Vec::new()),
            word_server: Mutex::new(None),
            last_stats: Mutex::new(Instant::now()),
        })
    }

    /// Spawn the worker threads of every layer
    pub fn start(&self) -> anyhow::Result<()> {
        let mut handles = self.lock_handles();
        for (i, layer) in self.layers.iter().enumerate() {
            let queue = self
                .state
                .router
                .queue(i)
                .context("layer without a queue")?
                .clone();
            for t in 0..layer.threads {
                let worker = LayerWorker::new(i, layer.source.clone(), queue.clone(), self.state.clone());
                handles.push(worker.spawn(t)?);
            }
            info!(
                "Layer {} ({}) started with {} threads",
                i,
                layer.source.name(),
                layer.threads
            );
        }
        Ok(())
    }

    /// Spawn random-read benchmark threads against one layer instead of mining
    pub fn start_benchmark(&self, layer: usize, threads: usize) -> anyhow::Result<()> {
        let source = self
            .layers
            .get(layer)
            .with_context(|| format!("no layer {}", layer))?
            .source
            .clone();
        let mut handles = self.lock_handles();
        for t in 0..threads.max(1) {
            let bench = BenchWorker::new(source.clone(), self.state.clone());
            handles.push(bench.spawn(t)?);
        }
        info!("Benchmarking layer {} ({}) with {} threads", layer, source.name(), threads);
        Ok(())
    }

    /// Serve words of the local layers to remote miners on `addr`
    pub fn serve_words(&self, addr: &str) -> anyhow::Result<()> {
        let server = Arc::new(WordServer::new(self.composite.clone(), self.state.layout.number));
        let handle = crate::rpc::spawn_server(server.clone(), addr)?;
        self.lock_handles().push(handle);
        if let Ok(mut slot) = self.word_server.lock() {
            *slot = Some(server);
        }
        Ok(())
    }

    /// Hand the miner a new work unit
    pub fn notify_new_work_unit(&self, work: WorkUnit) -> Publish {
        let height = work.header.block_height;
        let outcome = self.state.board.publish(work);
        match outcome {
            Publish::NewBlock => {
                info!("New block template at height {}", height);
                self.state.router.clear_all();
            }
            Publish::FieldTooLarge { required } => {
                error!(
                    "Work needs field {} but this miner holds field {}; stopping",
                    required, self.state.settings.selected_field
                );
                self.stop();
            }
            Publish::Refreshed => {}
        }
        outcome
    }

    /// A block was found somewhere; nothing queued can still win
    pub fn notify_new_block(&self, height: u32) {
        info!("Block {} seen; clearing queues", height);
        self.state.router.clear_all();
    }

    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Wait for every spawned thread to exit
    ///
    /// The word server thread only exits with the process, so call this
    /// after `stop` on miners that do not serve words.
    pub fn join(&self) {
        let handles: Vec<_> = self.lock_handles().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }

    /// Log mining rate, layer rates, queue sizes and share counts
    ///
    /// Rates cover the time since the previous call.
    pub fn print_stats(&self) {
        let elapsed = match self.last_stats.lock() {
            Ok(mut last) => {
                let elapsed = last.elapsed().as_secs_f64();
                *last = Instant::now();
                elapsed
            }
            Err(_) => return,
        }
        .max(1e-3);

        let ops = self.state.op_count.swap(0, Ordering::Relaxed);
        let rate = ops as f64 / elapsed;
        let mut line = format!("{:.0} second mining rate: {:.3}/sec", elapsed, rate);
        if let Some(work) = self.state.board.latest() {
            let diff = diff_for_target(&work.report_target);
            if rate > 0.0 {
                let minutes = 2f64.powf(diff) / rate / 60.0;
                line.push_str(&format!(" - at this rate {:.1} minutes per share (diff {:.1})", minutes, diff));
            }
        }
        info!("{}", line);

        if ops == 0 {
            if self.state.board.current().is_none() {
                info!("Stalled. No valid work unit; reconsider connection to pool or node");
            } else {
                info!("No hashing with a valid work unit; check layer errors");
            }
        }

        for (i, layer) in self.layers.iter().enumerate() {
            info!("  Layer {} {}: {}", i, layer.source.name(), layer.source.rate_string(elapsed));
        }
        if let Ok(slot) = self.word_server.lock() {
            if let Some(server) = slot.as_ref() {
                info!("  Word server: {}", server.rate_string(elapsed));
            }
        }
        info!("  Queues: {:?}", self.state.router.sizes());

        let (submitted, rejected, blocks) = self.state.submitter.counters.snapshot();
        info!(
            "  Shares submitted: {} rejected: {} blocks: {}",
            submitted, rejected, blocks
        );
    }

    /// Composite of all local layers
    pub fn composite(&self) -> Arc<dyn FieldSource> {
        self.composite.clone()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    /// Attempts finished since the last `print_stats`
    pub fn op_count(&self) -> u64 {
        self.state.op_count.load(Ordering::Relaxed)
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Load layers in dependency order: disk and fake layers first, then remote
/// ones, then memory layers which copy their chunks from the disk layers
pub fn load_layers(config: &MinerConfig, layout: &FieldLayout) -> anyhow::Result<Vec<Layer>> {
    let mut slots: Vec<Option<Arc<dyn FieldSource>>> = vec![None; config.layers.len()];
    let mut disk: Vec<Arc<dyn FieldSource>> = Vec::new();

    for (i, layer) in config.layers.iter().enumerate() {
        let source: Arc<dyn FieldSource> = match layer.kind {
            LayerType::File => {
                let path = layer.path.as_deref().context("file layer without path")?;
                let source = FileSource::open(path, layout, layer.range)
                    .with_context(|| format!("opening layer {} at {}", i, path.display()))?;
                info!("Layer {}: {} holds {} chunks", i, source.name(), source.holding_set().len());
                Arc::new(source)
            }
            LayerType::Fake => Arc::new(FakeSource::new(layout)),
            _ => continue,
        };
        disk.push(source.clone());
        slots[i] = Some(source);
    }

    for (i, layer) in config.layers.iter().enumerate() {
        if layer.kind != LayerType::Remote {
            continue;
        }
        let host = layer.host.as_deref().context("remote layer without host")?;
        let range = layer.range.context("remote layer without range")?;
        let source = RemoteSource::connect(host, layout, range, config.batch_size)
            .with_context(|| format!("connecting layer {} to {}", i, host))?;
        slots[i] = Some(Arc::new(source));
    }

    for (i, layer) in config.layers.iter().enumerate() {
        if layer.kind != LayerType::Mem {
            continue;
        }
        let chunks: BTreeSet<u64> = layout.chunks_in(layer.range);
        let source = MemSource::load(layout, chunks, &disk)
            .with_context(|| format!("loading memory layer {}", i))?;
        slots[i] = Some(Arc::new(source));
    }

    config
        .layers
        .iter()
        .zip(slots)
        .enumerate()
        .map(|(i, (layer, source))| {
            Ok(Layer {
                kind: layer.kind,
                source: source.with_context(|| format!("layer {} was not loaded", i))?,
                threads: layer.threads,
            })
        })
        .collect()
}
