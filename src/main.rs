//! SnowField miner CLI
//!
//! # Commands
//!
//! - `generate` - Generate a standard field and commit it
//! - `commit` - Compute the Merkle root of a field file and write its decks
//! - `split` - Split a field file into chunk files for partial layers
//! - `prove` - Print the proof for one word
//! - `verify` - Check a proof against a root
//! - `mine` - Mine work units from a work file
//! - `serve` - Serve field words to remote miners
//! - `benchmark` - Measure random read rate of one layer

use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use log::{info, warn};
use snowfield::config::{LayerType, MinerConfig};
use snowfield::algorithm::merkle::field_base;
use snowfield::algorithm::network::standard_field;
use snowfield::algorithm::{
    DECK_ENTRIES, DeckSet, ProofService, SnowPowProof, WORDS_PER_CHUNK, Word, commit,
    field_word_count, generate, verify_proof,
};
use snowfield::engine::{FileSink, LogSink, Miner, SolutionSink, WorkUnit, load_layers};
use snowfield::rpc::{DEFAULT_PORT, WordServer, spawn_server};
use snowfield::source::{CompositeSource, FieldLayout, FieldSource, split_field};

#[derive(Parser)]
#[command(name = "snowfield")]
#[command(version)]
#[command(about = "SnowField memory-hard proof-of-work miner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding fields (default: <data dir>/snowfield)
    #[arg(long, global = true)]
    field_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a standard field and commit it
    Generate {
        /// Network name, the first part of the field seed
        #[arg(short, long, default_value = "snowfield")]
        network: String,

        /// Field number
        #[arg(short, long)]
        field: u32,
    },

    /// Compute the Merkle root of a field file and write its decks
    Commit {
        /// Field file
        path: PathBuf,
    },

    /// Split a field file into chunk files
    Split {
        /// Field file
        path: PathBuf,

        /// Words per chunk
        #[arg(long, default_value_t = WORDS_PER_CHUNK)]
        words_per_chunk: u64,

        /// Entries per deck level
        #[arg(long, default_value_t = DECK_ENTRIES)]
        deck_entries: u64,

        /// Layer directory; chunks go to `<out>/<base>/` (default: the
        /// directory above the field's own)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the proof for one word as JSON
    Prove {
        /// Field file; decks are looked up next to it
        path: PathBuf,

        #[arg(short, long)]
        index: u64,
    },

    /// Check a proof against a Merkle root
    Verify {
        /// Proof JSON file
        proof: PathBuf,

        /// Merkle root in hex
        #[arg(long)]
        root: String,

        /// Field length in bytes
        #[arg(long)]
        length: u64,
    },

    /// Mine the work unit in a JSON file, picking up changes to it
    Mine {
        /// Miner config file
        #[arg(short, long)]
        config: PathBuf,

        /// Work unit JSON file
        #[arg(short, long)]
        work: PathBuf,
    },

    /// Serve words of the local layers to remote miners
    Serve {
        /// Miner config file
        #[arg(short, long)]
        config: PathBuf,

        /// Listen address (default: config `listen` or 0.0.0.0:2311)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Measure random read rate of one layer
    Benchmark {
        /// Miner config file
        #[arg(short, long)]
        config: PathBuf,

        /// Layer to read from
        #[arg(short, long, default_value = "0")]
        layer: usize,

        /// Number of threads (default: number of CPU cores)
        #[arg(short, long)]
        threads: Option<usize>,

        /// How long to run
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let field_dir = cli.field_dir.unwrap_or_else(default_field_dir);

    let result = match cli.command {
        Commands::Generate { network, field } => cmd_generate(&field_dir, &network, field),
        Commands::Commit { path } => cmd_commit(&path),
        Commands::Split {
            path,
            words_per_chunk,
            deck_entries,
            out,
        } => cmd_split(&path, words_per_chunk, deck_entries, out),
        Commands::Prove { path, index } => cmd_prove(&path, index),
        Commands::Verify {
            proof,
            root,
            length,
        } => cmd_verify(&proof, &root, length),
        Commands::Mine { config, work } => cmd_mine(&config, &work),
        Commands::Serve { config, listen } => cmd_serve(&config, listen),
        Commands::Benchmark {
            config,
            layer,
            threads,
            seconds,
        } => cmd_benchmark(&config, layer, threads, seconds),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn default_field_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snowfield")
}

fn cmd_generate(field_dir: &Path, network: &str, field: u32) -> anyhow::Result<()> {
    let (name, size) =
        standard_field(field).with_context(|| format!("no standard field {}", field))?;
    let seed = format!("{}.{}", network, field);
    let dir = field_dir.join(&seed);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.snow", seed));

    println!("Generating field {} ({}, {} MB) at {}", field, name, size >> 20, path.display());
    let start = Instant::now();
    generate(&path, &seed, size)?;
    println!("Generated in {:.1}s", start.elapsed().as_secs_f64());

    let committed = commit(&path)?;
    println!("Merkle root: {}", hex::encode(committed.root));
    println!("Decks: {}", committed.decks.len());
    Ok(())
}

fn cmd_commit(path: &Path) -> anyhow::Result<()> {
    let start = Instant::now();
    let committed = commit(path)?;
    println!("Words: {}", committed.word_count);
    println!("Merkle root: {}", hex::encode(committed.root));
    for deck in &committed.decks {
        println!("Deck: {}", deck.display());
    }
    println!("Committed in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// Copy a field into `<out>/<base>/<base>.snow.<chunk>` files plus decks
fn cmd_split(
    path: &Path,
    words_per_chunk: u64,
    deck_entries: u64,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let out = match out {
        Some(out) => out,
        None => path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let split = split_field(path, &out, words_per_chunk, deck_entries)
        .with_context(|| format!("splitting {}", path.display()))?;

    println!(
        "Split {} into {} chunks in {}",
        path.display(),
        split.chunks,
        split.dir.display()
    );
    println!("Merkle root: {}", hex::encode(split.root));
    Ok(())
}

fn cmd_prove(path: &Path, index: u64) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let word_count = field_word_count(file.metadata()?.len())?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let decks = DeckSet::open(dir, &field_base(path), word_count, DECK_ENTRIES)
        .unwrap_or_else(|e| {
            warn!("No decks ({}); hashing the whole tree", e);
            DeckSet::empty(word_count)
        });

    let service = ProofService::new(file, Arc::new(decks))?;
    let proof = service.get_proof(index)?;
    println!("{}", serde_json::to_string_pretty(&proof)?);
    Ok(())
}

fn cmd_verify(proof_path: &Path, root_hex: &str, length: u64) -> anyhow::Result<()> {
    let proof: SnowPowProof = serde_json::from_slice(&fs::read(proof_path)?)?;
    let mut root: Word = [0u8; 16];
    hex::decode_to_slice(root_hex, &mut root).context("root must be 16 bytes of hex")?;

    if verify_proof(&proof, &root, length) {
        println!("Proof for word {} is valid", proof.word_index);
        Ok(())
    } else {
        anyhow::bail!("proof for word {} does not verify", proof.word_index)
    }
}

fn read_work(path: &Path) -> anyhow::Result<(WorkUnit, Option<SystemTime>)> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    let work = serde_json::from_slice(&fs::read(path)?)
        .with_context(|| format!("parsing work unit {}", path.display()))?;
    Ok((work, modified))
}

fn cmd_mine(config_path: &Path, work_path: &Path) -> anyhow::Result<()> {
    let config = MinerConfig::load(config_path)?;
    let sink: Arc<dyn SolutionSink> = match &config.solutions_path {
        Some(path) => Arc::new(FileSink::open(path)?),
        None => Arc::new(LogSink),
    };

    println!("\n=== SnowField Miner ===");
    println!("Network: {}", config.network.network_name);
    println!("Field: {}", config.selected_field);
    for (i, layer) in config.layers.iter().enumerate() {
        println!("Layer {}: {:?} threads {}", i, layer.kind, layer.threads);
    }
    println!("=======================\n");

    let miner = Miner::from_config(&config, sink)?;
    if let Some(listen) = &config.listen {
        miner.serve_words(listen)?;
    }

    let (work, mut seen) = read_work(work_path)?;
    miner.notify_new_work_unit(work);
    miner.start()?;

    let interval = Duration::from_millis(config.stats_interval_ms.max(1000));
    let poll = Duration::from_secs(1);
    let mut last_stats = Instant::now();
    while !miner.is_stopped() {
        std::thread::sleep(poll);

        let modified = fs::metadata(work_path).and_then(|m| m.modified()).ok();
        if modified != seen {
            match read_work(work_path) {
                Ok((work, m)) => {
                    seen = m;
                    miner.notify_new_work_unit(work);
                }
                Err(e) => warn!("Keeping previous work unit: {:#}", e),
            }
        }

        if last_stats.elapsed() >= interval {
            miner.print_stats();
            last_stats = Instant::now();
        }
    }

    miner.join();
    Ok(())
}

fn cmd_serve(config_path: &Path, listen: Option<String>) -> anyhow::Result<()> {
    let config = MinerConfig::load(config_path)?;
    let field = config
        .network
        .field(config.selected_field)
        .context("unknown field")?;
    let layout = FieldLayout {
        number: field.number,
        base: config.network.field_seed(field.number),
        word_count: field.word_count(),
        words_per_chunk: config.words_per_chunk,
        deck_entries: config.deck_entries,
    };

    let local: Vec<Arc<dyn FieldSource>> = load_layers(&config, &layout)?
        .into_iter()
        .filter(|l| l.kind != LayerType::Remote)
        .map(|l| l.source)
        .collect();
    let composite: Arc<dyn FieldSource> = Arc::new(CompositeSource::new(&layout, local));
    println!(
        "Serving {} of {} chunks of field {}",
        composite.holding_set().len(),
        layout.chunk_count(),
        field.number
    );

    let addr = listen
        .or(config.listen.clone())
        .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT));
    let server = Arc::new(WordServer::new(composite, layout.number));
    let _handle = spawn_server(server.clone(), &addr)?;

    let interval = Duration::from_millis(config.stats_interval_ms.max(1000));
    let mut last = Instant::now();
    loop {
        std::thread::sleep(interval);
        let elapsed = last.elapsed().as_secs_f64();
        last = Instant::now();
        info!("Word server: {}", server.rate_string(elapsed));
    }
}

fn cmd_benchmark(
    config_path: &Path,
    layer: usize,
    threads: Option<usize>,
    seconds: u64,
) -> anyhow::Result<()> {
    let config = MinerConfig::load(config_path)?;
    let threads = threads.unwrap_or_else(num_cpus::get);
    println!("Running benchmark on layer {} with {} threads for {}s...", layer, threads, seconds);

    let miner = Miner::from_config(&config, Arc::new(LogSink))?;
    let source = &miner
        .layers()
        .get(layer)
        .with_context(|| format!("no layer {}", layer))?
        .source;
    source.counter().take_reads();
    source.counter().take_calls();

    let start = Instant::now();
    miner.start_benchmark(layer, threads)?;
    std::thread::sleep(Duration::from_secs(seconds));
    miner.stop();
    miner.join();

    let elapsed = start.elapsed().as_secs_f64();
    println!("\nResults:");
    println!("  Layer: {}", source.name());
    println!("  {}", source.rate_string(elapsed));
    Ok(())
}
