//! Turning a finished attempt into a submitted header

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use log::{error, info};
use serde::Serialize;
use snowfield_core::pow::replay_passes;
use snowfield_core::{
    BlockHeader, FieldInfo, POW_LOOK_PASSES, ProofService, Word, hash_header_bits,
    less_than_target, next_context, next_word_index, verify_proof,
};

use super::partial::PartialWork;
use super::work::WorkUnit;
use crate::source::{FieldSource, SourceReader};

/// Where completed headers go
pub trait SolutionSink: Send + Sync {
    /// Returns whether the receiver accepted the share
    fn submit(&self, work: &WorkUnit, header: &BlockHeader) -> anyhow::Result<bool>;
}

/// Logs solutions and accepts them
pub struct LogSink;

impl SolutionSink for LogSink {
    fn submit(&self, _work: &WorkUnit, header: &BlockHeader) -> anyhow::Result<bool> {
        info!(
            "Solution at height {}: nonce {} hash {}",
            header.block_height,
            hex::encode(header.nonce),
            hex::encode(header.snow_hash)
        );
        Ok(true)
    }
}

#[derive(Serialize)]
struct SolutionRecord<'a> {
    work: &'a WorkUnit,
    header: &'a BlockHeader,
}

/// Appends solutions as JSON lines
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening solutions file {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl SolutionSink for FileSink {
    fn submit(&self, work: &WorkUnit, header: &BlockHeader) -> anyhow::Result<bool> {
        let mut line = serde_json::to_string(&SolutionRecord { work, header })?;
        line.push('\n');
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(true)
    }
}

/// Forwards solutions over a channel
pub struct ChannelSink {
    sender: Mutex<Sender<BlockHeader>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<BlockHeader>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl SolutionSink for ChannelSink {
    fn submit(&self, _work: &WorkUnit, header: &BlockHeader) -> anyhow::Result<bool> {
        let sender = match self.sender.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(sender.send(header.clone()).is_ok())
    }
}

/// Share counters
#[derive(Debug, Default)]
pub struct ShareCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub blocks: AtomicU64,
}

impl ShareCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.submitted.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.blocks.load(Ordering::Relaxed),
        )
    }
}

/// Rebuilds a finished attempt with proofs and hands it to the sink
pub struct Submitter {
    /// Reads words; the composite of all local layers
    source: Arc<dyn FieldSource>,
    /// `None` when no layer has decks (fake fields)
    proofs: Option<ProofService<SourceReader>>,
    /// Root for self checks
    field: Option<FieldInfo>,
    sink: Arc<dyn SolutionSink>,
    pub counters: ShareCounters,
}

impl Submitter {
    pub fn new(
        source: Arc<dyn FieldSource>,
        proofs: Option<ProofService<SourceReader>>,
        field: Option<FieldInfo>,
        sink: Arc<dyn SolutionSink>,
    ) -> Self {
        Self {
            source,
            proofs,
            field,
            sink,
            counters: ShareCounters::default(),
        }
    }

    /// Build the full header for `pw` and submit it
    pub fn submit(&self, pw: &PartialWork) -> anyhow::Result<()> {
        let work = &pw.work;
        let word_count = self.source.layout().word_count;

        let mut header = work.header.clone();
        header.nonce = pw.nonce;
        header.pow_proofs.clear();

        let mut context = hash_header_bits(&header, &pw.nonce);
        for _ in 0..POW_LOOK_PASSES {
            let index = next_word_index(&context, word_count);
            let word: Word = match &self.proofs {
                Some(proofs) => {
                    let proof = proofs
                        .get_proof(index)
                        .with_context(|| format!("building proof for word {}", index))?;
                    let word = *proof.word().context("empty proof")?;
                    header.pow_proofs.push(proof);
                    word
                }
                None => self.source.read_word(index)?,
            };
            context = next_context(&context, &word);
        }

        if context != pw.context {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            bail!(
                "rebuilt pass chain {} disagrees with attempt {}",
                hex::encode(context),
                hex::encode(pw.context)
            );
        }
        header.snow_hash = context;

        if let Some(field) = &self.field {
            if let Err(e) = self.self_check(&header, field) {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                error!("Dropping solution that fails self check: {}", e);
                return Ok(());
            }
        }

        if less_than_target(&header.snow_hash, &header.target) {
            self.counters.blocks.fetch_add(1, Ordering::Relaxed);
        }
        let accepted = self.sink.submit(work, &header)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            "Work submit: height {} accepted {}",
            header.block_height, accepted
        );
        Ok(())
    }

    fn self_check(&self, header: &BlockHeader, field: &FieldInfo) -> anyhow::Result<()> {
        for proof in &header.pow_proofs {
            if !verify_proof(proof, &field.merkle_root, field.length) {
                bail!("proof for word {} does not verify", proof.word_index);
            }
        }
        let replayed = replay_passes(header, field)?;
        if replayed != header.snow_hash {
            bail!("replayed hash does not match");
        }
        Ok(())
    }
}
