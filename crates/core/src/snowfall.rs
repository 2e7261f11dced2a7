//! SnowFall: deterministic generation of a field file
//!
//! The goal is a large file that is cheap to read at random but expensive to
//! produce without holding all of it. Generation runs in two phases:
//!
//! 1. A straight fill of the whole file from the stream.
//! 2. `passes` worth of mixing rounds. Each round picks `multiplicity` pages
//!    from stream output, reads them, XORs fresh stream bytes into them and
//!    writes them back. Every page read is folded into the stream, so later
//!    picks and later bytes depend on the current content of earlier pages.
//!
//! A rotating pool of precomputed stream buffers (the "monster pool") is
//! stirred into the stream on every cycle, independent of file content.
//!
//! Any I/O failure aborts generation: a partially mixed field is useless.

use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::info;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Result, SnowError};
use crate::io::{read_exact_at, write_all_at};
use crate::params::*;
use crate::primitives::SnowStream;

/// How often progress is logged during the mixing phase
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Tunables of the generator
///
/// Changing any of these changes the generated bytes; the defaults are the
/// consensus values. Smaller values exist for tests and tiny fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnowFallParams {
    /// Average number of rewrites per page
    pub passes: u64,
    /// Mixing page size in bytes
    pub page_size: usize,
    /// Pages handled per mixing round
    pub multiplicity: usize,
    /// Size of each entropy pool buffer
    pub monster_page_size: usize,
    /// Number of entropy pool buffers
    pub monster_count: usize,
    /// Block size of the straight fill
    pub write_block: usize,
}

impl Default for SnowFallParams {
    fn default() -> Self {
        Self {
            passes: PASSES,
            page_size: PAGE_SIZE,
            multiplicity: MULTIPLICITY,
            monster_page_size: MONSTER_PAGE_SIZE,
            monster_count: MONSTER_COUNT,
            write_block: WRITE_BLOCK,
        }
    }
}

impl SnowFallParams {
    /// Check the parameters against a requested field size
    pub fn validate(&self, size: u64) -> Result<()> {
        let bad = |msg: String| Err(SnowError::InvalidParams(msg));

        if size == 0 {
            return bad("field size must be positive".into());
        }
        if size % WORD_LEN_U64 != 0 {
            return Err(SnowError::Misaligned(size));
        }
        if self.page_size == 0 || self.write_block == 0 || self.monster_page_size == 0 {
            return bad("page sizes must be positive".into());
        }
        if size % self.page_size as u64 != 0 {
            return bad(format!(
                "size {} is not a multiple of page size {}",
                size, self.page_size
            ));
        }
        if size % self.write_block as u64 != 0 {
            return bad(format!(
                "size {} is not a multiple of write block {}",
                size, self.write_block
            ));
        }
        if self.multiplicity == 0 || self.page_count(size) < self.multiplicity as u64 {
            return bad(format!(
                "multiplicity {} needs at least that many pages, field has {}",
                self.multiplicity,
                self.page_count(size)
            ));
        }
        if self.monster_count < self.multiplicity {
            return bad("entropy pool must hold at least one round of buffers".into());
        }
        Ok(())
    }

    /// Number of pages in a field of `size` bytes
    pub fn page_count(&self, size: u64) -> u64 {
        size / self.page_size as u64
    }

    /// Number of mixing rounds for a field of `size` bytes
    pub fn rounds(&self, size: u64) -> u64 {
        size * self.passes / self.page_size as u64 / self.multiplicity as u64
    }
}

/// Generate a field with the consensus parameters
pub fn generate(path: &Path, seed: &str, size: u64) -> Result<()> {
    generate_with(path, seed, size, &SnowFallParams::default())
}

/// Generate a field with explicit parameters
pub fn generate_with(path: &Path, seed: &str, size: u64, params: &SnowFallParams) -> Result<()> {
    if seed.is_empty() {
        return Err(SnowError::MalformedSeed);
    }
    params.validate(size)?;

    info!(
        "Starting snowfall on {} with seed '{}' size {}, multiplicity {}",
        path.display(),
        seed,
        size,
        params.multiplicity
    );

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| SnowError::file(path, e))?;
    file.set_len(size).map_err(|e| SnowError::file(path, e))?;

    let mut snowfall = SnowFall {
        file,
        path: path.to_path_buf(),
        params: params.clone(),
        stream: SnowStream::new(seed),
        monster: VecDeque::with_capacity(params.monster_count),
        size,
    };

    snowfall.fill_monster();
    snowfall.initial_fill()?;
    snowfall.mix_pages()?;
    snowfall.sync()?;

    info!("Snowfall on {} complete", path.display());
    Ok(())
}

/// Generator state for one field file
struct SnowFall {
    file: File,
    path: PathBuf,
    params: SnowFallParams,
    stream: SnowStream,
    monster: VecDeque<Vec<u8>>,
    size: u64,
}

impl SnowFall {
    fn fill_monster(&mut self) {
        while self.monster.len() < self.params.monster_count {
            let mut page = vec![0u8; self.params.monster_page_size];
            self.stream.next_bytes(&mut page);
            self.monster.push_back(page);
        }
    }

    /// Stir the oldest pool buffer into the stream
    fn stir(&mut self) {
        if let Some(page) = self.monster.pop_front() {
            self.stream.mix_bytes(&page);
        }
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| SnowError::file(&self.path, e))
    }

    /// Phase 1: straight stream output across the whole file
    ///
    /// Not memory-hard on its own; someone could checkpoint the stream state.
    fn initial_fill(&mut self) -> Result<()> {
        let block = self.params.write_block;
        let blocks = self.size / block as u64;
        let mut buf = vec![0u8; block];

        for w in 0..blocks {
            self.stream.next_bytes(&mut buf);
            write_all_at(&self.file, &buf, w * block as u64)
                .map_err(|e| SnowError::file(&self.path, e))?;
            self.stir();
            self.fill_monster();

            if w % 128 == 0 {
                info!(
                    "Initial write of {} - {} of {} blocks done",
                    self.path.display(),
                    w,
                    blocks
                );
            }
        }
        self.fill_monster();
        self.sync()?;

        info!("Initial write complete");
        Ok(())
    }

    /// Phase 2: read, mix and rewrite pseudorandomly chosen pages
    fn mix_pages(&mut self) -> Result<()> {
        let multiplicity = self.params.multiplicity;
        let page_size = self.params.page_size;
        let page_count = self.params.page_count(self.size);
        let rounds = self.params.rounds(self.size);

        let mut fresh = vec![vec![0u8; page_size]; multiplicity];
        let mut existing = vec![vec![0u8; page_size]; multiplicity];
        let mut locations = vec![[0u8; 8]; multiplicity];
        let mut offsets = vec![0u64; multiplicity];
        let mut claimed: HashSet<u64> = HashSet::with_capacity(multiplicity * 2 + 1);

        let start = Instant::now();
        let mut last_report = Instant::now();

        for round in 0..rounds {
            if last_report.elapsed() >= REPORT_INTERVAL || round + 1 == rounds {
                self.report(round, rounds, start.elapsed());
                last_report = Instant::now();
            }

            for m in 0..multiplicity {
                self.stir();
                self.stream.next_bytes(&mut fresh[m]);
                self.stream.next_bytes(&mut locations[m]);
            }
            self.fill_monster();

            // Colliding picks move forward to the next unclaimed page
            claimed.clear();
            for (offset, location) in offsets.iter_mut().zip(locations.iter()) {
                let mut pos = u64::from_be_bytes(*location) % page_count;
                while !claimed.insert(pos) {
                    pos = (pos + 1) % page_count;
                }
                *offset = pos * page_size as u64;
            }

            read_pages(&self.file, &offsets, &mut existing)
                .map_err(|e| SnowError::file(&self.path, e))?;

            for (new_page, old_page) in fresh.iter_mut().zip(existing.iter()) {
                self.stream.mix_bytes(old_page);
                for (n, o) in new_page.iter_mut().zip(old_page.iter()) {
                    *n ^= *o;
                }
                self.stream.mix_bytes(new_page);
            }

            write_pages(&self.file, &offsets, &fresh)
                .map_err(|e| SnowError::file(&self.path, e))?;
        }

        Ok(())
    }

    fn report(&self, round: u64, rounds: u64, elapsed: Duration) {
        let writes = (round * self.params.multiplicity as u64) as f64;
        let secs = elapsed.as_secs_f64().max(1e-9);
        let rate = writes / secs;
        let total_writes = (rounds * self.params.multiplicity as u64) as f64;
        let runtime_hours = if rate > 0.0 {
            total_writes / rate / 3600.0
        } else {
            0.0
        };

        info!(
            "Generating snow field at {:.2} writes per second. Estimated total runtime is {:.2} hours. {:.2} complete.",
            rate,
            runtime_hours,
            round as f64 / rounds.max(1) as f64
        );
    }
}

/// Read every page of a round in parallel
#[cfg(feature = "parallel")]
fn read_pages(file: &File, offsets: &[u64], pages: &mut [Vec<u8>]) -> std::io::Result<()> {
    pages
        .par_iter_mut()
        .zip(offsets.par_iter())
        .try_for_each(|(page, &offset)| read_exact_at(file, page, offset))
}

/// Read every page of a round (sequential fallback)
#[cfg(not(feature = "parallel"))]
fn read_pages(file: &File, offsets: &[u64], pages: &mut [Vec<u8>]) -> std::io::Result<()> {
    for (page, &offset) in pages.iter_mut().zip(offsets.iter()) {
        read_exact_at(file, page, offset)?;
    }
    Ok(())
}

/// Write every page of a round in parallel
#[cfg(feature = "parallel")]
fn write_pages(file: &File, offsets: &[u64], pages: &[Vec<u8>]) -> std::io::Result<()> {
    pages
        .par_iter()
        .zip(offsets.par_iter())
        .try_for_each(|(page, &offset)| write_all_at(file, page, offset))
}

/// Write every page of a round (sequential fallback)
#[cfg(not(feature = "parallel"))]
fn write_pages(file: &File, offsets: &[u64], pages: &[Vec<u8>]) -> std::io::Result<()> {
    for (page, &offset) in pages.iter().zip(offsets.iter()) {
        write_all_at(file, page, offset)?;
    }
    Ok(())
}
