//! Work units and the board holding the current one

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use snowfield_core::{BlockHeader, NONCE_LENGTH, Target};

/// A header template to mine on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub header: BlockHeader,
    /// Attempts below this target are reported as shares
    #[serde(with = "hex")]
    pub report_target: Target,
    /// Leading bytes of `header.nonce` every attempt must keep
    #[serde(default)]
    pub nonce_prefix_len: usize,
}

impl WorkUnit {
    pub fn nonce_prefix(&self) -> &[u8] {
        &self.header.nonce[..self.nonce_prefix_len.min(NONCE_LENGTH)]
    }
}

/// Milliseconds since the unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of publishing a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Same height as before
    Refreshed,
    /// Higher height; in-flight attempts are now stale
    NewBlock,
    /// The unit needs a bigger field than this miner holds
    FieldTooLarge { required: u32 },
}

/// The latest work unit plus a generation number bumped on every new block
///
/// Attempts remember the generation they started in; a mismatch means the
/// attempt belongs to an old block and its result must be dropped.
pub struct WorkBoard {
    current: RwLock<Option<Arc<WorkUnit>>>,
    generation: AtomicU64,
    max_age: Duration,
    selected_field: u32,
}

impl WorkBoard {
    pub fn new(selected_field: u32, max_age: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            max_age,
            selected_field,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Install a new work unit, mining it on the selected field
    pub fn publish(&self, mut work: WorkUnit) -> Publish {
        let required = work.header.snow_field;
        if required > self.selected_field {
            self.clear();
            return Publish::FieldTooLarge { required };
        }
        work.header.snow_field = self.selected_field;

        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let new_block = match current.as_ref() {
            Some(old) => work.header.block_height > old.header.block_height,
            None => true,
        };
        if new_block {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        *current = Some(Arc::new(work));

        if new_block { Publish::NewBlock } else { Publish::Refreshed }
    }

    /// Forget the current unit and invalidate every attempt in flight
    pub fn clear(&self) {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Current unit with its generation, unless missing or expired
    pub fn current(&self) -> Option<(Arc<WorkUnit>, u64)> {
        let current = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let work = current.as_ref()?;
        let age_limit = work.header.timestamp.saturating_add(self.max_age.as_millis() as u64);
        if age_limit < now_ms() {
            return None;
        }
        Some((work.clone(), self.generation()))
    }

    /// Latest unit even if expired, for reporting
    pub fn latest(&self) -> Option<Arc<WorkUnit>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn work_at(height: u32, field: u32) -> WorkUnit {
        WorkUnit {
            header: BlockHeader {
                version: 1,
                block_height: height,
                timestamp: now_ms(),
                snow_field: field,
                prev_block_hash: [height as u8; 32],
                merkle_root_hash: [0; 32],
                utxo_root_hash: [0; 32],
                target: [0; 32],
                nonce: [0xaa; 12],
                snow_hash: [0; 32],
                pow_proofs: vec![],
            },
            report_target: [0xff; 32],
            nonce_prefix_len: 2,
        }
    }

    #[test]
    fn test_generation_bumps_on_new_height_only() {
        let board = WorkBoard::new(3, Duration::from_secs(45));
        assert!(board.current().is_none());

        assert_eq!(board.publish(work_at(10, 1)), Publish::NewBlock);
        let (work, g1) = board.current().unwrap();
        assert_eq!(work.header.snow_field, 3);

        assert_eq!(board.publish(work_at(10, 1)), Publish::Refreshed);
        assert!(board.is_current(g1));

        assert_eq!(board.publish(work_at(11, 1)), Publish::NewBlock);
        assert!(!board.is_current(g1));
    }

    #[test]
    fn test_field_too_large() {
        let board = WorkBoard::new(1, Duration::from_secs(45));
        board.publish(work_at(5, 0));
        assert_eq!(
            board.publish(work_at(6, 2)),
            Publish::FieldTooLarge { required: 2 }
        );
        assert!(board.current().is_none());
    }

    #[test]
    fn test_expired_work_is_ignored() {
        let board = WorkBoard::new(0, Duration::from_millis(1000));
        let mut old = work_at(5, 0);
        old.header.timestamp = now_ms() - 5_000;
        board.publish(old);
        assert!(board.current().is_none());
        assert!(board.latest().is_some());
    }

    #[test]
    fn test_report_target_is_hex_in_json() {
        let work = work_at(3, 0);
        let json = serde_json::to_value(&work).unwrap();
        assert_eq!(json["report_target"], "ff".repeat(32));

        let back: WorkUnit = serde_json::from_value(json).unwrap();
        assert_eq!(back, work);
    }
}
