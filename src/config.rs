//! Miner configuration
//!
//! Loaded from a JSON file. Every field has a default, so a minimal config only
//! names the network, the selected field and its layers:
//!
//! ```json
//! {
//!   "network": { "network_name": "spoon", "fields": [ ... ] },
//!   "selected_field": 4,
//!   "layers": [
//!     { "type": "mem",  "threads": 8, "range": [0, 3] },
//!     { "type": "file", "threads": 4, "path": "/var/snow" },
//!     { "type": "remote", "threads": 2, "host": "http://peer:2311", "range": [4, 7] }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snowfield_core::merkle::check_deck_entries;
use snowfield_core::{DECK_ENTRIES, NetworkParams, WORDS_PER_CHUNK};

use crate::error::ConfigError;

/// Default capacity of each layer queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default number of words fetched per remote call
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Storage backend of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    File,
    Mem,
    Remote,
    Fake,
}

/// One storage layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(rename = "type")]
    pub kind: LayerType,
    /// Worker threads serving this layer's queue
    pub threads: usize,
    /// Field root directory (file layers)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Inclusive chunk range; file layers default to every chunk
    #[serde(default)]
    pub range: Option<(u64, u64)>,
    /// Word server URL (remote layers)
    #[serde(default)]
    pub host: Option<String>,
}

/// Miner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub network: NetworkParams,
    pub selected_field: u32,
    pub layers: Vec<LayerConfig>,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub words_per_chunk: u64,
    pub deck_entries: u64,
    /// Work units older than this (by header timestamp) are ignored
    pub work_max_age_ms: u64,
    pub idle_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub stats_interval_ms: u64,
    /// Address for the word server, e.g. `0.0.0.0:2311`
    pub listen: Option<String>,
    /// Verify proofs of every solution before handing it on
    pub self_check: bool,
    /// Append solutions as JSON lines to this file
    pub solutions_path: Option<PathBuf>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            network: NetworkParams::new("snowfield"),
            selected_field: 0,
            layers: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            words_per_chunk: WORDS_PER_CHUNK,
            deck_entries: DECK_ENTRIES,
            work_max_age_ms: 45_000,
            idle_backoff_ms: 250,
            error_backoff_ms: 5_000,
            stats_interval_ms: 15_000,
            listen: None,
            self_check: true,
            solutions_path: None,
        }
    }
}

/// Timing and sizing knobs of the pass engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub selected_field: u32,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub work_max_age: Duration,
    pub idle_backoff: Duration,
    pub error_backoff: Duration,
    pub self_check: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        MinerConfig::default().engine_settings()
    }
}

impl MinerConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MinerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        let field = self
            .network
            .field(self.selected_field)
            .ok_or(ConfigError::UnknownField(self.selected_field))?;
        check_deck_entries(field.word_count(), self.deck_entries)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.words_per_chunk == 0 {
            return Err(ConfigError::Invalid("words_per_chunk must be positive".into()));
        }
        if self.batch_size == 0 || self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "batch_size and queue_capacity must be positive".into(),
            ));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.threads == 0 {
                return Err(ConfigError::NoThreads { layer: i });
            }
            match layer.kind {
                LayerType::File if layer.path.is_none() => {
                    return Err(ConfigError::MissingKey { layer: i, key: "path" });
                }
                LayerType::Mem if layer.range.is_none() => {
                    return Err(ConfigError::MissingKey { layer: i, key: "range" });
                }
                LayerType::Remote if layer.host.is_none() => {
                    return Err(ConfigError::MissingKey { layer: i, key: "host" });
                }
                LayerType::Remote if layer.range.is_none() => {
                    return Err(ConfigError::MissingKey { layer: i, key: "range" });
                }
                _ => {}
            }
            if let Some((start, end)) = layer.range {
                if end < start {
                    return Err(ConfigError::InvertedRange { layer: i, start, end });
                }
            }
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            selected_field: self.selected_field,
            queue_capacity: self.queue_capacity,
            batch_size: self.batch_size,
            work_max_age: Duration::from_millis(self.work_max_age_ms),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            self_check: self.self_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkParams {
        let mut params = NetworkParams::new("spoon");
        params.add_field(0, "cricket", 1024 * 1024, [0; 16]);
        params
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config: MinerConfig = serde_json::from_str(
            r#"{ "layers": [ { "type": "fake", "threads": 2 } ] }"#,
        )
        .unwrap();

        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.words_per_chunk, WORDS_PER_CHUNK);
        assert_eq!(config.work_max_age_ms, 45_000);
        assert_eq!(config.layers[0].kind, LayerType::Fake);
        assert!(config.layers[0].range.is_none());
    }

    #[test]
    fn test_validate_layers() {
        let mut config = MinerConfig {
            network: network(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoLayers)));

        config.layers.push(LayerConfig {
            kind: LayerType::File,
            threads: 1,
            path: None,
            range: None,
            host: None,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey { layer: 0, key: "path" })
        ));

        config.layers[0].path = Some("/tmp".into());
        assert!(config.validate().is_ok());

        config.layers.push(LayerConfig {
            kind: LayerType::Mem,
            threads: 1,
            path: None,
            range: Some((3, 1)),
            host: None,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedRange { layer: 1, .. })
        ));

        config.layers[1].range = Some((0, 1));
        config.selected_field = 5;
        assert!(matches!(config.validate(), Err(ConfigError::UnknownField(5))));
    }

    #[test]
    fn test_deck_entries_checked() {
        let mut config = MinerConfig {
            network: network(),
            layers: vec![LayerConfig {
                kind: LayerType::Fake,
                threads: 1,
                path: None,
                range: None,
                host: None,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        for bad in [0, 1, 1000] {
            config.deck_entries = bad;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        config.deck_entries = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_layer_type_rejected() {
        let parsed = serde_json::from_str::<MinerConfig>(
            r#"{ "layers": [ { "type": "tape", "threads": 2 } ] }"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_remote_needs_host_and_range() {
        let config: MinerConfig = serde_json::from_value(serde_json::json!({
            "network": network(),
            "layers": [ { "type": "remote", "threads": 1, "range": [0, 0] } ]
        }))
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey { key: "host", .. })
        ));
    }
}
