//! Per-network field tables

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::WORD_LEN_U64;
use crate::pow::{Target, target_for_diff};
use crate::primitives::Word;

const MB: u64 = 1024 * 1024;

/// Names and sizes of the standard field ladder, field 0 first
pub const STANDARD_FIELDS: [(&str, u64); 11] = [
    ("cricket", MB),
    ("shrew", 2 * MB),
    ("stoat", 4 * MB),
    ("ocelot", 8 * MB),
    ("pudu", 16 * MB),
    ("badger", 32 * MB),
    ("capybara", 64 * MB),
    ("llama", 128 * MB),
    ("bumbear", 256 * MB),
    ("hippo", 512 * MB),
    ("shai-hulud", 1024 * MB),
];

/// Difficulty at which field 0 activates; each later field adds
/// [`ACTIVATION_STEP_BITS`]
pub const BASE_ACTIVATION_BITS: u32 = 22;

pub const ACTIVATION_STEP_BITS: u32 = 2;

/// A committed field as known to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub number: u32,
    pub name: String,
    /// Length in bytes
    pub length: u64,
    #[serde(with = "hex")]
    pub merkle_root: Word,
    /// Difficulty threshold at which this field becomes mandatory
    #[serde(with = "hex")]
    pub activation_target: Target,
}

impl FieldInfo {
    pub fn word_count(&self) -> u64 {
        self.length / WORD_LEN_U64
    }
}

/// Field table of one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub network_name: String,
    pub fields: Vec<FieldInfo>,
}

impl NetworkParams {
    pub fn new(network_name: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            fields: Vec::new(),
        }
    }

    /// Register a committed field, keeping the table sorted by number
    pub fn add_field(&mut self, number: u32, name: &str, length: u64, merkle_root: Word) {
        let activation_target =
            target_for_diff(BASE_ACTIVATION_BITS + number * ACTIVATION_STEP_BITS);
        self.fields.retain(|f| f.number != number);
        self.fields.push(FieldInfo {
            number,
            name: name.to_string(),
            length,
            merkle_root,
            activation_target,
        });
        self.fields.sort_by_key(|f| f.number);
    }

    pub fn field(&self, number: u32) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// Generation seed of a field, also its directory and base file name
    pub fn field_seed(&self, number: u32) -> String {
        format!("{}.{}", self.network_name, number)
    }

    /// Seeds of every field in the table
    pub fn field_seeds(&self) -> BTreeMap<u32, String> {
        self.fields
            .iter()
            .map(|f| (f.number, self.field_seed(f.number)))
            .collect()
    }
}

/// Standard name and length of a field number, if it is on the ladder
pub fn standard_field(number: u32) -> Option<(&'static str, u64)> {
    STANDARD_FIELDS.get(number as usize).copied()
}
