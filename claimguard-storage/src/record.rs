//! JSON record envelope shared by every backend.
//!
//! A record is the serde form of a [`Claim`] or [`PlayerData`] plus two
//! bookkeeping keys: `version` (schema version the record was written at) and
//! `migrations` (names of the migration steps already applied to it).

use anyhow::{Context, Result};
use claimguard_model::{Claim, PlayerData};
use serde_json::{Map, Value};

use crate::migration::{CURRENT_SCHEMA_VERSION, STEP_NAMES};

pub const VERSION_KEY: &str = "version";
pub const MIGRATIONS_KEY: &str = "migrations";

/// A record as stored, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub locator: String,
    pub value: Value,
}

impl RawRecord {
    pub fn new(locator: impl Into<String>, value: Value) -> Self {
        Self {
            locator: locator.into(),
            value,
        }
    }

    pub fn object_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.value.as_object_mut()
    }

    /// Schema version stamped on the record (1 for unstamped legacy records).
    pub fn version(&self) -> u32 {
        self.value
            .get(VERSION_KEY)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(1)
    }

    pub fn has_step(&self, step: &str) -> bool {
        self.value
            .get(MIGRATIONS_KEY)
            .and_then(Value::as_array)
            .is_some_and(|steps| steps.iter().any(|s| s.as_str() == Some(step)))
    }

    /// Mark a migration step as applied and bump the record version to at least `version`.
    pub fn mark_step(&mut self, step: &str, version: u32) {
        if self.has_step(step) {
            return;
        }
        let current = self.version();
        if let Some(obj) = self.object_mut() {
            let steps = obj
                .entry(MIGRATIONS_KEY)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = steps {
                list.push(Value::String(step.to_string()));
            } else {
                *steps = Value::Array(vec![Value::String(step.to_string())]);
            }
            obj.insert(VERSION_KEY.to_string(), Value::from(current.max(version)));
        }
    }
}

fn stamp(value: &mut Value) {
    if let Value::Object(obj) = value {
        obj.insert(VERSION_KEY.to_string(), Value::from(CURRENT_SCHEMA_VERSION));
        obj.insert(
            MIGRATIONS_KEY.to_string(),
            Value::Array(STEP_NAMES.iter().map(|s| Value::from(*s)).collect()),
        );
    }
}

/// Serialize a claim as a current-version record.
pub fn encode_claim(claim: &Claim) -> Result<Value> {
    let mut value = serde_json::to_value(claim)
        .with_context(|| format!("Failed to encode claim {}", claim.id))?;
    stamp(&mut value);
    Ok(value)
}

/// Decode a claim record; the record's locator becomes the claim's locator.
pub fn decode_claim(record: &RawRecord) -> Result<Claim> {
    let mut claim: Claim = serde_json::from_value(record.value.clone())
        .with_context(|| format!("Malformed claim record at {}", record.locator))?;
    claim.locator = Some(record.locator.clone());
    Ok(claim)
}

pub fn encode_player(player: &PlayerData) -> Result<Value> {
    let mut value = serde_json::to_value(player)
        .with_context(|| format!("Failed to encode player {}", player.id))?;
    stamp(&mut value);
    Ok(value)
}

pub fn decode_player(record: &RawRecord) -> Result<PlayerData> {
    serde_json::from_value(record.value.clone())
        .with_context(|| format!("Malformed player record at {}", record.locator))
}
