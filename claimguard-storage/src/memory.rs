//! In-memory storage backend using HashMap.
//!
//! Useful for development and testing. Data is lost on restart.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use claimguard_model::{ClaimId, ClaimType, PlayerId, WorldId};
use serde_json::Value;

use crate::{ClaimStorage, RawRecord};

const CLAIM_PREFIX: &str = "worlds/";
const PLAYER_PREFIX: &str = "players/";

/// In-memory record storage keyed by locator.
///
/// Uses the same locator scheme as the flat-file backend, so records written
/// here look exactly like the files `FlatFileStorage` would produce.
pub struct MemoryStorage {
    records: RwLock<BTreeMap<String, Value>>,
    schema_version: RwLock<Option<u32>>,
    fail_writes: RwLock<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            schema_version: RwLock::new(None),
            fail_writes: RwLock::new(false),
        }
    }

    /// Make every subsequent write fail, to exercise save-failure paths.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().unwrap() = fail;
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.records.read().unwrap().contains_key(locator)
    }

    fn list_prefix(&self, prefix: &str) -> Vec<RawRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| RawRecord::new(k.clone(), v.clone()))
            .collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimStorage for MemoryStorage {
    fn locate_claim(&self, world: WorldId, claim_type: ClaimType, id: ClaimId) -> String {
        format!("{}{}/{}/{}.json", CLAIM_PREFIX, world, claim_type.as_str(), id)
    }

    fn list_claims(&self) -> Result<Vec<RawRecord>> {
        Ok(self.list_prefix(CLAIM_PREFIX))
    }

    fn locate_player(&self, id: PlayerId) -> String {
        format!("{}{}.json", PLAYER_PREFIX, id)
    }

    fn list_players(&self) -> Result<Vec<RawRecord>> {
        Ok(self.list_prefix(PLAYER_PREFIX))
    }

    fn read_raw(&self, locator: &str) -> Result<Option<Value>> {
        Ok(self.records.read().unwrap().get(locator).cloned())
    }

    fn write_raw(&self, record: &RawRecord) -> Result<()> {
        if *self.fail_writes.read().unwrap() {
            return Err(anyhow!("Write refused for {}", record.locator));
        }
        self.records
            .write()
            .unwrap()
            .insert(record.locator.clone(), record.value.clone());
        Ok(())
    }

    fn remove_raw(&self, locator: &str) -> Result<()> {
        if *self.fail_writes.read().unwrap() {
            return Err(anyhow!("Delete refused for {}", locator));
        }
        self.records.write().unwrap().remove(locator);
        Ok(())
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        Ok(*self.schema_version.read().unwrap())
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        *self.schema_version.write().unwrap() = Some(version);
        Ok(())
    }
}
