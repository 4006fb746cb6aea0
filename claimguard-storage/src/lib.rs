use anyhow::Result;
use claimguard_model::{Claim, ClaimId, ClaimType, PlayerData, PlayerId, WorldId};

pub mod flatfile;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod record;

pub use flatfile::FlatFileStorage;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

pub use migration::{MigrationOptions, MigrationReport, CURRENT_SCHEMA_VERSION};
pub use record::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    FlatFile, // One JSON file per record
    Postgres, // JSONB rows
    Memory,   // Tests and dry runs
}

impl StorageMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "flat" | "flatfile" | "file" => Some(StorageMode::FlatFile),
            "postgres" | "pg" | "sql" => Some(StorageMode::Postgres),
            "memory" | "none" => Some(StorageMode::Memory),
            _ => None,
        }
    }
}

/// Durable storage for claim and player records.
///
/// Implementations:
/// - `FlatFileStorage` - one JSON file per record under a root directory
/// - `PostgresStorage` - JSONB rows keyed by claim / player id
/// - `MemoryStorage` - HashMap (for tests and dry runs)
///
/// Every call is synchronous: the registry writes through on each mutation
/// and expects the record to be durable when the call returns.
pub trait ClaimStorage: Send + Sync {
    /// Locator a claim with this identity is stored under.
    fn locate_claim(&self, world: WorldId, claim_type: ClaimType, id: ClaimId) -> String;

    /// Every claim record in the store, undecoded.
    /// Records that are not even valid JSON are logged and skipped.
    fn list_claims(&self) -> Result<Vec<RawRecord>>;

    /// Write a claim, removing any stale copy at its previous locator.
    /// Returns the locator it was written to.
    fn save_claim(&self, claim: &Claim) -> Result<String> {
        let locator = self.locate_claim(claim.world, claim.claim_type, claim.id);
        let value = record::encode_claim(claim)?;
        self.write_raw(&RawRecord::new(locator.clone(), value))?;
        if let Some(previous) = claim.locator.as_deref().filter(|p| *p != locator) {
            self.remove_raw(previous)?;
        }
        Ok(locator)
    }

    /// Remove a claim record. Missing records are not an error.
    fn delete_claim(&self, claim: &Claim) -> Result<()> {
        let locator = claim
            .locator
            .clone()
            .unwrap_or_else(|| self.locate_claim(claim.world, claim.claim_type, claim.id));
        self.remove_raw(&locator)
    }

    fn locate_player(&self, id: PlayerId) -> String;

    /// Every player record in the store, undecoded.
    fn list_players(&self) -> Result<Vec<RawRecord>>;

    fn load_player(&self, id: PlayerId) -> Result<Option<PlayerData>> {
        let locator = self.locate_player(id);
        match self.read_raw(&locator)? {
            Some(value) => record::decode_player(&RawRecord::new(locator, value)).map(Some),
            None => Ok(None),
        }
    }

    fn save_player(&self, player: &PlayerData) -> Result<()> {
        let value = record::encode_player(player)?;
        self.write_raw(&RawRecord::new(self.locate_player(player.id), value))
    }

    /// Read one undecoded record.
    fn read_raw(&self, locator: &str) -> Result<Option<serde_json::Value>>;

    /// Write one undecoded record at its locator.
    fn write_raw(&self, record: &RawRecord) -> Result<()>;

    /// Remove the record at a locator. Missing records are not an error.
    fn remove_raw(&self, locator: &str) -> Result<()>;

    /// Store-wide schema version, `None` if the store has never been stamped.
    fn schema_version(&self) -> Result<Option<u32>>;

    fn set_schema_version(&self, version: u32) -> Result<()>;
}
