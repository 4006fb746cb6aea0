use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use claimguard_model::{ClaimId, ClaimType, PlayerId, WorldId};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime as PoolRuntime};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::{ClaimStorage, RawRecord};

const CLAIM_PREFIX: &str = "claims/";
const PLAYER_PREFIX: &str = "players/";

/// JSONB rows keyed by claim / player id.
///
/// Locators are `claims/<id>` and `players/<id>`. The claim's world and type
/// are kept in their own columns so the table can be filtered without
/// touching the document.
pub struct PostgresStorage {
    pool: Pool,
    rt: Arc<Runtime>,
}

impl PostgresStorage {
    pub fn new(database_url: &str) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(PoolRuntime::Tokio1), NoTls)
            .context("Failed to create Postgres pool")?;

        // Create a runtime for bridging async/sync
        let rt = Runtime::new().context("Failed to start Postgres runtime")?;

        let storage = Self {
            pool,
            rt: Arc::new(rt),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to connect to Postgres")?;
            client
                .batch_execute(
                    "CREATE TABLE IF NOT EXISTS claims (
                        id UUID PRIMARY KEY,
                        world UUID,
                        claim_type TEXT,
                        data JSONB NOT NULL,
                        updated_at TIMESTAMP DEFAULT NOW()
                    );
                    CREATE INDEX IF NOT EXISTS idx_claims_world ON claims (world);
                    CREATE TABLE IF NOT EXISTS players (
                        id UUID PRIMARY KEY,
                        data JSONB NOT NULL,
                        updated_at TIMESTAMP DEFAULT NOW()
                    );
                    CREATE TABLE IF NOT EXISTS schema_version (
                        id INT PRIMARY KEY,
                        version INT NOT NULL
                    );",
                )
                .await
                .context("Failed to init schema")?;
            Ok(())
        })
    }

    fn parse_locator(locator: &str) -> Result<(&'static str, Uuid)> {
        let (table, id) = if let Some(id) = locator.strip_prefix(CLAIM_PREFIX) {
            ("claims", id)
        } else if let Some(id) = locator.strip_prefix(PLAYER_PREFIX) {
            ("players", id)
        } else {
            bail!("Unknown locator {}", locator);
        };
        let id = Uuid::parse_str(id).with_context(|| format!("Locator {} has no valid id", locator))?;
        Ok((table, id))
    }

    fn list_table(&self, sql: &str, prefix: &str) -> Result<Vec<RawRecord>> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let rows = client.query(sql, &[]).await?;
            Ok(rows
                .iter()
                .map(|row| {
                    let id: Uuid = row.get(0);
                    let data: Value = row.get(1);
                    RawRecord::new(format!("{}{}", prefix, id), data)
                })
                .collect())
        })
    }
}

fn column_uuid(value: &Value, key: &str) -> Option<Uuid> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

impl ClaimStorage for PostgresStorage {
    fn locate_claim(&self, _world: WorldId, _claim_type: ClaimType, id: ClaimId) -> String {
        format!("{}{}", CLAIM_PREFIX, id)
    }

    fn list_claims(&self) -> Result<Vec<RawRecord>> {
        self.list_table("SELECT id, data FROM claims ORDER BY id", CLAIM_PREFIX)
    }

    fn locate_player(&self, id: PlayerId) -> String {
        format!("{}{}", PLAYER_PREFIX, id)
    }

    fn list_players(&self) -> Result<Vec<RawRecord>> {
        self.list_table("SELECT id, data FROM players ORDER BY id", PLAYER_PREFIX)
    }

    fn read_raw(&self, locator: &str) -> Result<Option<Value>> {
        let (table, id) = Self::parse_locator(locator)?;
        let sql = format!("SELECT data FROM {} WHERE id = $1", table);
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let row = client.query_opt(sql.as_str(), &[&id]).await?;
            Ok(row.map(|row| row.get::<_, Value>(0)))
        })
    }

    fn write_raw(&self, record: &RawRecord) -> Result<()> {
        let (table, id) = Self::parse_locator(&record.locator)?;
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            if table == "claims" {
                let world = column_uuid(&record.value, "world");
                let claim_type = record
                    .value
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(ClaimType::parse)
                    .map(|t| t.as_str().to_string());
                client
                    .execute(
                        "INSERT INTO claims (id, world, claim_type, data, updated_at)
                         VALUES ($1, $2, $3, $4, NOW())
                         ON CONFLICT (id) DO UPDATE
                         SET world = $2, claim_type = $3, data = $4, updated_at = NOW()",
                        &[&id, &world, &claim_type, &record.value],
                    )
                    .await
                    .with_context(|| format!("Failed to upsert claim {}", id))?;
            } else {
                client
                    .execute(
                        "INSERT INTO players (id, data, updated_at)
                         VALUES ($1, $2, NOW())
                         ON CONFLICT (id) DO UPDATE SET data = $2, updated_at = NOW()",
                        &[&id, &record.value],
                    )
                    .await
                    .with_context(|| format!("Failed to upsert player {}", id))?;
            }
            Ok(())
        })
    }

    fn remove_raw(&self, locator: &str) -> Result<()> {
        let (table, id) = Self::parse_locator(locator)?;
        let sql = format!("DELETE FROM {} WHERE id = $1", table);
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            client.execute(sql.as_str(), &[&id]).await?;
            Ok(())
        })
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let row = client
                .query_opt("SELECT version FROM schema_version WHERE id = 1", &[])
                .await?;
            match row {
                Some(row) => {
                    let version: i32 = row.get(0);
                    u32::try_from(version)
                        .map(Some)
                        .map_err(|_| anyhow!("Negative schema version {}", version))
                }
                None => Ok(None),
            }
        })
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        let version = i32::try_from(version).context("Schema version out of range")?;
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            client
                .execute(
                    "INSERT INTO schema_version (id, version) VALUES (1, $1)
                     ON CONFLICT (id) DO UPDATE SET version = $1",
                    &[&version],
                )
                .await?;
            Ok(())
        })
    }
}
