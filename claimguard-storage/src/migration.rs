//! Schema migration for stored claim and player records.
//!
//! Versions:
//! - 1: legacy records keyed by claim name, camel-case field names, 2D footprints
//! - 2: field names match the current record layout
//! - 3: every claim carries a stable UUID and lives at its id-keyed locator
//! - 4: every claim has a 3D box (current)
//!
//! Each step is idempotent and is marked on the record as soon as the record is
//! written back, so an interrupted run resumes where it stopped.

use anyhow::{bail, Context, Result};
use claimguard_model::{ClaimType, WorldId, GLOBAL_SCOPE};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::record::RawRecord;
use crate::ClaimStorage;

pub const CURRENT_SCHEMA_VERSION: u32 = 4;

const RENAME_FIELDS: &str = "rename_legacy_fields";
const ASSIGN_IDS: &str = "assign_stable_ids";
const EXTEND_FOOTPRINTS: &str = "extend_legacy_footprints";

/// Every step, in the order it runs.
pub const STEP_NAMES: [&str; 3] = [RENAME_FIELDS, ASSIGN_IDS, EXTEND_FOOTPRINTS];

/// Namespace for ids derived from legacy claim names.
const LEGACY_NAMESPACE: Uuid = Uuid::from_u128(0x6a1d_4c3e_9b0f_4f6e_8d2a_51c7_e0b3_9f21);

const CLAIM_RENAMES: [(&str, &str); 8] = [
    ("claimType", "type"),
    ("ownerUniqueId", "owner"),
    ("lesserBoundaryCorner", "lesser"),
    ("greaterBoundaryCorner", "greater"),
    ("parentUniqueId", "parent"),
    ("claimName", "name"),
    ("dateCreated", "created"),
    ("dateLastActive", "modified"),
];

/// Settings for rebuilding 3D boxes from legacy 2D footprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Depth assumed when a legacy footprint did not record one.
    pub surface_level: i32,
    pub extend_below: i32,
    pub extend_above: i32,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            surface_level: 63,
            extend_below: 127,
            extend_above: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: Option<u32>,
    pub to_version: u32,
    pub claims_migrated: usize,
    pub players_migrated: usize,
    pub records_relocated: usize,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self.claims_migrated + self.players_migrated + self.records_relocated > 0
            || self.from_version != Some(self.to_version)
    }
}

/// Id a legacy claim stored at `locator` receives. Deterministic so re-runs agree.
///
/// Names are not unique inside a world, locators are, so the locator is the seed.
pub fn legacy_claim_id(world: WorldId, locator: &str) -> Uuid {
    Uuid::new_v5(&LEGACY_NAMESPACE, format!("{}/{}", world, locator).as_bytes())
}

/// Horizontal corners `(min_x, min_z, max_x, max_z)` of a claim record, if both corners parse.
fn footprint(obj: &Map<String, Value>) -> Option<(i64, i64, i64, i64)> {
    let corner = |key: &str| {
        let c = obj.get(key)?;
        Some((c.get("x")?.as_i64()?, c.get("z")?.as_i64()?))
    };
    let (ax, az) = corner("lesser")?;
    let (bx, bz) = corner("greater")?;
    Some((ax.min(bx), az.min(bz), ax.max(bx), az.max(bz)))
}

/// Whether two claim records describe the same claim: same world, type, owner,
/// name and footprint. Heights are ignored since a legacy copy may still be 2D.
fn same_claim(a: &RawRecord, b: &RawRecord) -> bool {
    let (Some(a), Some(b)) = (a.value.as_object(), b.value.as_object()) else {
        return false;
    };
    ["world", "type", "owner", "name"]
        .iter()
        .all(|key| a.get(*key) == b.get(*key))
        && footprint(a).is_some()
        && footprint(a) == footprint(b)
}

/// A claim as seen before the id step, used to resolve legacy `parentName` links.
struct LegacyEntry {
    id: Uuid,
    world: WorldId,
    locator: String,
    name: Option<String>,
    owner: Option<Value>,
    footprint: Option<(i64, i64, i64, i64)>,
}

#[derive(Default)]
struct LegacyNames {
    entries: Vec<LegacyEntry>,
}

impl LegacyNames {
    fn build(claims: &[RawRecord]) -> Self {
        let entries = claims
            .iter()
            .filter_map(|record| {
                let obj = record.value.as_object()?;
                let world = parse_uuid(obj.get("world"))?;
                let id = parse_uuid(obj.get("id"))
                    .unwrap_or_else(|| legacy_claim_id(world, &record.locator));
                Some(LegacyEntry {
                    id,
                    world,
                    locator: record.locator.clone(),
                    name: obj.get("name").and_then(Value::as_str).map(str::to_string),
                    owner: obj.get("owner").cloned(),
                    footprint: footprint(obj),
                })
            })
            .collect();
        Self { entries }
    }

    /// The claim named `name` that best fits as the parent of `child`: one whose
    /// footprint holds the child first, then one with the same owner, then the
    /// lowest locator.
    fn resolve_parent(
        &self,
        world: WorldId,
        name: &str,
        child: &Map<String, Value>,
        child_id: Uuid,
    ) -> Option<Uuid> {
        let child_box = footprint(child);
        let holds = |e: &LegacyEntry| match (e.footprint, child_box) {
            (Some(p), Some(c)) => p.0 <= c.0 && p.1 <= c.1 && c.2 <= p.2 && c.3 <= p.3,
            _ => false,
        };
        let same_owner = |e: &LegacyEntry| e.owner.is_some() && e.owner.as_ref() == child.get("owner");
        self.entries
            .iter()
            .filter(|e| e.world == world && e.id != child_id && e.name.as_deref() == Some(name))
            .min_by(|a, b| {
                holds(b)
                    .cmp(&holds(a))
                    .then(same_owner(b).cmp(&same_owner(a)))
                    .then(a.locator.cmp(&b.locator))
            })
            .map(|e| e.id)
    }
}

/// Bring the store up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate(storage: &dyn ClaimStorage, options: &MigrationOptions) -> Result<MigrationReport> {
    let stored = storage.schema_version()?;
    let mut report = MigrationReport {
        from_version: stored,
        to_version: CURRENT_SCHEMA_VERSION,
        ..Default::default()
    };

    match stored {
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            bail!("Store schema version {} is newer than supported {}", v, CURRENT_SCHEMA_VERSION)
        }
        Some(v) if v == CURRENT_SCHEMA_VERSION => return Ok(report),
        _ => {}
    }

    let mut claims = storage.list_claims().context("Failed to list claims for migration")?;
    let mut players = storage.list_players().context("Failed to list players for migration")?;

    if stored.is_none() && claims.is_empty() && players.is_empty() {
        log::info!("Migration: empty store, stamping schema version {}", CURRENT_SCHEMA_VERSION);
        storage.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        return Ok(report);
    }

    let from = stored.unwrap_or(1);
    log::info!(
        "Migration: upgrading {} claim and {} player records from version {} to {}",
        claims.len(),
        players.len(),
        from,
        CURRENT_SCHEMA_VERSION
    );

    for (index, step) in STEP_NAMES.iter().enumerate() {
        let target = index as u32 + 2;
        if target <= from {
            continue;
        }

        let names = if *step == ASSIGN_IDS {
            LegacyNames::build(&claims)
        } else {
            LegacyNames::default()
        };

        let mut i = 0;
        while i < claims.len() {
            if claims[i].has_step(step) {
                i += 1;
                continue;
            }
            let old_locator = claims[i].locator.clone();
            let mut migrated = claims[i].clone();
            apply_claim_step(step, &mut migrated, storage, options, &names);
            migrated.mark_step(step, target);

            if migrated.locator != old_locator {
                let occupant = claims.iter().find(|r| r.locator == migrated.locator);
                if occupant.is_some_and(|r| same_claim(r, &migrated)) {
                    // A previous interrupted run already moved this record; keep that copy.
                    storage
                        .remove_raw(&old_locator)
                        .with_context(|| format!("Migration: failed to remove {}", old_locator))?;
                    log::info!("Migration: dropped stale copy {}", old_locator);
                    claims.remove(i);
                    continue;
                }
                if occupant.is_some() {
                    rekey(&mut migrated, &old_locator, storage, &claims);
                }
                storage
                    .write_raw(&migrated)
                    .with_context(|| format!("Migration: failed to write {}", migrated.locator))?;
                storage
                    .remove_raw(&old_locator)
                    .with_context(|| format!("Migration: failed to remove {}", old_locator))?;
                report.records_relocated += 1;
                log::info!("Migration: relocated {} -> {}", old_locator, migrated.locator);
            } else {
                storage
                    .write_raw(&migrated)
                    .with_context(|| format!("Migration: failed to write {}", migrated.locator))?;
            }
            report.claims_migrated += 1;
            claims[i] = migrated;
            i += 1;
        }

        for record in players.iter_mut().filter(|r| !r.has_step(step)) {
            if *step == RENAME_FIELDS {
                rename_player_fields(record);
            }
            record.mark_step(step, target);
            storage
                .write_raw(record)
                .with_context(|| format!("Migration: failed to write {}", record.locator))?;
            report.players_migrated += 1;
        }

        log::info!("Migration: step '{}' complete", step);
    }

    storage.set_schema_version(CURRENT_SCHEMA_VERSION)?;
    log::info!(
        "Migration: done ({} claim writes, {} player writes, {} relocations)",
        report.claims_migrated,
        report.players_migrated,
        report.records_relocated
    );
    Ok(report)
}

fn apply_claim_step(
    step: &str,
    record: &mut RawRecord,
    storage: &dyn ClaimStorage,
    options: &MigrationOptions,
    names: &LegacyNames,
) {
    match step {
        RENAME_FIELDS => {
            if let Some(obj) = record.object_mut() {
                for (old, new) in CLAIM_RENAMES {
                    rename_key(obj, old, new);
                }
            }
        }
        ASSIGN_IDS => assign_stable_id(record, storage, names),
        EXTEND_FOOTPRINTS => {
            if let Some(obj) = record.object_mut() {
                extend_footprint(obj, options);
            }
        }
        _ => {}
    }
}

fn rename_key(obj: &mut Map<String, Value>, old: &str, new: &str) {
    if let Some(value) = obj.remove(old) {
        obj.entry(new.to_string()).or_insert(value);
    }
}

fn rename_player_fields(record: &mut RawRecord) {
    let Some(obj) = record.object_mut() else {
        return;
    };
    let accrued = obj.remove("accruedBlocks");
    let bonus = obj.remove("bonusBlocks");
    if accrued.is_none() && bonus.is_none() {
        return;
    }
    let blocks = obj
        .entry("blocks")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(scopes) = blocks {
        let account = scopes
            .entry(GLOBAL_SCOPE)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(account) = account {
            if let Some(v) = accrued {
                account.entry("accrued").or_insert(v);
            }
            if let Some(v) = bonus {
                account.entry("bonus").or_insert(v);
            }
        }
    }
}

fn parse_uuid(value: Option<&Value>) -> Option<Uuid> {
    value.and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
}

fn assign_stable_id(record: &mut RawRecord, storage: &dyn ClaimStorage, names: &LegacyNames) {
    let legacy_locator = record.locator.clone();
    let Some(obj) = record.value.as_object_mut() else {
        return;
    };
    let Some(world) = parse_uuid(obj.get("world")) else {
        log::warn!("Migration: {} has no world, cannot assign an id", legacy_locator);
        return;
    };

    let id = match parse_uuid(obj.get("id")) {
        Some(id) => id,
        None => {
            let id = legacy_claim_id(world, &legacy_locator);
            obj.insert("id".to_string(), Value::from(id.to_string()));
            id
        }
    };

    if let Some(parent_name) = obj.remove("parentName") {
        if let Some(name) = parent_name.as_str() {
            match names.resolve_parent(world, name, obj, id) {
                Some(parent) => {
                    obj.entry("parent")
                        .or_insert_with(|| Value::from(parent.to_string()));
                }
                None => log::warn!(
                    "Migration: {} names missing parent '{}'",
                    legacy_locator,
                    name
                ),
            }
        }
    }

    if let Some(locator) = claim_locator(obj, storage) {
        record.locator = locator;
    }
}

/// Id-keyed locator for a record that carries world, type and id.
fn claim_locator(obj: &Map<String, Value>, storage: &dyn ClaimStorage) -> Option<String> {
    let world = parse_uuid(obj.get("world"))?;
    let id = parse_uuid(obj.get("id"))?;
    let claim_type = obj
        .get("type")
        .and_then(|v| serde_json::from_value::<ClaimType>(v.clone()).ok())?;
    Some(storage.locate_claim(world, claim_type, id))
}

/// Give `record` a fresh deterministic id because a different claim already
/// holds the locator its derived id maps to.
fn rekey(
    record: &mut RawRecord,
    legacy_locator: &str,
    storage: &dyn ClaimStorage,
    claims: &[RawRecord],
) {
    let Some(obj) = record.value.as_object_mut() else {
        return;
    };
    let Some(world) = parse_uuid(obj.get("world")) else {
        return;
    };
    for attempt in 1u32.. {
        let id = Uuid::new_v5(
            &LEGACY_NAMESPACE,
            format!("{}/{}#{}", world, legacy_locator, attempt).as_bytes(),
        );
        obj.insert("id".to_string(), Value::from(id.to_string()));
        let Some(locator) = claim_locator(obj, storage) else {
            return;
        };
        if !claims.iter().any(|r| r.locator == locator) {
            log::warn!(
                "Migration: {} clashed with another claim, re-keyed as {}",
                legacy_locator,
                id
            );
            record.locator = locator;
            return;
        }
    }
}

fn extend_footprint(obj: &mut Map<String, Value>, options: &MigrationOptions) {
    let is_2d = |corner: Option<&Value>| corner.is_some_and(|c| c.get("y").is_none());
    if !is_2d(obj.get("lesser")) && !is_2d(obj.get("greater")) {
        return;
    }
    let depth = obj
        .remove("depth")
        .and_then(|d| d.as_i64())
        .map(|d| d as i32)
        .unwrap_or(options.surface_level);
    let min_y = depth - options.extend_below.max(0);
    let max_y = depth + options.extend_above.max(0);

    for (key, y) in [("lesser", min_y), ("greater", max_y)] {
        if let Some(Value::Object(corner)) = obj.get_mut(key) {
            corner.entry("y").or_insert(Value::from(y));
        }
    }
    obj.insert("cuboid".to_string(), Value::Bool(false));
}
