//! Flat-file storage backend: one JSON file per record.
//!
//! Layout under the root directory:
//! - `worlds/<world-id>/<claim-type>/<claim-id>.json`
//! - `players/<player-id>.json`
//! - `schema_version` - a single integer

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use claimguard_model::{ClaimId, ClaimType, PlayerId, WorldId};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::{ClaimStorage, RawRecord};

const WORLDS_DIR: &str = "worlds";
const PLAYERS_DIR: &str = "players";
const SCHEMA_FILE: &str = "schema_version";

pub struct FlatFileStorage {
    root: PathBuf,
}

impl FlatFileStorage {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(WORLDS_DIR))
            .with_context(|| format!("Failed to create {}", root.display()))?;
        fs::create_dir_all(root.join(PLAYERS_DIR))
            .with_context(|| format!("Failed to create {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            bail!("Locator escapes the storage root: {}", locator);
        }
        Ok(self.root.join(relative))
    }

    fn locator_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Parse one file; unreadable or non-JSON files are logged and skipped.
    fn read_record(&self, path: &Path) -> Option<RawRecord> {
        let locator = self.locator_of(path)?;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("FlatFile: Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(RawRecord::new(locator, value)),
            Err(e) => {
                log::warn!("FlatFile: Skipping unparseable record {}: {}", locator, e);
                None
            }
        }
    }

    fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Write through a temp file in the target directory, then rename over the target.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .with_context(|| format!("No parent directory for {}", path.display()))?;
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to persist {}", path.display()))?;
        Ok(())
    }
}

impl ClaimStorage for FlatFileStorage {
    fn locate_claim(&self, world: WorldId, claim_type: ClaimType, id: ClaimId) -> String {
        format!("{}/{}/{}/{}.json", WORLDS_DIR, world, claim_type.as_str(), id)
    }

    fn list_claims(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for world_dir in Self::subdirs(&self.root.join(WORLDS_DIR))? {
            for type_dir in Self::subdirs(&world_dir)? {
                for file in Self::json_files(&type_dir)? {
                    records.extend(self.read_record(&file));
                }
            }
        }
        Ok(records)
    }

    fn locate_player(&self, id: PlayerId) -> String {
        format!("{}/{}.json", PLAYERS_DIR, id)
    }

    fn list_players(&self) -> Result<Vec<RawRecord>> {
        let files = Self::json_files(&self.root.join(PLAYERS_DIR))?;
        Ok(files.iter().filter_map(|f| self.read_record(f)).collect())
    }

    fn read_raw(&self, locator: &str) -> Result<Option<Value>> {
        let path = self.path(locator)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("Malformed JSON in {}", locator))?,
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", locator)),
        }
    }

    fn write_raw(&self, record: &RawRecord) -> Result<()> {
        let path = self.path(&record.locator)?;
        let bytes = serde_json::to_vec_pretty(&record.value)?;
        Self::write_atomic(&path, &bytes)
    }

    fn remove_raw(&self, locator: &str) -> Result<()> {
        let path = self.path(locator)?;
        match fs::remove_file(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", locator)),
        }
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        let path = self.root.join(SCHEMA_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let version = text
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid schema marker {:?}", text.trim()))?;
                Ok(Some(version))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read schema marker"),
        }
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        Self::write_atomic(&self.root.join(SCHEMA_FILE), version.to_string().as_bytes())
    }
}
