//! Claim limits and accounting settings, loaded from TOML.
//!
//! ```toml
//! initial_blocks = 100
//! per_world_blocks = false
//!
//! [limits.basic]
//! min_x = 5
//! min_z = 5
//! max_x = 500
//!
//! [default_flags.basic]
//! pvp = false
//!
//! [worlds.nether]
//! initial_blocks = 0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use claimguard_model::{
    ClaimFlags, ClaimType, Tristate, WorldId, GLOBAL_SCOPE,
};
use claimguard_storage::MigrationOptions;
use serde::Deserialize;

use crate::error::{ClaimError, Result};

pub const DEFAULT_CONFIG_ENV: &str = "CLAIMGUARD_CONFIG";

/// Identity and vertical extent of a world the host has loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldInfo {
    pub id: WorldId,
    pub name: String,
    pub min_y: i32,
    pub max_y: i32,
}

impl WorldInfo {
    pub fn new(id: WorldId, name: impl Into<String>, min_y: i32, max_y: i32) -> Self {
        Self {
            id,
            name: name.into(),
            min_y,
            max_y,
        }
    }
}

/// Size limits for one claim type. Sizes are corner-to-corner distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TypeLimits {
    pub min_x: i64,
    pub min_y: i64,
    pub min_z: i64,
    pub max_x: Option<i64>,
    pub max_y: Option<i64>,
    pub max_z: Option<i64>,
}

/// Per-world overrides; anything unset falls back to the top level.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    pub initial_blocks: Option<i64>,
    pub max_accrued_blocks: Option<i64>,
    pub abandon_return_ratio: Option<f64>,
    pub floor: Option<i32>,
    pub ceiling: Option<i32>,
    pub limits: BTreeMap<String, TypeLimits>,
}

/// Everything the registry asks of its configuration.
pub trait ConfigurationProvider: Send + Sync {
    fn limits(&self, world: &WorldInfo, claim_type: ClaimType) -> TypeLimits;
    fn initial_blocks(&self, world: &WorldInfo) -> i64;
    fn max_accrued_blocks(&self, world: &WorldInfo) -> i64;
    /// Share of an abandoned claim's area returned to the owner, in `[0, 1]`.
    fn abandon_return_ratio(&self, world: &WorldInfo) -> f64;
    /// Lowest and highest y a cuboid claim may reach.
    fn vertical_bounds(&self, world: &WorldInfo) -> (i32, i32);
    /// Whether claim blocks are tracked per world instead of globally.
    fn per_world_blocks(&self) -> bool;
    fn default_flags(&self, claim_type: ClaimType) -> ClaimFlags;
    fn migration_options(&self) -> MigrationOptions;

    /// Accounting scope key for a world.
    fn block_scope(&self, world: WorldId) -> String {
        if self.per_world_blocks() {
            world.to_string()
        } else {
            GLOBAL_SCOPE.to_string()
        }
    }

    /// Worlds whose claims count against the scope of `world`.
    fn scope_filter(&self, world: WorldId) -> Option<WorldId> {
        self.per_world_blocks().then_some(world)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    pub initial_blocks: i64,
    pub max_accrued_blocks: i64,
    pub per_world_blocks: bool,
    pub abandon_return_ratio: f64,
    /// Assumed surface when legacy 2D claims are given a height.
    pub surface_level: i32,
    pub extend_below: i32,
    pub extend_above: i32,
    pub worker_threads: usize,
    pub max_background_tasks: usize,
    /// Keyed by claim type name (`basic`, `town`, ...).
    pub limits: BTreeMap<String, TypeLimits>,
    pub default_flags: BTreeMap<String, BTreeMap<String, bool>>,
    /// Keyed by world name or world id.
    pub worlds: BTreeMap<String, WorldSettings>,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(
            ClaimType::Basic.as_str().to_string(),
            TypeLimits {
                min_x: 4,
                min_z: 4,
                ..Default::default()
            },
        );
        limits.insert(
            ClaimType::Town.as_str().to_string(),
            TypeLimits {
                min_x: 32,
                min_z: 32,
                ..Default::default()
            },
        );
        Self {
            initial_blocks: 100,
            max_accrued_blocks: 80_000,
            per_world_blocks: false,
            abandon_return_ratio: 1.0,
            surface_level: 63,
            extend_below: 127,
            extend_above: 256,
            worker_threads: 2,
            max_background_tasks: 4,
            limits,
            default_flags: BTreeMap::new(),
            worlds: BTreeMap::new(),
        }
    }
}

impl ClaimConfig {
    /// Config from an explicit path, else from `CLAIMGUARD_CONFIG`, else defaults.
    pub fn from_sources(cli_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(DEFAULT_CONFIG_ENV).ok();
        let config = if let Some(path) = cli_path {
            Self::load_from_path(path)?
        } else if let Some(path) = env_path.as_deref().filter(|p| !p.is_empty()) {
            Self::load_from_path(path)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: ClaimConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_blocks < 0 {
            return Err(ClaimError::Config("initial_blocks must not be negative".into()));
        }
        if self.max_accrued_blocks < 0 {
            return Err(ClaimError::Config(
                "max_accrued_blocks must not be negative".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(ClaimError::Config(
                "worker_threads must be greater than zero".into(),
            ));
        }
        if self.max_background_tasks == 0 {
            return Err(ClaimError::Config(
                "max_background_tasks must be greater than zero".into(),
            ));
        }
        check_ratio("abandon_return_ratio", self.abandon_return_ratio)?;
        check_limits("limits", &self.limits)?;
        for name in self.default_flags.keys() {
            if ClaimType::parse(name).is_none() {
                return Err(ClaimError::Config(format!(
                    "default_flags.{}: unknown claim type",
                    name
                )));
            }
        }
        for (world, settings) in &self.worlds {
            if let Some(ratio) = settings.abandon_return_ratio {
                check_ratio(&format!("worlds.{}.abandon_return_ratio", world), ratio)?;
            }
            if let (Some(floor), Some(ceiling)) = (settings.floor, settings.ceiling) {
                if floor > ceiling {
                    return Err(ClaimError::Config(format!(
                        "worlds.{}: floor {} is above ceiling {}",
                        world, floor, ceiling
                    )));
                }
            }
            check_limits(&format!("worlds.{}.limits", world), &settings.limits)?;
        }
        Ok(())
    }

    fn world(&self, world: &WorldInfo) -> Option<&WorldSettings> {
        self.worlds
            .get(&world.name)
            .or_else(|| self.worlds.get(&world.id.to_string()))
    }
}

fn check_ratio(key: &str, ratio: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(ClaimError::Config(format!("{} must be within 0..=1", key)));
    }
    Ok(())
}

fn check_limits(key: &str, limits: &BTreeMap<String, TypeLimits>) -> Result<()> {
    for (name, limit) in limits {
        if ClaimType::parse(name).is_none() {
            return Err(ClaimError::Config(format!("{}.{}: unknown claim type", key, name)));
        }
        let axes = [
            ("x", limit.min_x, limit.max_x),
            ("y", limit.min_y, limit.max_y),
            ("z", limit.min_z, limit.max_z),
        ];
        for (axis, min, max) in axes {
            if max.is_some_and(|max| max < min) {
                return Err(ClaimError::Config(format!(
                    "{}.{}: max_{} is below min_{}",
                    key, name, axis, axis
                )));
            }
        }
    }
    Ok(())
}

impl ConfigurationProvider for ClaimConfig {
    fn limits(&self, world: &WorldInfo, claim_type: ClaimType) -> TypeLimits {
        let key = claim_type.as_str();
        self.world(world)
            .and_then(|w| w.limits.get(key))
            .or_else(|| self.limits.get(key))
            .copied()
            .unwrap_or_default()
    }

    fn initial_blocks(&self, world: &WorldInfo) -> i64 {
        self.world(world)
            .and_then(|w| w.initial_blocks)
            .unwrap_or(self.initial_blocks)
    }

    fn max_accrued_blocks(&self, world: &WorldInfo) -> i64 {
        self.world(world)
            .and_then(|w| w.max_accrued_blocks)
            .unwrap_or(self.max_accrued_blocks)
    }

    fn abandon_return_ratio(&self, world: &WorldInfo) -> f64 {
        self.world(world)
            .and_then(|w| w.abandon_return_ratio)
            .unwrap_or(self.abandon_return_ratio)
    }

    fn vertical_bounds(&self, world: &WorldInfo) -> (i32, i32) {
        let settings = self.world(world);
        let floor = settings.and_then(|w| w.floor).unwrap_or(world.min_y);
        let ceiling = settings.and_then(|w| w.ceiling).unwrap_or(world.max_y);
        (floor.max(world.min_y), ceiling.min(world.max_y))
    }

    fn per_world_blocks(&self) -> bool {
        self.per_world_blocks
    }

    fn default_flags(&self, claim_type: ClaimType) -> ClaimFlags {
        self.default_flags
            .get(claim_type.as_str())
            .map(|flags| {
                flags
                    .iter()
                    .map(|(flag, value)| (flag.clone(), Tristate::from_bool(*value)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            surface_level: self.surface_level,
            extend_below: self.extend_below,
            extend_above: self.extend_above,
        }
    }
}
