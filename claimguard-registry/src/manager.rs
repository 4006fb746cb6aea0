//! The registry object the host holds: one [`ClaimRegistry`] per loaded world,
//! the shared player cache, the background pool and the host hooks.
//!
//! All methods take `&mut self` and are meant to be called from a single
//! mutation thread. Background results are applied by [`ClaimManager::process_messages`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use claimguard_metrics::RegistryMetrics;
use claimguard_model::{
    BoundingBox, Claim, ClaimBuilder, ClaimId, ClaimType, PlayerId, Tristate, Vector3i, WorldId,
};
use claimguard_storage::{migration, ClaimStorage, MigrationReport, RawRecord};
use serde_json::Value;

use crate::config::{ConfigurationProvider, WorldInfo};
use crate::error::{ClaimError, Result};
use crate::hooks::{AllowAll, AuthorizationHook, LogPublisher, NoOptions, OptionResolver, PermissionDefaultsPublisher};
use crate::player::PlayerDataCache;
use crate::registry::{ClaimRegistry, RegistryContext};
use crate::worker::{BackgroundPool, RegistryMessage};

/// Host-provided collaborators.
#[derive(Clone)]
pub struct Hooks {
    pub authorization: Arc<dyn AuthorizationHook>,
    pub defaults: Arc<dyn PermissionDefaultsPublisher>,
    pub options: Arc<dyn OptionResolver>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            authorization: Arc::new(AllowAll),
            defaults: Arc::new(LogPublisher),
            options: Arc::new(NoOptions),
        }
    }
}

pub struct ClaimManager {
    storage: Arc<dyn ClaimStorage>,
    config: Arc<dyn ConfigurationProvider>,
    hooks: Hooks,
    metrics: Arc<RegistryMetrics>,
    registries: HashMap<WorldId, ClaimRegistry>,
    players: PlayerDataCache,
    pool: BackgroundPool,
    migration: MigrationReport,
}

fn record_world(record: &RawRecord) -> Option<WorldId> {
    record
        .value
        .get("world")
        .and_then(Value::as_str)
        .and_then(|s| WorldId::parse_str(s).ok())
}

impl ClaimManager {
    /// Migrate the store, then load every world in `worlds`.
    ///
    /// `worlds` is the full set of worlds the host knows: stored claims of any
    /// other world are deleted.
    pub fn open(
        storage: Arc<dyn ClaimStorage>,
        config: Arc<dyn ConfigurationProvider>,
        worlds: Vec<WorldInfo>,
        hooks: Hooks,
        pool: BackgroundPool,
    ) -> Result<Self> {
        let metrics = Arc::new(RegistryMetrics::new());
        let report = migration::migrate(storage.as_ref(), &config.migration_options())?;
        metrics.record_migrated(report.claims_migrated + report.players_migrated);

        // Records of worlds outside `worlds` stay in the store for a later `load_world`.
        let mut by_world: BTreeMap<WorldId, Vec<RawRecord>> = BTreeMap::new();
        for record in storage.list_claims()? {
            match record_world(&record) {
                Some(world) if worlds.iter().any(|w| w.id == world) => {
                    by_world.entry(world).or_default().push(record)
                }
                Some(_) => {}
                None => {
                    log::warn!("Manager: Skipping {} (no world)", record.locator);
                    metrics.record_skipped();
                }
            }
        }

        let mut players = PlayerDataCache::new(storage.clone(), metrics.clone());
        let mut registries = HashMap::new();
        for world in worlds {
            let records = by_world.remove(&world.id).unwrap_or_default();
            let registry = ClaimRegistry::load(world, records, storage.clone(), metrics.clone(), &mut players);
            registries.insert(registry.world().id, registry);
        }

        let manager = Self {
            storage,
            config,
            hooks,
            metrics,
            registries,
            players,
            pool,
            migration: report,
        };
        manager.publish_defaults();
        Ok(manager)
    }

    fn publish_defaults(&self) {
        for claim_type in ClaimType::ALL {
            let defaults = self.config.default_flags(claim_type);
            self.hooks.defaults.publish(claim_type, &defaults);
        }
    }

    /// Swap in a new configuration and republish default flags.
    pub fn reload_config(&mut self, config: Arc<dyn ConfigurationProvider>) {
        self.config = config;
        self.publish_defaults();
        log::info!("Manager: Configuration reloaded");
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    pub fn players(&self) -> &PlayerDataCache {
        &self.players
    }

    pub fn registry(&self, world: WorldId) -> Option<&ClaimRegistry> {
        self.registries.get(&world)
    }

    pub fn worlds(&self) -> Vec<&WorldInfo> {
        let mut worlds: Vec<_> = self.registries.values().map(|r| r.world()).collect();
        worlds.sort_by(|a, b| a.name.cmp(&b.name));
        worlds
    }

    /// Load a world the host brought up after `open`.
    pub fn load_world(&mut self, world: WorldInfo) -> Result<()> {
        if self.registries.contains_key(&world.id) {
            return Ok(());
        }
        let records = self
            .storage
            .list_claims()?
            .into_iter()
            .filter(|r| record_world(r) == Some(world.id))
            .collect();
        let registry = ClaimRegistry::load(
            world,
            records,
            self.storage.clone(),
            self.metrics.clone(),
            &mut self.players,
        );
        self.registries.insert(registry.world().id, registry);
        Ok(())
    }

    /// Delete stored claims whose world is neither loaded nor listed in `known`.
    ///
    /// `known` must name every world the host has, loaded or not. Returns the
    /// number of records deleted.
    pub fn purge_unknown_worlds(&mut self, known: &[WorldId]) -> Result<usize> {
        let mut deleted = 0;
        for record in self.storage.list_claims()? {
            let Some(world) = record_world(&record) else {
                continue;
            };
            if self.registries.contains_key(&world) || known.contains(&world) {
                continue;
            }
            log::warn!("Manager: Deleting {} (unknown world {})", record.locator, world);
            match self.storage.remove_raw(&record.locator) {
                Ok(()) => {
                    self.metrics.record_deleted_record();
                    deleted += 1;
                }
                Err(e) => log::error!("Manager: Failed to delete {}: {:#}", record.locator, e),
            }
        }
        Ok(deleted)
    }

    /// Tear down a world's registry and flush resident players.
    pub fn unload_world(&mut self, world: WorldId) -> bool {
        let Some(registry) = self.registries.remove(&world) else {
            return false;
        };
        self.players.forget_world(world);
        let saved = self.players.save_all();
        let evicted = self.players.evict_idle();
        log::info!(
            "Manager: Unloaded '{}' ({} players saved, {} evicted)",
            registry.world().name,
            saved,
            evicted
        );
        true
    }

    pub fn player_joined(&mut self, player: PlayerId) {
        self.players.set_online(player);
        self.pool.refresh_options(player, self.hooks.options.clone());
    }

    /// Blocking flush of the player's record, then eviction if they own nothing.
    pub fn player_left(&mut self, player: PlayerId) {
        self.players.disconnect(player);
    }

    /// Re-resolve a player's options in the background.
    pub fn refresh_options(&self, player: PlayerId) {
        self.pool.refresh_options(player, self.hooks.options.clone());
    }

    /// Apply background results. Returns how many messages were handled.
    pub fn process_messages(&mut self) -> usize {
        let messages = self.pool.drain();
        let count = messages.len();
        for message in messages {
            self.apply(message);
        }
        count
    }

    /// Wait up to `timeout` for one background result and apply it.
    pub fn wait_for_message(&mut self, timeout: std::time::Duration) -> bool {
        match self.pool.wait_for_message(timeout) {
            Some(message) => {
                self.apply(message);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::OptionsUpdated { player, options } => {
                log::debug!("Manager: Options updated for {}", player);
                self.players.apply_options(player, options);
            }
        }
    }

    fn split(&mut self, world: WorldId) -> Result<(&mut ClaimRegistry, RegistryContext<'_>)> {
        let registry = self
            .registries
            .get_mut(&world)
            .ok_or(ClaimError::UnknownWorld(world))?;
        let ctx = RegistryContext {
            players: &mut self.players,
            config: self.config.as_ref(),
            auth: self.hooks.authorization.as_ref(),
        };
        Ok((registry, ctx))
    }

    fn world_info(&self, world: WorldId) -> Result<WorldInfo> {
        self.registries
            .get(&world)
            .map(|r| r.world().clone())
            .ok_or(ClaimError::UnknownWorld(world))
    }

    pub fn create_claim(&mut self, builder: ClaimBuilder, actor: Option<PlayerId>) -> Result<ClaimId> {
        let (registry, mut ctx) = self.split(builder.world())?;
        registry.create(builder, actor, &mut ctx)
    }

    pub fn resize_claim(
        &mut self,
        world: WorldId,
        id: ClaimId,
        bounds: BoundingBox,
        actor: Option<PlayerId>,
    ) -> Result<()> {
        let (registry, mut ctx) = self.split(world)?;
        registry.resize(id, bounds, actor, &mut ctx)
    }

    pub fn extend_claim_depth(&mut self, world: WorldId, id: ClaimId, new_min_y: i32) -> Result<()> {
        let (registry, mut ctx) = self.split(world)?;
        registry.extend_depth(id, new_min_y, &mut ctx)
    }

    pub fn rename_claim(&mut self, world: WorldId, id: ClaimId, name: Option<String>) -> Result<()> {
        let (registry, _) = self.split(world)?;
        registry.rename(id, name)
    }

    pub fn set_greeting(&mut self, world: WorldId, id: ClaimId, greeting: Option<String>) -> Result<()> {
        let (registry, _) = self.split(world)?;
        registry.set_greeting(id, greeting)
    }

    pub fn set_farewell(&mut self, world: WorldId, id: ClaimId, farewell: Option<String>) -> Result<()> {
        let (registry, _) = self.split(world)?;
        registry.set_farewell(id, farewell)
    }

    pub fn set_claim_flag(
        &mut self,
        world: WorldId,
        id: ClaimId,
        flag: &str,
        context: &str,
        value: Tristate,
    ) -> Result<()> {
        let (registry, _) = self.split(world)?;
        registry.set_flag(id, flag, context, value)
    }

    pub fn transfer_claim(&mut self, world: WorldId, id: ClaimId, new_owner: PlayerId) -> Result<()> {
        let (registry, mut ctx) = self.split(world)?;
        registry.transfer(id, new_owner, &mut ctx)
    }

    pub fn delete_claim(&mut self, world: WorldId, id: ClaimId, cascade: bool) -> Result<Vec<ClaimId>> {
        let (registry, mut ctx) = self.split(world)?;
        registry.delete(id, cascade, &mut ctx)
    }

    pub fn abandon_claim(&mut self, world: WorldId, id: ClaimId, player: PlayerId) -> Result<Vec<ClaimId>> {
        let (registry, mut ctx) = self.split(world)?;
        registry.abandon(id, player, &mut ctx)
    }

    /// Delete every top-level claim `owner` holds in `world`.
    pub fn delete_claims_of(&mut self, world: WorldId, owner: PlayerId) -> Result<Vec<ClaimId>> {
        let (registry, mut ctx) = self.split(world)?;
        Ok(registry.delete_owned_by(owner, &mut ctx))
    }

    pub fn claim_at(&self, world: WorldId, pos: Vector3i, ignore_height: bool) -> Option<&Claim> {
        self.registries.get(&world)?.claim_at(pos, ignore_height)
    }

    pub fn claim_at_for(&mut self, world: WorldId, player: PlayerId, pos: Vector3i) -> Option<&Claim> {
        self.registries.get_mut(&world)?.claim_at_for(player, pos)
    }

    pub fn claims_near(&self, world: WorldId, pos: Vector3i, radius: u32) -> Vec<&Claim> {
        self.registries
            .get(&world)
            .map(|r| r.claims_near(pos, radius))
            .unwrap_or_default()
    }

    pub fn remaining_blocks(&mut self, player: PlayerId, world: WorldId) -> Result<i64> {
        let info = self.world_info(world)?;
        Ok(self.players.remaining_blocks(player, self.config.as_ref(), &info))
    }

    pub fn adjust_accrued(&mut self, player: PlayerId, world: WorldId, delta: i64) -> Result<i64> {
        let info = self.world_info(world)?;
        Ok(self.players.adjust_accrued(player, delta, self.config.as_ref(), &info))
    }

    pub fn adjust_bonus(&mut self, player: PlayerId, world: WorldId, delta: i64) -> Result<i64> {
        let info = self.world_info(world)?;
        Ok(self.players.adjust_bonus(player, delta, self.config.as_ref(), &info))
    }

    pub fn ignore_player(&mut self, player: PlayerId, target: PlayerId) -> bool {
        self.players.set_ignored(player, target, true)
    }

    pub fn unignore_player(&mut self, player: PlayerId, target: PlayerId) -> bool {
        self.players.set_ignored(player, target, false)
    }

    /// Save every resident player and drop every registry.
    pub fn shutdown(mut self) {
        let saved = self.players.save_all();
        let worlds = self.registries.len();
        self.registries.clear();
        log::info!("Manager: Shut down ({} worlds, {} players saved)", worlds, saved);
    }
}
