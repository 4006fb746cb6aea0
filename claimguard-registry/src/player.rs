//! Lazily loaded per-player claim-block accounting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use claimguard_metrics::RegistryMetrics;
use claimguard_model::{Claim, ClaimId, PlayerData, PlayerId, PlayerOptions, WorldId};
use claimguard_storage::ClaimStorage;

use crate::config::{ConfigurationProvider, WorldInfo};

/// Resident player records. Entries stay while the player is online or owns claims.
pub struct PlayerDataCache {
    storage: Arc<dyn ClaimStorage>,
    metrics: Arc<RegistryMetrics>,
    players: HashMap<PlayerId, PlayerData>,
    online: HashSet<PlayerId>,
    /// Players whose stored record could not be read. Never written back, so
    /// the stored record survives for repair.
    unreadable: HashSet<PlayerId>,
}

impl PlayerDataCache {
    pub fn new(storage: Arc<dyn ClaimStorage>, metrics: Arc<RegistryMetrics>) -> Self {
        Self {
            storage,
            metrics,
            players: HashMap::new(),
            online: HashSet::new(),
            unreadable: HashSet::new(),
        }
    }

    /// Cached record, else the stored one, else a fresh default.
    pub fn get_or_create(&mut self, id: PlayerId) -> &mut PlayerData {
        let storage = &self.storage;
        let unreadable = &mut self.unreadable;
        let metrics = &self.metrics;
        self.players.entry(id).or_insert_with(|| match storage.load_player(id) {
            Ok(Some(data)) => data,
            Ok(None) => PlayerData::new(id),
            Err(e) => {
                log::error!("Players: Failed to load {}, keeping it read-only: {:#}", id, e);
                metrics.record_skipped();
                unreadable.insert(id);
                PlayerData::new(id)
            }
        })
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerData> {
        self.players.get(&id)
    }

    pub fn is_cached(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// Whether the stored record of `id` failed to load and is being left untouched.
    pub fn is_unreadable(&self, id: PlayerId) -> bool {
        self.unreadable.contains(&id)
    }

    pub fn is_online(&self, id: PlayerId) -> bool {
        self.online.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn set_online(&mut self, id: PlayerId) {
        self.online.insert(id);
        self.get_or_create(id);
    }

    /// Blocking flush, then eviction if the player owns nothing.
    pub fn disconnect(&mut self, id: PlayerId) {
        self.online.remove(&id);
        if self.players.contains_key(&id) {
            self.save(id);
        }
        self.evict_if_idle(id);
    }

    fn evict_if_idle(&mut self, id: PlayerId) -> bool {
        let idle = !self.online.contains(&id)
            && self.players.get(&id).is_some_and(|p| !p.owns_claims());
        if idle {
            self.players.remove(&id);
            self.unreadable.remove(&id);
            log::debug!("Players: Evicted {}", id);
        }
        idle
    }

    /// Evict every offline player that owns no claims. Returns how many went.
    pub fn evict_idle(&mut self) -> usize {
        let ids: Vec<_> = self.players.keys().copied().collect();
        ids.into_iter().filter(|id| self.evict_if_idle(*id)).count()
    }

    /// Write one player through to storage. Failures are logged, not returned.
    pub fn save(&self, id: PlayerId) -> bool {
        let Some(data) = self.players.get(&id) else {
            return false;
        };
        if self.unreadable.contains(&id) {
            log::warn!("Players: Not saving {}, its stored record could not be read", id);
            return false;
        }
        let start = Instant::now();
        let result = self.storage.save_player(data);
        self.metrics.record_save(start.elapsed(), result.is_ok());
        match result {
            Ok(()) => true,
            Err(e) => {
                log::error!("Players: Failed to save {}: {:#}", id, e);
                false
            }
        }
    }

    pub fn save_all(&self) -> usize {
        let mut ids: Vec<_> = self.players.keys().copied().collect();
        ids.sort();
        ids.into_iter().filter(|id| self.save(*id)).count()
    }

    pub fn track_claim(&mut self, claim: &Claim) {
        if let Some(owner) = claim.owner {
            self.get_or_create(owner).track(claim);
        }
    }

    pub fn untrack_claim(&mut self, owner: PlayerId, claim: ClaimId) {
        if let Some(data) = self.players.get_mut(&owner) {
            data.untrack(claim);
        }
    }

    pub fn apply_options(&mut self, id: PlayerId, options: PlayerOptions) {
        if let Some(data) = self.players.get_mut(&id) {
            data.options = options;
        }
    }

    /// `initial + accrued + bonus - used` in the accounting scope of `world`.
    pub fn remaining_blocks(
        &mut self,
        id: PlayerId,
        config: &dyn ConfigurationProvider,
        world: &WorldInfo,
    ) -> i64 {
        let scope = config.block_scope(world.id);
        let filter = config.scope_filter(world.id);
        let default_initial = config.initial_blocks(world);
        let data = self.get_or_create(id);
        let initial = data.options.initial_blocks.unwrap_or(default_initial);
        data.remaining_blocks(&scope, initial, filter)
    }

    /// Add `delta` accrued blocks, clamped to `[0, max_accrued_blocks]`.
    pub fn adjust_accrued(
        &mut self,
        id: PlayerId,
        delta: i64,
        config: &dyn ConfigurationProvider,
        world: &WorldInfo,
    ) -> i64 {
        let scope = config.block_scope(world.id);
        let default_max = config.max_accrued_blocks(world);
        let data = self.get_or_create(id);
        let max = data.options.max_accrued_blocks.unwrap_or(default_max);
        let account = data.account_mut(&scope);
        account.accrued = account.accrued.saturating_add(delta).clamp(0, max.max(0));
        let accrued = account.accrued;
        self.save(id);
        accrued
    }

    /// Add `delta` bonus blocks. Bonus may go negative.
    pub fn adjust_bonus(
        &mut self,
        id: PlayerId,
        delta: i64,
        config: &dyn ConfigurationProvider,
        world: &WorldInfo,
    ) -> i64 {
        let scope = config.block_scope(world.id);
        let account = self.get_or_create(id).account_mut(&scope);
        account.bonus = account.bonus.saturating_add(delta);
        let bonus = account.bonus;
        self.save(id);
        bonus
    }

    /// Returns whether the ignore list changed.
    pub fn set_ignored(&mut self, id: PlayerId, target: PlayerId, ignored: bool) -> bool {
        let data = self.get_or_create(id);
        let changed = if ignored {
            data.ignored.insert(target)
        } else {
            data.ignored.remove(&target)
        };
        if changed {
            self.save(id);
        }
        changed
    }

    /// Drop ledger entries for claims of `world`, used when the world unloads.
    pub fn forget_world(&mut self, world: WorldId) {
        for data in self.players.values_mut() {
            data.claims.retain(|_, owned| owned.world != world);
        }
    }
}
