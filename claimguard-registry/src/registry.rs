//! Per-world claim registry: the only place claims are mutated.
//!
//! Every mutation is validated first, then applied to the arena, the spatial
//! index and the player ledgers, then written through to storage. A failed
//! save is logged and counted; the in-memory state stays authoritative and
//! the next mutation of the claim writes it again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use claimguard_metrics::RegistryMetrics;
use claimguard_model::{
    BoundingBox, Claim, ClaimBuilder, ClaimId, ClaimType, PlayerId, Tristate, Vector3i,
};
use claimguard_storage::{record, ClaimStorage, RawRecord};

use crate::arena::ClaimArena;
use crate::config::{ConfigurationProvider, WorldInfo};
use crate::error::{ClaimError, Rejection, RejectionKind, Result};
use crate::hierarchy;
use crate::hooks::{Authorization, AuthorizationHook};
use crate::index::{innermost, ClaimHints, SpatialIndex};
use crate::player::PlayerDataCache;
use crate::validator::{Accepted, OverlapValidator, Proposal};

/// Horizontal extent of the wilderness claim.
pub const WORLD_BORDER: i32 = 30_000_000;

/// Collaborators a mutation needs besides the registry itself.
pub struct RegistryContext<'a> {
    pub players: &'a mut PlayerDataCache,
    pub config: &'a dyn ConfigurationProvider,
    pub auth: &'a dyn AuthorizationHook,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub claims: usize,
    pub top_level: usize,
    pub children: usize,
    pub indexed_chunks: usize,
    pub hints: usize,
}

pub struct ClaimRegistry {
    world: WorldInfo,
    arena: ClaimArena,
    index: SpatialIndex,
    hints: ClaimHints,
    wilderness: Option<ClaimId>,
    storage: Arc<dyn ClaimStorage>,
    metrics: Arc<RegistryMetrics>,
}

impl ClaimRegistry {
    pub fn new(world: WorldInfo, storage: Arc<dyn ClaimStorage>, metrics: Arc<RegistryMetrics>) -> Self {
        Self {
            world,
            arena: ClaimArena::new(),
            index: SpatialIndex::new(),
            hints: ClaimHints::default(),
            wilderness: None,
            storage,
            metrics,
        }
    }

    /// Build a registry from this world's stored records.
    ///
    /// Top-level claims load first; claims with a parent attach in a second pass.
    /// Undecodable records are skipped. Orphans, duplicate wilderness claims and
    /// claims that fail to attach are deleted from storage.
    pub fn load(
        world: WorldInfo,
        records: Vec<RawRecord>,
        storage: Arc<dyn ClaimStorage>,
        metrics: Arc<RegistryMetrics>,
        players: &mut PlayerDataCache,
    ) -> Self {
        let mut registry = Self::new(world, storage, metrics);
        let mut decoded = Vec::with_capacity(records.len());
        for raw in &records {
            match record::decode_claim(raw) {
                Ok(claim) if claim.world == registry.world.id => decoded.push(claim),
                Ok(claim) => log::warn!(
                    "Registry: {} belongs to world {}, not {}; skipped",
                    raw.locator,
                    claim.world,
                    registry.world.name
                ),
                Err(e) => {
                    log::warn!("Registry: Skipping {}: {:#}", raw.locator, e);
                    registry.metrics.record_skipped();
                }
            }
        }
        decoded.sort_by_key(|c| c.id);

        let mut pending = Vec::new();
        for mut claim in decoded {
            claim.children.clear();
            if registry.arena.contains(claim.id) {
                registry.discard(&claim, "duplicate record for the same id");
                continue;
            }
            if claim.is_wilderness() {
                if registry.wilderness.is_some() {
                    registry.discard(&claim, "duplicate wilderness claim");
                    continue;
                }
                claim.parent = None;
                registry.wilderness = Some(claim.id);
                registry.arena.insert(claim);
                continue;
            }
            match claim.parent {
                Some(parent) => pending.push((parent, claim)),
                None if claim.claim_type.requires_parent() => {
                    registry.discard(&claim, "subdivision without a parent")
                }
                None => {
                    registry.index.add(&claim);
                    registry.arena.insert(claim);
                }
            }
        }

        // Parents may themselves be pending (a town's basic claim holding subdivisions),
        // so keep passing until nothing else resolves.
        loop {
            let before = pending.len();
            let mut waiting = Vec::new();
            for (parent, claim) in pending {
                if !registry.arena.contains(parent) {
                    waiting.push((parent, claim));
                    continue;
                }
                let id = claim.id;
                registry.arena.insert(claim);
                if let Err(e) = hierarchy::attach(&mut registry.arena, parent, id) {
                    if let Some(claim) = registry.arena.remove(id) {
                        registry.discard(&claim, &e.to_string());
                    }
                }
            }
            pending = waiting;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for (parent, claim) in pending {
            registry.discard(&claim, &format!("parent {} not found", parent));
        }

        for claim in registry.arena.iter() {
            players.track_claim(claim);
            registry.metrics.record_loaded();
        }
        if registry.wilderness.is_none() {
            registry.create_wilderness();
        }

        log::info!(
            "Registry: Loaded {} claims for world '{}'",
            registry.arena.len(),
            registry.world.name
        );
        registry
    }

    fn create_wilderness(&mut self) {
        let bounds = BoundingBox::new(
            (-WORLD_BORDER, self.world.min_y, -WORLD_BORDER),
            (WORLD_BORDER, self.world.max_y, WORLD_BORDER),
        );
        let built = ClaimBuilder::new(ClaimType::Wilderness, self.world.id, bounds)
            .cuboid(false)
            .name("wilderness")
            .build();
        match built {
            Ok(claim) => {
                let id = claim.id;
                self.arena.insert(claim);
                self.wilderness = Some(id);
                self.persist(id);
                log::info!("Registry: Created wilderness for world '{}'", self.world.name);
            }
            Err(e) => log::error!("Registry: Cannot create wilderness: {}", e),
        }
    }

    /// Delete a stored record that cannot be loaded.
    fn discard(&self, claim: &Claim, reason: &str) {
        log::warn!("Registry: Deleting {} ({})", claim.label(), reason);
        if let Err(e) = self.storage.delete_claim(claim) {
            log::error!("Registry: Failed to delete {}: {:#}", claim.label(), e);
        }
        self.metrics.record_deleted_record();
    }

    /// Write one claim through to storage.
    fn persist(&mut self, id: ClaimId) {
        let Some(claim) = self.arena.get_mut(id) else {
            return;
        };
        let start = Instant::now();
        let result = self.storage.save_claim(claim);
        self.metrics.record_save(start.elapsed(), result.is_ok());
        match result {
            Ok(locator) => claim.locator = Some(locator),
            Err(e) => log::error!("Registry: Failed to save {}: {:#}", claim.label(), e),
        }
    }

    pub fn world(&self) -> &WorldInfo {
        &self.world
    }

    pub fn get(&self, id: ClaimId) -> Option<&Claim> {
        self.arena.get(id)
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.arena.iter()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn wilderness(&self) -> Option<&Claim> {
        self.wilderness.and_then(|id| self.arena.get(id))
    }

    /// Top-level claims (wilderness excluded), ordered by id.
    pub fn top_level(&self) -> Vec<&Claim> {
        self.sorted(|c| c.is_top_level() && !c.is_wilderness())
    }

    pub fn claims_owned_by(&self, owner: PlayerId) -> Vec<&Claim> {
        self.sorted(|c| c.owner == Some(owner))
    }

    fn sorted(&self, keep: impl Fn(&Claim) -> bool) -> Vec<&Claim> {
        let mut claims: Vec<_> = self.arena.iter().filter(|c| keep(c)).collect();
        claims.sort_by_key(|c| c.id);
        claims
    }

    pub fn stats(&self) -> RegistryStats {
        let top_level = self.top_level().len();
        RegistryStats {
            claims: self.arena.len(),
            top_level,
            children: self.arena.iter().filter(|c| !c.is_top_level()).count(),
            indexed_chunks: self.index.chunk_count(),
            hints: self.hints.len(),
        }
    }

    /// Innermost claim containing `pos`; unclaimed space resolves to the wilderness.
    pub fn claim_at(&self, pos: Vector3i, ignore_height: bool) -> Option<&Claim> {
        let start = Instant::now();
        let found = self.index.query_point(&self.arena, pos, ignore_height);
        self.metrics.record_point_query(start.elapsed());
        found.or(self.wilderness).and_then(|id| self.arena.get(id))
    }

    /// Like [`claim_at`](Self::claim_at), starting from the player's last resolved claim.
    pub fn claim_at_for(&mut self, player: PlayerId, pos: Vector3i) -> Option<&Claim> {
        let start = Instant::now();
        let hinted = self
            .hints
            .get(player)
            .and_then(|id| self.arena.get(id))
            .filter(|claim| claim.contains(pos, false));
        let resolved = match hinted {
            Some(claim) => {
                self.metrics.record_hint_hit();
                Some(innermost(&self.arena, claim, pos, false))
            }
            None => {
                self.metrics.record_hint_miss();
                self.index.query_point(&self.arena, pos, false)
            }
        };
        match resolved {
            Some(id) => self.hints.set(player, id),
            None => self.hints.forget(player),
        }
        self.metrics.record_point_query(start.elapsed());
        resolved.or(self.wilderness).and_then(|id| self.arena.get(id))
    }

    /// Top-level claims within `radius` chunks of `pos`, ordered by id.
    pub fn claims_near(&self, pos: Vector3i, radius: u32) -> Vec<&Claim> {
        self.index
            .query_near(pos, radius)
            .into_iter()
            .filter_map(|id| self.arena.get(id))
            .collect()
    }

    fn reject(&self, rejection: Rejection) -> ClaimError {
        self.metrics.record_rejection();
        log::debug!("Registry: Rejected in '{}': {}", self.world.name, rejection);
        rejection.into()
    }

    fn validate(&self, proposal: &Proposal, ctx: &RegistryContext<'_>) -> Result<Accepted> {
        let limits = ctx.config.limits(&self.world, proposal.claim_type);
        let vertical = ctx.config.vertical_bounds(&self.world);
        OverlapValidator::new(&self.arena, &self.index, limits, vertical)
            .validate(proposal)
            .map_err(|r| self.reject(r))
    }

    fn ensure_blocks(&self, owner: PlayerId, required: i64, ctx: &mut RegistryContext<'_>) -> Result<()> {
        if required <= 0 {
            return Ok(());
        }
        let remaining = ctx.players.remaining_blocks(owner, ctx.config, &self.world);
        if required > remaining {
            return Err(self.reject(Rejection::new(
                RejectionKind::InsufficientBlocks { required, remaining },
                format!("player {} cannot afford {} blocks", owner, required),
            )));
        }
        Ok(())
    }

    fn authorize(&self, proposal: &Proposal, actor: Option<PlayerId>, ctx: &RegistryContext<'_>) -> Result<()> {
        match ctx
            .auth
            .authorize(proposal.claim_type, self.world.id, &proposal.bounds, actor)
        {
            Authorization::Allow => Ok(()),
            Authorization::Deny(reason) => Err(self.reject(Rejection::new(
                RejectionKind::AuthorizationDenied,
                reason,
            ))),
        }
    }

    fn lookup(&self, id: ClaimId) -> Result<&Claim> {
        self.arena.get(id).ok_or(ClaimError::NotFound(id))
    }

    fn lookup_mutable(&self, id: ClaimId) -> Result<&Claim> {
        let claim = self.lookup(id)?;
        if claim.is_wilderness() {
            return Err(ClaimError::Validation(
                "the wilderness claim cannot be changed".into(),
            ));
        }
        Ok(claim)
    }

    /// Validate and commit a new claim.
    pub fn create(
        &mut self,
        builder: ClaimBuilder,
        actor: Option<PlayerId>,
        ctx: &mut RegistryContext<'_>,
    ) -> Result<ClaimId> {
        if builder.world() != self.world.id {
            return Err(ClaimError::Validation(format!(
                "claim targets world {}, not '{}'",
                builder.world(),
                self.world.name
            )));
        }
        if builder.claim_type() == ClaimType::Wilderness {
            return Err(ClaimError::Validation(
                "wilderness claims are managed by the registry".into(),
            ));
        }
        let claim = builder.build().map_err(ClaimError::Validation)?;
        if let Some(parent) = claim.parent {
            let parent_claim = self.lookup(parent)?;
            if !parent_claim.claim_type.can_parent(claim.claim_type) {
                return Err(ClaimError::Validation(format!(
                    "a {} claim cannot hold a {} claim",
                    parent_claim.claim_type, claim.claim_type
                )));
            }
        }
        if self.arena.contains(claim.id) {
            return Err(ClaimError::Validation(format!("claim {} already exists", claim.id)));
        }

        let proposal = Proposal::new(claim.claim_type, claim.bounds, claim.cuboid).with_parent(claim.parent);
        self.validate(&proposal, ctx)?;
        if let Some(owner) = claim.owner {
            self.ensure_blocks(owner, claim.charged_area(), ctx)?;
        }
        self.authorize(&proposal, actor, ctx)?;

        let id = claim.id;
        let parent = claim.parent;
        self.index.add(&claim);
        self.arena.insert(claim);
        if let Some(parent) = parent {
            if let Err(e) = hierarchy::attach(&mut self.arena, parent, id) {
                self.arena.remove(id);
                return Err(e);
            }
        }
        if let Some(claim) = self.arena.get(id) {
            ctx.players.track_claim(claim);
            log::info!("Registry: Created {} in '{}'", claim.label(), self.world.name);
        }
        self.persist(id);
        self.metrics.record_created();
        Ok(id)
    }

    /// Move a claim's corners. Children must stay inside; nothing changes on failure.
    pub fn resize(
        &mut self,
        id: ClaimId,
        bounds: BoundingBox,
        actor: Option<PlayerId>,
        ctx: &mut RegistryContext<'_>,
    ) -> Result<()> {
        let claim = self.lookup_mutable(id)?;
        hierarchy::check_resize(&self.arena, id, &bounds).map_err(|e| {
            self.metrics.record_rejection();
            e
        })?;
        let proposal = Proposal::new(claim.claim_type, bounds, claim.cuboid)
            .with_parent(claim.parent)
            .excluding(id);
        let charged = claim.charged_area() > 0;
        let extra = bounds.area() - claim.bounds.area();
        let owner = claim.owner;

        self.validate(&proposal, ctx)?;
        if let (Some(owner), true) = (owner, charged) {
            self.ensure_blocks(owner, extra, ctx)?;
        }
        self.authorize(&proposal, actor, ctx)?;

        if let Some(claim) = self.arena.get(id) {
            self.index.remove(claim);
        }
        if let Some(claim) = self.arena.get_mut(id) {
            claim.bounds = bounds;
            claim.touch();
            self.index.add(claim);
            ctx.players.track_claim(claim);
        }
        self.invalidate_subtree(id);
        self.persist(id);
        Ok(())
    }

    /// Lower the bottom of a claim and all its descendants to `new_min_y`.
    pub fn extend_depth(&mut self, id: ClaimId, new_min_y: i32, ctx: &mut RegistryContext<'_>) -> Result<()> {
        let claim = self.lookup_mutable(id)?;
        if new_min_y >= claim.bounds.lesser().y {
            return Ok(());
        }
        let bounds = claim.bounds.with_vertical(new_min_y, claim.bounds.greater().y);
        let proposal = Proposal::new(claim.claim_type, bounds, claim.cuboid)
            .with_parent(claim.parent)
            .excluding(id);
        self.validate(&proposal, ctx)?;

        let changed = hierarchy::extend_depth(&mut self.arena, id, new_min_y)?;
        self.hints.invalidate(&changed);
        for changed_id in changed {
            self.persist(changed_id);
        }
        Ok(())
    }

    fn update(&mut self, id: ClaimId, apply: impl FnOnce(&mut Claim)) -> Result<()> {
        self.lookup_mutable(id)?;
        if let Some(claim) = self.arena.get_mut(id) {
            apply(claim);
            claim.touch();
        }
        self.persist(id);
        Ok(())
    }

    pub fn rename(&mut self, id: ClaimId, name: Option<String>) -> Result<()> {
        self.update(id, |claim| claim.meta.name = name)
    }

    pub fn set_greeting(&mut self, id: ClaimId, greeting: Option<String>) -> Result<()> {
        self.update(id, |claim| claim.meta.greeting = greeting)
    }

    pub fn set_farewell(&mut self, id: ClaimId, farewell: Option<String>) -> Result<()> {
        self.update(id, |claim| claim.meta.farewell = farewell)
    }

    pub fn set_flag(&mut self, id: ClaimId, flag: &str, context: &str, value: Tristate) -> Result<()> {
        self.update(id, |claim| claim.flags.set(flag, context, value))
    }

    /// Hand a top-level claim, and the children the old owner held in it, to `new_owner`.
    pub fn transfer(&mut self, id: ClaimId, new_owner: PlayerId, ctx: &mut RegistryContext<'_>) -> Result<()> {
        let claim = self.lookup_mutable(id)?;
        if !claim.claim_type.requires_owner() {
            return Err(ClaimError::Validation(format!(
                "{} claims have no owner",
                claim.claim_type
            )));
        }
        if !claim.is_top_level() {
            return Err(ClaimError::Validation(
                "only top-level claims can change owner".into(),
            ));
        }
        let old_owner = claim.owner;
        if old_owner == Some(new_owner) {
            return Ok(());
        }
        let charge = claim.charged_area();
        self.ensure_blocks(new_owner, charge, ctx)?;

        let mut subtree = hierarchy::descendants(&self.arena, id);
        subtree.push(id);
        for member in subtree {
            let moved = match self.arena.get_mut(member) {
                Some(claim) if claim.owner == old_owner => {
                    if let Some(old) = old_owner {
                        ctx.players.untrack_claim(old, member);
                    }
                    claim.owner = Some(new_owner);
                    claim.touch();
                    ctx.players.track_claim(claim);
                    true
                }
                _ => false,
            };
            if moved {
                self.persist(member);
            }
        }
        log::info!("Registry: Transferred {} to {}", id, new_owner);
        Ok(())
    }

    /// Delete a claim. With children present this fails unless `cascade` is set,
    /// in which case every descendant goes too. Returns the deleted ids.
    pub fn delete(&mut self, id: ClaimId, cascade: bool, ctx: &mut RegistryContext<'_>) -> Result<Vec<ClaimId>> {
        let claim = self.lookup_mutable(id)?;
        if !claim.children.is_empty() && !cascade {
            return Err(ClaimError::HasChildren(id));
        }
        let mut doomed = hierarchy::descendants(&self.arena, id);
        doomed.push(id);
        for member in &doomed {
            self.remove_claim(*member, ctx.players);
        }
        self.hints.invalidate(&doomed);
        self.metrics.record_deleted(doomed.len());
        log::info!(
            "Registry: Deleted {} claim(s) from '{}'",
            doomed.len(),
            self.world.name
        );
        Ok(doomed)
    }

    fn remove_claim(&mut self, id: ClaimId, players: &mut PlayerDataCache) {
        hierarchy::detach(&mut self.arena, id);
        let Some(claim) = self.arena.remove(id) else {
            return;
        };
        self.index.remove(&claim);
        if let Some(owner) = claim.owner {
            players.untrack_claim(owner, id);
        }
        if let Err(e) = self.storage.delete_claim(&claim) {
            log::error!("Registry: Failed to delete {} from storage: {:#}", claim.label(), e);
        }
    }

    /// Owner-initiated deletion. Part of the claim's area is lost from the
    /// owner's accrued blocks according to the abandon-return ratio.
    pub fn abandon(&mut self, id: ClaimId, player: PlayerId, ctx: &mut RegistryContext<'_>) -> Result<Vec<ClaimId>> {
        let claim = self.lookup_mutable(id)?;
        if claim.owner != Some(player) {
            return Err(ClaimError::Validation(format!(
                "{} does not own claim {}",
                player, id
            )));
        }
        let area = claim.charged_area();
        let deleted = self.delete(id, true, ctx)?;

        let ratio = ctx.config.abandon_return_ratio(&self.world);
        let lost = (area as f64 * (1.0 - ratio)).floor() as i64;
        if lost > 0 {
            ctx.players.adjust_accrued(player, -lost, ctx.config, &self.world);
        }
        Ok(deleted)
    }

    /// Delete every top-level claim `owner` holds in this world.
    pub fn delete_owned_by(&mut self, owner: PlayerId, ctx: &mut RegistryContext<'_>) -> Vec<ClaimId> {
        let targets: Vec<ClaimId> = self
            .top_level()
            .into_iter()
            .filter(|c| c.owner == Some(owner))
            .map(|c| c.id)
            .collect();

        let mut deleted = Vec::new();
        for id in targets {
            if !self.arena.contains(id) {
                continue;
            }
            match self.delete(id, true, ctx) {
                Ok(ids) => deleted.extend(ids),
                Err(e) => log::warn!("Registry: Could not delete {}: {}", id, e),
            }
        }
        deleted
    }

    fn invalidate_subtree(&mut self, id: ClaimId) {
        let mut subtree = hierarchy::descendants(&self.arena, id);
        subtree.push(id);
        self.hints.invalidate(&subtree);
    }

    /// Structural invariant violations, empty when the registry is consistent.
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let wilderness = self.arena.iter().filter(|c| c.is_wilderness()).count();
        if wilderness > 1 {
            problems.push(format!("{} wilderness claims", wilderness));
        }

        for id in self.arena.ids() {
            let Some(claim) = self.arena.get(id) else {
                continue;
            };
            for child in &claim.children {
                if self.arena.get(*child).and_then(|c| c.parent) != Some(id) {
                    problems.push(format!("{} lists {} which does not point back", id, child));
                }
            }
            let children: Vec<_> = claim.children.iter().filter_map(|c| self.arena.get(*c)).collect();
            for (i, a) in children.iter().enumerate() {
                for b in &children[i + 1..] {
                    if a.intersects(&b.bounds, b.cuboid) {
                        problems.push(format!("sibling {} overlaps {}", a.id, b.id));
                    }
                }
            }
            match claim.parent {
                Some(parent_id) => match self.arena.get(parent_id) {
                    None => problems.push(format!("{} has missing parent {}", claim.id, parent_id)),
                    Some(parent) => {
                        if !parent.children.contains(&claim.id) {
                            problems.push(format!("{} is not listed by its parent", claim.id));
                        }
                        if !parent.bounds.contains_box(&claim.bounds, !parent.cuboid) {
                            problems.push(format!("{} is outside its parent {}", claim.id, parent_id));
                        }
                    }
                },
                None if !claim.is_wilderness() => {
                    if !self.index.is_indexed(claim.id) {
                        problems.push(format!("{} is not indexed", claim.id));
                    }
                }
                None => {}
            }
        }

        let top_level = self.top_level();
        let mut seen = BTreeSet::new();
        for claim in &top_level {
            for other in self.index.candidates(&claim.bounds) {
                if other == claim.id || seen.contains(&(other, claim.id)) {
                    continue;
                }
                seen.insert((claim.id, other));
                if let Some(other) = self.arena.get(other) {
                    if other.is_top_level() && claim.intersects(&other.bounds, other.cuboid) {
                        problems.push(format!("{} overlaps {}", claim.id, other.id));
                    }
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClaimConfig;
    use crate::hooks::AllowAll;
    use claimguard_model::{WorldId, GLOBAL_CONTEXT};
    use claimguard_storage::MemoryStorage;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        players: PlayerDataCache,
        config: ClaimConfig,
        registry: ClaimRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = Arc::new(MemoryStorage::new());
            let metrics = Arc::new(RegistryMetrics::new());
            let mut players = PlayerDataCache::new(storage.clone(), metrics.clone());
            let registry = ClaimRegistry::load(world(), Vec::new(), storage.clone(), metrics, &mut players);
            Self {
                storage,
                players,
                config: ClaimConfig::default(),
                registry,
            }
        }

        fn ctx(&mut self) -> (&mut ClaimRegistry, RegistryContext<'_>) {
            let ctx = RegistryContext {
                players: &mut self.players,
                config: &self.config,
                auth: &AllowAll,
            };
            (&mut self.registry, ctx)
        }

        fn create(&mut self, builder: ClaimBuilder) -> Result<ClaimId> {
            let (registry, mut ctx) = self.ctx();
            registry.create(builder, None, &mut ctx)
        }
    }

    fn world() -> WorldInfo {
        WorldInfo::new(WorldId::from_u128(1), "world", -64, 320)
    }

    fn owner() -> PlayerId {
        PlayerId::from_u128(1)
    }

    fn basic(a: (i32, i32, i32), b: (i32, i32, i32)) -> ClaimBuilder {
        ClaimBuilder::new(ClaimType::Basic, world().id, BoundingBox::new(a, b)).owner(owner())
    }

    #[test]
    fn test_load_creates_wilderness() {
        let fixture = Fixture::new();
        let wilderness = fixture.registry.wilderness().expect("wilderness");
        assert!(!wilderness.cuboid);
        assert_eq!(fixture.storage.len(), 1);
        let far = Vector3i::new(1_000_000, 0, -1_000_000);
        assert_eq!(fixture.registry.claim_at(far, false).map(|c| c.id), Some(wilderness.id));
    }

    #[test]
    fn test_create_persists_and_indexes() {
        let mut fixture = Fixture::new();
        let id = fixture.create(basic((0, 0, 0), (10, 10, 10))).unwrap();
        let claim = fixture.registry.get(id).unwrap();
        assert!(fixture.storage.contains(claim.locator.as_deref().unwrap()));
        assert_eq!(
            fixture.registry.claim_at(Vector3i::new(5, 5, 5), false).map(|c| c.id),
            Some(id)
        );
        assert!(fixture.registry.verify().is_empty());
    }

    #[test]
    fn test_insufficient_blocks() {
        let mut fixture = Fixture::new();
        // 100 initial blocks, 11x11 would need 121.
        let err = fixture.create(basic((0, 0, 0), (11, 10, 11))).unwrap_err();
        assert!(matches!(
            err,
            ClaimError::InsufficientBlocks {
                required: 121,
                remaining: 100
            }
        ));
        assert_eq!(fixture.registry.top_level().len(), 0);
    }

    #[test]
    fn test_resize_rejected_keeps_claim() {
        let mut fixture = Fixture::new();
        fixture.config.initial_blocks = 1000;
        let parent = fixture.create(basic((0, 0, 0), (20, 20, 20))).unwrap();
        let sub = ClaimBuilder::new(ClaimType::Subdivision, world().id, BoundingBox::new((2, 0, 2), (5, 20, 5)))
            .owner(owner())
            .parent(parent);
        fixture.create(sub).unwrap();

        let (registry, mut ctx) = fixture.ctx();
        let err = registry.resize(parent, BoundingBox::new((0, 0, 0), (4, 20, 4)), None, &mut ctx);
        assert!(matches!(err, Err(ClaimError::Validation(_))));
        assert_eq!(
            registry.get(parent).unwrap().bounds,
            BoundingBox::new((0, 0, 0), (20, 20, 20))
        );
    }

    #[test]
    fn test_resize_charges_extra_area() {
        let mut fixture = Fixture::new();
        let id = fixture.create(basic((0, 0, 0), (8, 10, 8))).unwrap();
        let (registry, mut ctx) = fixture.ctx();
        // 64 used of 100; growing to 10x10 needs 36 more.
        registry
            .resize(id, BoundingBox::new((0, 0, 0), (10, 10, 10)), None, &mut ctx)
            .unwrap();
        let err = registry.resize(id, BoundingBox::new((0, 0, 0), (11, 10, 10)), None, &mut ctx);
        assert!(matches!(err, Err(ClaimError::InsufficientBlocks { .. })));
        assert_eq!(ctx.players.remaining_blocks(owner(), ctx.config, &world()), 0);
    }

    #[test]
    fn test_delete_requires_cascade() {
        let mut fixture = Fixture::new();
        let parent = fixture
            .create(basic((0, 0, 0), (9, 20, 9)))
            .unwrap();
        let sub = ClaimBuilder::new(ClaimType::Subdivision, world().id, BoundingBox::new((1, 0, 1), (3, 5, 3)))
            .owner(owner())
            .parent(parent);
        let sub = fixture.create(sub).unwrap();

        let (registry, mut ctx) = fixture.ctx();
        assert!(matches!(
            registry.delete(parent, false, &mut ctx),
            Err(ClaimError::HasChildren(_))
        ));
        let deleted = registry.delete(parent, true, &mut ctx).unwrap();
        assert_eq!(deleted, vec![sub, parent]);
        assert!(registry.get(sub).is_none());
        // Only the wilderness is left in storage.
        assert_eq!(fixture.storage.len(), 1);
        assert!(!fixture.players.get(owner()).unwrap().owns_claims());
    }

    #[test]
    fn test_save_failure_keeps_memory_state() {
        let mut fixture = Fixture::new();
        fixture.storage.set_fail_writes(true);
        let id = fixture.create(basic((0, 0, 0), (5, 5, 5))).unwrap();
        assert!(fixture.registry.get(id).unwrap().locator.is_none());

        fixture.storage.set_fail_writes(false);
        fixture.registry.rename(id, Some("retry".into())).unwrap();
        let claim = fixture.registry.get(id).unwrap();
        assert!(fixture.storage.contains(claim.locator.as_deref().unwrap()));
    }

    #[test]
    fn test_metadata_updates() {
        let mut fixture = Fixture::new();
        let id = fixture.create(basic((0, 0, 0), (5, 5, 5))).unwrap();
        let registry = &mut fixture.registry;
        registry.set_greeting(id, Some("hello".into())).unwrap();
        registry.set_farewell(id, Some("bye".into())).unwrap();
        registry.set_flag(id, "pvp", GLOBAL_CONTEXT, Tristate::False).unwrap();

        let claim = registry.get(id).unwrap();
        assert_eq!(claim.meta.greeting.as_deref(), Some("hello"));
        assert_eq!(claim.meta.farewell.as_deref(), Some("bye"));
        assert_eq!(claim.flags.get("pvp", GLOBAL_CONTEXT), Tristate::False);

        let wilderness = registry.wilderness().unwrap().id;
        assert!(registry.rename(wilderness, None).is_err());
    }

    #[test]
    fn test_hints_follow_resize() {
        let mut fixture = Fixture::new();
        let id = fixture.create(basic((0, 0, 0), (8, 10, 8))).unwrap();
        let player = PlayerId::from_u128(9);
        let registry = &mut fixture.registry;
        assert_eq!(registry.claim_at_for(player, Vector3i::new(4, 4, 4)).map(|c| c.id), Some(id));
        assert_eq!(registry.claim_at_for(player, Vector3i::new(5, 4, 5)).map(|c| c.id), Some(id));
        assert_eq!(registry.stats().hints, 1);

        let (registry, mut ctx) = fixture.ctx();
        registry
            .resize(id, BoundingBox::new((0, 0, 0), (6, 10, 6)), None, &mut ctx)
            .unwrap();
        assert_eq!(registry.stats().hints, 0);
        let wilderness = registry.wilderness().unwrap().id;
        assert_eq!(
            registry.claim_at_for(player, Vector3i::new(7, 4, 7)).map(|c| c.id),
            Some(wilderness)
        );
    }
}
