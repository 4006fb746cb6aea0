//! Chunk-bucketed lookup from world positions to claims.
//!
//! Only top-level claims are bucketed. A point query finds the top-level claims
//! touching the point's chunk and then descends through children, so the cost is
//! bounded by the claims touching a single chunk. Buckets are ordered sets: when
//! two claims share a face the lowest id wins.

use std::collections::{BTreeSet, HashMap};

use claimguard_model::{BoundingBox, ChunkPos, Claim, ClaimId, PlayerId, Vector3i};

use crate::arena::ClaimArena;

#[derive(Debug, Default)]
pub struct SpatialIndex {
    buckets: HashMap<ChunkPos, BTreeSet<ClaimId>>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket a top-level claim under every chunk its footprint touches.
    /// Children and the wilderness claim are ignored.
    pub fn add(&mut self, claim: &Claim) {
        if !claim.is_top_level() || claim.is_wilderness() {
            return;
        }
        for chunk in claim.bounds.chunks() {
            self.buckets.entry(chunk).or_default().insert(claim.id);
        }
    }

    pub fn remove(&mut self, claim: &Claim) {
        for chunk in claim.bounds.chunks() {
            if let Some(bucket) = self.buckets.get_mut(&chunk) {
                bucket.remove(&claim.id);
                if bucket.is_empty() {
                    self.buckets.remove(&chunk);
                }
            }
        }
    }

    /// Top-level claims whose chunks overlap the chunks `bounds` spans.
    pub fn candidates(&self, bounds: &BoundingBox) -> BTreeSet<ClaimId> {
        bounds
            .chunks()
            .filter_map(|chunk| self.buckets.get(&chunk))
            .flatten()
            .copied()
            .collect()
    }

    /// Innermost claim containing `pos`, or `None` for unclaimed space.
    pub fn query_point(
        &self,
        arena: &ClaimArena,
        pos: Vector3i,
        ignore_height: bool,
    ) -> Option<ClaimId> {
        let bucket = self.buckets.get(&pos.chunk())?;
        bucket
            .iter()
            .filter_map(|id| arena.get(*id))
            .find(|claim| claim.contains(pos, ignore_height))
            .map(|claim| innermost(arena, claim, pos, ignore_height))
    }

    /// Top-level claims in the square window of `radius` chunks around `pos`.
    pub fn query_near(&self, pos: Vector3i, radius: u32) -> BTreeSet<ClaimId> {
        pos.chunk()
            .window(radius)
            .filter_map(|chunk| self.buckets.get(&chunk))
            .flatten()
            .copied()
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_indexed(&self, id: ClaimId) -> bool {
        self.buckets.values().any(|bucket| bucket.contains(&id))
    }
}

/// Descend from `claim` through children containing `pos`; the deepest wins.
pub fn innermost(arena: &ClaimArena, claim: &Claim, pos: Vector3i, ignore_height: bool) -> ClaimId {
    let mut current = claim;
    while let Some(child) = current
        .children
        .iter()
        .filter_map(|id| arena.get(*id))
        .find(|child| child.contains(pos, ignore_height))
    {
        current = child;
    }
    current.id
}

/// Last claim each player was resolved to.
#[derive(Debug, Default)]
pub struct ClaimHints {
    last: HashMap<PlayerId, ClaimId>,
}

impl ClaimHints {
    pub fn get(&self, player: PlayerId) -> Option<ClaimId> {
        self.last.get(&player).copied()
    }

    pub fn set(&mut self, player: PlayerId, claim: ClaimId) {
        self.last.insert(player, claim);
    }

    /// Drop every hint pointing at one of `claims`.
    pub fn invalidate(&mut self, claims: &[ClaimId]) {
        self.last.retain(|_, hinted| !claims.contains(hinted));
    }

    pub fn forget(&mut self, player: PlayerId) {
        self.last.remove(&player);
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
