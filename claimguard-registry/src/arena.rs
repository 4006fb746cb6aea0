use std::collections::HashMap;

use claimguard_model::{Claim, ClaimId};

/// Every claim of one world keyed by id. Parent and child links are ids into this table.
#[derive(Debug, Default)]
pub struct ClaimArena {
    claims: HashMap<ClaimId, Claim>,
}

impl ClaimArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ClaimId) -> Option<&Claim> {
        self.claims.get(&id)
    }

    pub fn get_mut(&mut self, id: ClaimId) -> Option<&mut Claim> {
        self.claims.get_mut(&id)
    }

    pub fn contains(&self, id: ClaimId) -> bool {
        self.claims.contains_key(&id)
    }

    pub fn insert(&mut self, claim: Claim) -> Option<Claim> {
        self.claims.insert(claim.id, claim)
    }

    pub fn remove(&mut self, id: ClaimId) -> Option<Claim> {
        self.claims.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    /// Ids in ascending order, for deterministic iteration.
    pub fn ids(&self) -> Vec<ClaimId> {
        let mut ids: Vec<_> = self.claims.keys().copied().collect();
        ids.sort();
        ids
    }
}
