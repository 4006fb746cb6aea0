//! Per-player claim-block accounting.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::claim::{Claim, ClaimId, WorldId};

pub type PlayerId = uuid::Uuid;

/// Scope key used when claim blocks are shared across all worlds.
pub const GLOBAL_SCOPE: &str = "global";

/// Accrued and bonus blocks for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockAccount {
    #[serde(default)]
    pub accrued: i64,
    #[serde(default)]
    pub bonus: i64,
}

/// Summary of a claim the player owns, kept so accounting never needs the claim tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedClaim {
    pub world: WorldId,
    pub charged_area: i64,
}

/// Values derived from the external permission system, refreshed in the background.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerOptions {
    pub initial_blocks: Option<i64>,
    pub max_accrued_blocks: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    pub id: PlayerId,
    /// Keyed by [`GLOBAL_SCOPE`] or a world id.
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockAccount>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored: BTreeSet<PlayerId>,
    /// Rebuilt from the claim tables on load.
    #[serde(skip)]
    pub claims: BTreeMap<ClaimId, OwnedClaim>,
    #[serde(skip)]
    pub options: PlayerOptions,
}

impl PlayerData {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            blocks: BTreeMap::new(),
            ignored: BTreeSet::new(),
            claims: BTreeMap::new(),
            options: PlayerOptions::default(),
        }
    }

    pub fn account(&self, scope: &str) -> BlockAccount {
        self.blocks.get(scope).copied().unwrap_or_default()
    }

    pub fn account_mut(&mut self, scope: &str) -> &mut BlockAccount {
        self.blocks.entry(scope.to_string()).or_default()
    }

    /// Record (or refresh) ownership of `claim`.
    pub fn track(&mut self, claim: &Claim) {
        self.claims.insert(
            claim.id,
            OwnedClaim {
                world: claim.world,
                charged_area: claim.charged_area(),
            },
        );
    }

    pub fn untrack(&mut self, claim: ClaimId) -> Option<OwnedClaim> {
        self.claims.remove(&claim)
    }

    pub fn owns_claims(&self) -> bool {
        !self.claims.is_empty()
    }

    /// Blocks used by owned claims counted in `scope`. `None` means every world counts.
    pub fn used_blocks(&self, world: Option<WorldId>) -> i64 {
        self.claims
            .values()
            .filter(|c| world.is_none_or(|w| c.world == w))
            .map(|c| c.charged_area)
            .sum()
    }

    /// `initial + accrued + bonus - used` for a scope.
    pub fn remaining_blocks(&self, scope: &str, initial: i64, world: Option<WorldId>) -> i64 {
        let account = self.account(scope);
        initial + account.accrued + account.bonus - self.used_blocks(world)
    }
}
