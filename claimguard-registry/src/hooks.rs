//! Contracts with the host's permission system.

use claimguard_model::{BoundingBox, ClaimFlags, ClaimType, PlayerId, PlayerOptions, WorldId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny(String),
}

/// Final say on a claim creation or resize, asked after geometry checks pass.
pub trait AuthorizationHook: Send + Sync {
    fn authorize(
        &self,
        claim_type: ClaimType,
        world: WorldId,
        bounds: &BoundingBox,
        actor: Option<PlayerId>,
    ) -> Authorization;
}

pub struct AllowAll;

impl AuthorizationHook for AllowAll {
    fn authorize(&self, _: ClaimType, _: WorldId, _: &BoundingBox, _: Option<PlayerId>) -> Authorization {
        Authorization::Allow
    }
}

/// Receives the default flag set of each claim type. Fire and forget.
pub trait PermissionDefaultsPublisher: Send + Sync {
    fn publish(&self, claim_type: ClaimType, defaults: &ClaimFlags);
}

pub struct LogPublisher;

impl PermissionDefaultsPublisher for LogPublisher {
    fn publish(&self, claim_type: ClaimType, defaults: &ClaimFlags) {
        for (context, flag, value) in defaults.iter() {
            log::debug!("Defaults: {} {}[{}] = {:?}", claim_type, flag, context, value);
        }
    }
}

/// Computes permission-derived options for a player. Called off the mutation thread.
pub trait OptionResolver: Send + Sync {
    fn resolve(&self, player: PlayerId) -> PlayerOptions;
}

pub struct NoOptions;

impl OptionResolver for NoOptions {
    fn resolve(&self, _: PlayerId) -> PlayerOptions {
        PlayerOptions::default()
    }
}
