//! In-memory claim registry: spatial lookup, the parent/child hierarchy,
//! overlap validation and block accounting, written through to a
//! [`claimguard_storage::ClaimStorage`] on every mutation.

pub mod arena;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod hooks;
pub mod index;
pub mod manager;
pub mod player;
pub mod registry;
pub mod validator;
pub mod worker;

pub use config::{ClaimConfig, ConfigurationProvider, TypeLimits, WorldInfo, WorldSettings};
pub use error::{ClaimError, Rejection, RejectionKind, Result};
pub use hooks::{Authorization, AuthorizationHook, OptionResolver, PermissionDefaultsPublisher};
pub use manager::{ClaimManager, Hooks};
pub use player::PlayerDataCache;
pub use registry::{ClaimRegistry, RegistryContext, RegistryStats, WORLD_BORDER};
pub use worker::{BackgroundPool, RegistryMessage};
