//! Data model shared by the claim registry and its storage backends.

pub mod claim;
pub mod flags;
pub mod geometry;
pub mod player;

pub use claim::{Claim, ClaimBuilder, ClaimId, ClaimMeta, ClaimType, WorldId};
pub use flags::{ClaimFlags, Tristate, GLOBAL_CONTEXT};
pub use geometry::{BoundingBox, ChunkPos, Vector3i};
pub use player::{BlockAccount, OwnedClaim, PlayerData, PlayerId, PlayerOptions, GLOBAL_SCOPE};

const CHUNK_SHIFT: u32 = 4;

/// Chunk coordinate of a block coordinate (floors towards negative infinity).
#[inline]
pub fn block_to_chunk(block: i32) -> i32 {
    block >> CHUNK_SHIFT
}
