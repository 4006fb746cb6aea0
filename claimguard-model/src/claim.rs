//! Claim records.
//!
//! A claim is one record tagged with a [`ClaimType`]; per-type behaviour lives in
//! policy tables (see the registry's configuration) rather than in separate types.
//! Parent and child links are ids into the owning world's claim table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::ClaimFlags;
use crate::geometry::{BoundingBox, Vector3i};
use crate::player::PlayerId;

pub type ClaimId = uuid::Uuid;
pub type WorldId = uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimType {
    Admin,
    Basic,
    Town,
    Subdivision,
    Wilderness,
}

impl ClaimType {
    pub const ALL: [ClaimType; 5] = [
        ClaimType::Admin,
        ClaimType::Basic,
        ClaimType::Town,
        ClaimType::Subdivision,
        ClaimType::Wilderness,
    ];

    /// Directory / column name used by storage backends.
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimType::Admin => "admin",
            ClaimType::Basic => "basic",
            ClaimType::Town => "town",
            ClaimType::Subdivision => "subdivision",
            ClaimType::Wilderness => "wilderness",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    /// Whether claims of this type carry an owner.
    pub fn requires_owner(self) -> bool {
        !matches!(self, ClaimType::Admin | ClaimType::Wilderness)
    }

    /// Whether a top-level claim of this type is charged against its owner's claim blocks.
    pub fn consumes_blocks(self) -> bool {
        matches!(self, ClaimType::Basic | ClaimType::Town)
    }

    /// Whether a claim of this type may hold `child` directly.
    pub fn can_parent(self, child: ClaimType) -> bool {
        match (self, child) {
            (ClaimType::Admin | ClaimType::Basic | ClaimType::Town, ClaimType::Subdivision) => true,
            (ClaimType::Town, ClaimType::Basic) => true,
            _ => false,
        }
    }

    /// Whether claims of this type must always have a parent.
    pub fn requires_parent(self) -> bool {
        self == ClaimType::Subdivision
    }
}

impl std::fmt::Display for ClaimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farewell: Option<String>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified: DateTime<Utc>,
}

impl ClaimMeta {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            name: None,
            greeting: None,
            farewell: None,
            created: now,
            modified: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub world: WorldId,
    #[serde(flatten)]
    pub bounds: BoundingBox,
    #[serde(default)]
    pub cuboid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ClaimId>,
    /// Rebuilt from the children's parent links on load.
    #[serde(skip)]
    pub children: Vec<ClaimId>,
    #[serde(default, skip_serializing_if = "ClaimFlags::is_empty")]
    pub flags: ClaimFlags,
    #[serde(flatten)]
    pub meta: ClaimMeta,
    /// Where the backend last stored this record.
    #[serde(skip)]
    pub locator: Option<String>,
}

impl Claim {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_wilderness(&self) -> bool {
        self.claim_type == ClaimType::Wilderness
    }

    /// Point test honouring the cuboid flag: non-cuboid claims span the full world height.
    pub fn contains(&self, pos: Vector3i, ignore_height: bool) -> bool {
        self.bounds.contains_point(pos, ignore_height || !self.cuboid)
    }

    /// Overlap test honouring both claims' cuboid flags.
    pub fn intersects(&self, bounds: &BoundingBox, cuboid: bool) -> bool {
        self.bounds.intersects(bounds, self.cuboid && cuboid)
    }

    /// Blocks charged to the owner for this claim.
    pub fn charged_area(&self) -> i64 {
        if self.is_top_level() && self.claim_type.consumes_blocks() {
            self.bounds.area()
        } else {
            0
        }
    }

    pub fn touch(&mut self) {
        self.meta.modified = Utc::now();
    }

    /// Short human readable label for logs.
    pub fn label(&self) -> String {
        match &self.meta.name {
            Some(name) => format!("{} '{}' ({})", self.claim_type, name, self.id),
            None => format!("{} {}", self.claim_type, self.id),
        }
    }
}

/// Builder for new claims. The registry validates what it produces before commit.
#[derive(Debug, Clone)]
pub struct ClaimBuilder {
    claim_type: ClaimType,
    world: WorldId,
    bounds: BoundingBox,
    cuboid: bool,
    owner: Option<PlayerId>,
    parent: Option<ClaimId>,
    name: Option<String>,
    flags: ClaimFlags,
    id: Option<ClaimId>,
}

impl ClaimBuilder {
    pub fn new(claim_type: ClaimType, world: WorldId, bounds: BoundingBox) -> Self {
        Self {
            claim_type,
            world,
            bounds,
            cuboid: true,
            owner: None,
            parent: None,
            name: None,
            flags: ClaimFlags::new(),
            id: None,
        }
    }

    pub fn owner(mut self, owner: PlayerId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn parent(mut self, parent: ClaimId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn cuboid(mut self, cuboid: bool) -> Self {
        self.cuboid = cuboid;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn flags(mut self, flags: ClaimFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Use a fixed id instead of a random one.
    pub fn id(mut self, id: ClaimId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn claim_type(&self) -> ClaimType {
        self.claim_type
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Produce the record. Owner rules are enforced here; geometry is the validator's job.
    pub fn build(self) -> Result<Claim, String> {
        if self.claim_type.requires_owner() && self.owner.is_none() {
            return Err(format!("{} claims need an owner", self.claim_type));
        }
        if !self.claim_type.requires_owner() && self.owner.is_some() {
            return Err(format!("{} claims cannot have an owner", self.claim_type));
        }
        if self.claim_type.requires_parent() && self.parent.is_none() {
            return Err(format!("{} claims need a parent", self.claim_type));
        }
        let now = Utc::now();
        let mut meta = ClaimMeta::new(now);
        meta.name = self.name;
        Ok(Claim {
            id: self.id.unwrap_or_else(uuid::Uuid::new_v4),
            claim_type: self.claim_type,
            world: self.world,
            bounds: self.bounds,
            cuboid: self.cuboid,
            owner: self.owner,
            parent: self.parent,
            children: Vec::new(),
            flags: self.flags,
            meta,
            locator: None,
        })
    }
}
