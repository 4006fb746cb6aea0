use claimguard_model::{BoundingBox, ClaimId, ClaimType};

use crate::arena::ClaimArena;
use crate::config::TypeLimits;
use crate::error::{Rejection, RejectionKind};
use crate::index::SpatialIndex;

/// A box someone wants to claim, or an existing claim's new box.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub claim_type: ClaimType,
    pub bounds: BoundingBox,
    pub cuboid: bool,
    pub parent: Option<ClaimId>,
    /// Claim being resized; it never blocks itself.
    pub exclude: Option<ClaimId>,
}

impl Proposal {
    pub fn new(claim_type: ClaimType, bounds: BoundingBox, cuboid: bool) -> Self {
        Self {
            claim_type,
            bounds,
            cuboid,
            parent: None,
            exclude: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<ClaimId>) -> Self {
        self.parent = parent;
        self
    }

    pub fn excluding(mut self, id: ClaimId) -> Self {
        self.exclude = Some(id);
        self
    }
}

/// A proposal that passed geometry checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub bounds: BoundingBox,
    pub parent: Option<ClaimId>,
}

/// Geometry checks against one world's claims. Read-only; the registry commits.
pub struct OverlapValidator<'a> {
    arena: &'a ClaimArena,
    index: &'a SpatialIndex,
    limits: TypeLimits,
    vertical: (i32, i32),
}

impl<'a> OverlapValidator<'a> {
    pub fn new(
        arena: &'a ClaimArena,
        index: &'a SpatialIndex,
        limits: TypeLimits,
        vertical: (i32, i32),
    ) -> Self {
        Self {
            arena,
            index,
            limits,
            vertical,
        }
    }

    pub fn validate(&self, proposal: &Proposal) -> Result<Accepted, Rejection> {
        self.check_bounds(proposal)?;
        match proposal.parent {
            Some(parent) => self.check_inside_parent(proposal, parent)?,
            None => self.check_top_level(proposal)?,
        }
        Ok(Accepted {
            bounds: proposal.bounds,
            parent: proposal.parent,
        })
    }

    fn check_bounds(&self, proposal: &Proposal) -> Result<(), Rejection> {
        let bounds = &proposal.bounds;
        let (floor, ceiling) = self.vertical;
        if bounds.lesser().y < floor {
            return Err(Rejection::invalid_bounds(format!(
                "bottom {} is below the world floor {}",
                bounds.lesser().y,
                floor
            )));
        }
        // Non-cuboid claims reach the build limit regardless of their stored top.
        if proposal.cuboid && bounds.greater().y > ceiling {
            return Err(Rejection::invalid_bounds(format!(
                "top {} is above the world ceiling {}",
                bounds.greater().y,
                ceiling
            )));
        }
        if proposal.claim_type == ClaimType::Admin {
            return Ok(());
        }

        let limits = &self.limits;
        let mut axes = vec![
            ("x", bounds.size_x(), limits.min_x, limits.max_x),
            ("z", bounds.size_z(), limits.min_z, limits.max_z),
        ];
        if proposal.cuboid {
            axes.push(("y", bounds.size_y(), limits.min_y, limits.max_y));
        }
        for (axis, size, min, max) in axes {
            if size < min {
                return Err(Rejection::invalid_bounds(format!(
                    "{} size {} is below the minimum {} for {} claims",
                    axis, size, min, proposal.claim_type
                )));
            }
            if let Some(max) = max.filter(|max| size > *max) {
                return Err(Rejection::invalid_bounds(format!(
                    "{} size {} exceeds the maximum {} for {} claims",
                    axis, size, max, proposal.claim_type
                )));
            }
        }
        Ok(())
    }

    fn check_inside_parent(&self, proposal: &Proposal, parent: ClaimId) -> Result<(), Rejection> {
        let Some(parent) = self.arena.get(parent) else {
            return Err(Rejection::invalid_bounds(format!("parent {} does not exist", parent)));
        };
        if !parent.bounds.contains_box(&proposal.bounds, !parent.cuboid) {
            return Err(Rejection::invalid_bounds(format!(
                "box is not inside parent {}",
                parent.id
            )));
        }
        let mut siblings: Vec<_> = parent
            .children
            .iter()
            .filter(|id| Some(**id) != proposal.exclude)
            .filter_map(|id| self.arena.get(*id))
            .collect();
        siblings.sort_by_key(|c| c.id);
        match siblings
            .into_iter()
            .find(|sibling| sibling.intersects(&proposal.bounds, proposal.cuboid))
        {
            Some(blocking) => Err(overlap(blocking.id)),
            None => Ok(()),
        }
    }

    fn check_top_level(&self, proposal: &Proposal) -> Result<(), Rejection> {
        let blocking = self
            .index
            .candidates(&proposal.bounds)
            .into_iter()
            .filter(|id| Some(*id) != proposal.exclude)
            .filter_map(|id| self.arena.get(id))
            .filter(|claim| !claim.is_wilderness())
            .find(|claim| claim.intersects(&proposal.bounds, proposal.cuboid));
        match blocking {
            Some(claim) => Err(overlap(claim.id)),
            None => Ok(()),
        }
    }
}

fn overlap(blocking: ClaimId) -> Rejection {
    Rejection::new(
        RejectionKind::Overlap { blocking },
        format!("box overlaps claim {}", blocking),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy;
    use claimguard_model::{Claim, ClaimBuilder, PlayerId, WorldId};

    struct World {
        arena: ClaimArena,
        index: SpatialIndex,
    }

    impl World {
        fn new() -> Self {
            Self {
                arena: ClaimArena::new(),
                index: SpatialIndex::new(),
            }
        }

        fn add(&mut self, claim: Claim) -> ClaimId {
            let id = claim.id;
            let parent = claim.parent;
            self.index.add(&claim);
            self.arena.insert(claim);
            if let Some(parent) = parent {
                hierarchy::attach(&mut self.arena, parent, id).unwrap();
            }
            id
        }

        fn validator(&self, limits: TypeLimits) -> OverlapValidator<'_> {
            OverlapValidator::new(&self.arena, &self.index, limits, (-64, 320))
        }
    }

    fn basic(id: u128, a: (i32, i32, i32), b: (i32, i32, i32)) -> Claim {
        ClaimBuilder::new(ClaimType::Basic, WorldId::from_u128(1), BoundingBox::new(a, b))
            .id(ClaimId::from_u128(id))
            .owner(PlayerId::from_u128(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_overlap_reports_blocking_claim() {
        let mut world = World::new();
        world.add(basic(1, (0, 0, 0), (10, 10, 10)));
        let proposal = Proposal::new(ClaimType::Basic, BoundingBox::new((5, 0, 5), (15, 10, 15)), true);
        let rejection = world.validator(TypeLimits::default()).validate(&proposal).unwrap_err();
        assert_eq!(
            rejection.kind,
            RejectionKind::Overlap {
                blocking: ClaimId::from_u128(1)
            }
        );
    }

    #[test]
    fn test_face_contact_is_allowed() {
        let mut world = World::new();
        world.add(basic(1, (0, 0, 0), (10, 10, 10)));
        let validator = world.validator(TypeLimits::default());

        let touching = Proposal::new(ClaimType::Basic, BoundingBox::new((10, 0, 0), (20, 10, 10)), true);
        assert!(validator.validate(&touching).is_ok());

        let one_unit = Proposal::new(ClaimType::Basic, BoundingBox::new((9, 0, 0), (20, 10, 10)), true);
        assert!(validator.validate(&one_unit).is_err());
    }

    #[test]
    fn test_height_only_compared_between_cuboids() {
        let mut world = World::new();
        world.add(basic(1, (0, 0, 0), (10, 10, 10)));
        let validator = world.validator(TypeLimits::default());

        let above = BoundingBox::new((0, 20, 0), (10, 30, 10));
        assert!(validator.validate(&Proposal::new(ClaimType::Basic, above, true)).is_ok());
        assert!(validator.validate(&Proposal::new(ClaimType::Basic, above, false)).is_err());
    }

    #[test]
    fn test_resize_excludes_itself() {
        let mut world = World::new();
        let id = world.add(basic(1, (0, 0, 0), (10, 10, 10)));
        let proposal =
            Proposal::new(ClaimType::Basic, BoundingBox::new((0, 0, 0), (12, 10, 12)), true).excluding(id);
        assert!(world.validator(TypeLimits::default()).validate(&proposal).is_ok());
    }

    #[test]
    fn test_subdivision_rules() {
        let mut world = World::new();
        let parent = world.add(basic(1, (0, 0, 0), (20, 20, 20)));
        let mut sub = basic(2, (2, 0, 2), (5, 20, 5));
        sub.claim_type = ClaimType::Subdivision;
        sub.parent = Some(parent);
        world.add(sub);
        let validator = world.validator(TypeLimits::default());

        let outside = Proposal::new(ClaimType::Subdivision, BoundingBox::new((15, 0, 15), (25, 10, 25)), true)
            .with_parent(Some(parent));
        assert_eq!(validator.validate(&outside).unwrap_err().kind, RejectionKind::InvalidBounds);

        let sibling_clash = Proposal::new(ClaimType::Subdivision, BoundingBox::new((4, 0, 4), (8, 10, 8)), true)
            .with_parent(Some(parent));
        assert_eq!(
            validator.validate(&sibling_clash).unwrap_err().kind,
            RejectionKind::Overlap {
                blocking: ClaimId::from_u128(2)
            }
        );

        let fine = Proposal::new(ClaimType::Subdivision, BoundingBox::new((10, 0, 10), (15, 10, 15)), true)
            .with_parent(Some(parent));
        assert!(validator.validate(&fine).is_ok());
    }

    #[test]
    fn test_size_and_vertical_limits() {
        let world = World::new();
        let limits = TypeLimits {
            min_x: 5,
            min_z: 5,
            max_x: Some(50),
            ..Default::default()
        };
        let validator = world.validator(limits);

        let small = Proposal::new(ClaimType::Basic, BoundingBox::new((0, 0, 0), (3, 10, 10)), true);
        assert_eq!(validator.validate(&small).unwrap_err().kind, RejectionKind::InvalidBounds);

        let wide = Proposal::new(ClaimType::Basic, BoundingBox::new((0, 0, 0), (60, 10, 10)), true);
        assert!(validator.validate(&wide).is_err());

        // Admin claims skip size limits but not the world floor.
        let admin_small = Proposal::new(ClaimType::Admin, BoundingBox::new((0, 0, 0), (1, 1, 1)), true);
        assert!(validator.validate(&admin_small).is_ok());
        let too_deep = Proposal::new(ClaimType::Admin, BoundingBox::new((0, -100, 0), (10, 0, 10)), true);
        assert!(validator.validate(&too_deep).is_err());
        let deep_column = Proposal::new(ClaimType::Admin, BoundingBox::new((0, -100, 0), (10, 0, 10)), false);
        assert_eq!(validator.validate(&deep_column).unwrap_err().kind, RejectionKind::InvalidBounds);
        let tall_column = Proposal::new(ClaimType::Admin, BoundingBox::new((0, 0, 0), (10, 400, 10)), false);
        assert!(validator.validate(&tall_column).is_ok());
    }
}
