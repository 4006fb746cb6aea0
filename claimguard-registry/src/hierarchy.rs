//! Parent/child structure over the claim arena.
//!
//! A child always lies inside its parent's box and its parent's type must be
//! able to hold it. Children are kept ordered by creation time, then id.

use claimguard_model::{BoundingBox, ClaimId};

use crate::arena::ClaimArena;
use crate::error::{ClaimError, Result};

/// Link `child` under `parent`.
pub fn attach(arena: &mut ClaimArena, parent: ClaimId, child: ClaimId) -> Result<()> {
    let parent_claim = arena.get(parent).ok_or(ClaimError::NotFound(parent))?;
    let child_claim = arena.get(child).ok_or(ClaimError::NotFound(child))?;

    if parent == child {
        return Err(ClaimError::Validation(format!("{} cannot parent itself", parent)));
    }
    if parent_claim.world != child_claim.world {
        return Err(ClaimError::Validation(format!(
            "{} and {} are in different worlds",
            parent, child
        )));
    }
    if !parent_claim.claim_type.can_parent(child_claim.claim_type) {
        return Err(ClaimError::Validation(format!(
            "a {} claim cannot hold a {} claim",
            parent_claim.claim_type, child_claim.claim_type
        )));
    }
    if !parent_claim
        .bounds
        .contains_box(&child_claim.bounds, !parent_claim.cuboid)
    {
        return Err(ClaimError::Validation(format!(
            "{} is not inside its parent {}",
            child, parent
        )));
    }

    let key = (child_claim.meta.created, child);
    let siblings: Vec<_> = parent_claim
        .children
        .iter()
        .filter_map(|id| arena.get(*id).map(|c| (c.meta.created, c.id)))
        .collect();
    let position = siblings.partition_point(|sibling| *sibling < key);

    if let Some(claim) = arena.get_mut(child) {
        claim.parent = Some(parent);
    }
    if let Some(claim) = arena.get_mut(parent) {
        if !claim.children.contains(&child) {
            claim.children.insert(position.min(claim.children.len()), child);
        }
    }
    Ok(())
}

/// Unlink `child` from its parent, returning the former parent.
pub fn detach(arena: &mut ClaimArena, child: ClaimId) -> Option<ClaimId> {
    let parent = arena.get_mut(child)?.parent.take()?;
    if let Some(claim) = arena.get_mut(parent) {
        claim.children.retain(|id| *id != child);
    }
    Some(parent)
}

/// Every descendant of `id`, deepest first. `id` itself is not included.
pub fn descendants(arena: &ClaimArena, id: ClaimId) -> Vec<ClaimId> {
    let mut out = Vec::new();
    collect_descendants(arena, id, &mut out);
    out
}

fn collect_descendants(arena: &ClaimArena, id: ClaimId, out: &mut Vec<ClaimId>) {
    if let Some(claim) = arena.get(id) {
        for child in &claim.children {
            collect_descendants(arena, *child, out);
            out.push(*child);
        }
    }
}

/// Check that every child of `id` still fits inside `new_bounds`.
pub fn check_resize(arena: &ClaimArena, id: ClaimId, new_bounds: &BoundingBox) -> Result<()> {
    let claim = arena.get(id).ok_or(ClaimError::NotFound(id))?;
    for child in claim.children.iter().filter_map(|c| arena.get(*c)) {
        if !new_bounds.contains_box(&child.bounds, !claim.cuboid) {
            return Err(ClaimError::Validation(format!(
                "child claim {} would fall outside the resized claim",
                child.id
            )));
        }
    }
    Ok(())
}

fn deepened(bounds: &BoundingBox, new_min_y: i32) -> BoundingBox {
    if bounds.lesser().y > new_min_y {
        bounds.with_vertical(new_min_y, bounds.greater().y)
    } else {
        *bounds
    }
}

/// Check that lowering `id` and its descendants to `new_min_y` keeps every
/// set of siblings inside the subtree disjoint. The lowest id of a clashing
/// pair is reported as blocking.
pub fn check_depth(arena: &ClaimArena, id: ClaimId, new_min_y: i32) -> Result<()> {
    if !arena.contains(id) {
        return Err(ClaimError::NotFound(id));
    }
    let mut parents = descendants(arena, id);
    parents.push(id);

    let mut blocking: Option<ClaimId> = None;
    for parent in parents.iter().filter_map(|p| arena.get(*p)) {
        let children: Vec<_> = parent
            .children
            .iter()
            .filter_map(|c| arena.get(*c))
            .map(|c| (c.id, deepened(&c.bounds, new_min_y), c.cuboid))
            .collect();
        for (i, (a, a_box, a_cuboid)) in children.iter().enumerate() {
            for (b, b_box, b_cuboid) in &children[i + 1..] {
                if a_box.intersects(b_box, *a_cuboid && *b_cuboid) {
                    let low = (*a).min(*b);
                    blocking = Some(blocking.map_or(low, |current| current.min(low)));
                }
            }
        }
    }
    match blocking {
        Some(blocking) => Err(ClaimError::Overlap { blocking }),
        None => Ok(()),
    }
}

/// Lower the bottom of `id` and every descendant to `new_min_y`.
/// Claims already reaching that deep are left alone. Returns the changed ids.
/// Nothing changes if siblings would end up overlapping.
pub fn extend_depth(arena: &mut ClaimArena, id: ClaimId, new_min_y: i32) -> Result<Vec<ClaimId>> {
    check_depth(arena, id, new_min_y)?;
    let mut targets = descendants(arena, id);
    targets.push(id);

    let mut changed = Vec::new();
    for target in targets {
        if let Some(claim) = arena.get_mut(target) {
            let bounds = claim.bounds;
            if bounds.lesser().y > new_min_y {
                claim.bounds = bounds.with_vertical(new_min_y, bounds.greater().y);
                claim.touch();
                changed.push(target);
            }
        }
    }
    Ok(changed)
}
