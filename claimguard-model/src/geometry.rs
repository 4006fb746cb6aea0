//! Integer block positions, chunk columns and axis-aligned claim boxes.
//!
//! Boxes are treated as the closed continuous region between their corners:
//! two boxes that only share a face do not overlap, while boxes sharing any
//! interior volume do.

use serde::{Deserialize, Serialize};

use crate::block_to_chunk;

/// A block position in a world.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Vector3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vector3i {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk column containing this position.
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::new(block_to_chunk(self.x), block_to_chunk(self.z))
    }
}

impl From<(i32, i32, i32)> for Vector3i {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Coordinates of a 16x16 chunk column.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// All chunks in the square window of `radius` chunks around this one.
    pub fn window(&self, radius: u32) -> impl Iterator<Item = ChunkPos> + use<> {
        let r = radius as i32;
        let (cx, cz) = (self.x, self.z);
        (cx - r..=cx + r).flat_map(move |x| (cz - r..=cz + r).map(move |z| ChunkPos::new(x, z)))
    }
}

/// Axis-aligned box between two corners, normalized so `lesser <= greater`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBox")]
pub struct BoundingBox {
    lesser: Vector3i,
    greater: Vector3i,
}

#[derive(Deserialize)]
struct RawBox {
    lesser: Vector3i,
    greater: Vector3i,
}

impl TryFrom<RawBox> for BoundingBox {
    type Error = String;

    fn try_from(raw: RawBox) -> Result<Self, Self::Error> {
        let b = BoundingBox::new(raw.lesser, raw.greater);
        if b.lesser != raw.lesser {
            return Err(format!(
                "lesser corner {:?} is not the minimum of {:?} and {:?}",
                raw.lesser, raw.lesser, raw.greater
            ));
        }
        Ok(b)
    }
}

impl BoundingBox {
    /// Build a box from any two opposite corners.
    pub fn new(a: impl Into<Vector3i>, b: impl Into<Vector3i>) -> Self {
        let (a, b) = (a.into(), b.into());
        Self {
            lesser: Vector3i::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            greater: Vector3i::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn lesser(&self) -> Vector3i {
        self.lesser
    }

    pub fn greater(&self) -> Vector3i {
        self.greater
    }

    pub fn size_x(&self) -> i64 {
        self.greater.x as i64 - self.lesser.x as i64
    }

    pub fn size_y(&self) -> i64 {
        self.greater.y as i64 - self.lesser.y as i64
    }

    pub fn size_z(&self) -> i64 {
        self.greater.z as i64 - self.lesser.z as i64
    }

    /// Horizontal footprint, the unit claim blocks are charged in.
    pub fn area(&self) -> i64 {
        self.size_x() * self.size_z()
    }

    /// Inclusive point test. With `ignore_height` only x and z are compared.
    pub fn contains_point(&self, pos: Vector3i, ignore_height: bool) -> bool {
        let horizontal = self.lesser.x <= pos.x
            && pos.x <= self.greater.x
            && self.lesser.z <= pos.z
            && pos.z <= self.greater.z;
        horizontal && (ignore_height || (self.lesser.y <= pos.y && pos.y <= self.greater.y))
    }

    /// Inclusive containment of `other` inside `self`.
    pub fn contains_box(&self, other: &BoundingBox, ignore_height: bool) -> bool {
        self.contains_point(other.lesser, ignore_height)
            && self.contains_point(other.greater, ignore_height)
    }

    /// Positive-volume intersection. Face contact is not an intersection.
    pub fn intersects(&self, other: &BoundingBox, check_height: bool) -> bool {
        let x = self.lesser.x < other.greater.x && other.lesser.x < self.greater.x;
        let z = self.lesser.z < other.greater.z && other.lesser.z < self.greater.z;
        let y = !check_height || (self.lesser.y < other.greater.y && other.lesser.y < self.greater.y);
        x && y && z
    }

    /// Every chunk column the horizontal footprint touches.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + use<> {
        let min = self.lesser.chunk();
        let max = self.greater.chunk();
        (min.x..=max.x).flat_map(move |x| (min.z..=max.z).map(move |z| ChunkPos::new(x, z)))
    }

    /// Same footprint with a new vertical span.
    pub fn with_vertical(&self, min_y: i32, max_y: i32) -> Self {
        Self::new(
            Vector3i::new(self.lesser.x, min_y, self.lesser.z),
            Vector3i::new(self.greater.x, max_y, self.greater.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(a: (i32, i32, i32), b: (i32, i32, i32)) -> BoundingBox {
        BoundingBox::new(a, b)
    }

    #[test]
    fn test_new_normalizes_corners() {
        let b = bx((10, 5, -3), (0, 20, 4));
        assert_eq!(b.lesser(), Vector3i::new(0, 5, -3));
        assert_eq!(b.greater(), Vector3i::new(10, 20, 4));
    }

    #[test]
    fn test_face_contact_is_not_overlap() {
        let a = bx((0, 0, 0), (10, 10, 10));
        let b = bx((10, 0, 0), (20, 10, 10));
        assert!(!a.intersects(&b, true));
        assert!(!b.intersects(&a, true));
    }

    #[test]
    fn test_one_unit_overlap() {
        let a = bx((0, 0, 0), (10, 10, 10));
        let b = bx((9, 0, 9), (20, 10, 20));
        assert!(a.intersects(&b, true));
    }

    #[test]
    fn test_vertical_separation_only_counts_for_cuboids() {
        let low = bx((0, 0, 0), (10, 10, 10));
        let high = bx((0, 20, 0), (10, 30, 10));
        assert!(!low.intersects(&high, true));
        assert!(low.intersects(&high, false));
    }

    #[test]
    fn test_contains_point_and_box() {
        let outer = bx((0, 0, 0), (20, 20, 20));
        assert!(outer.contains_point(Vector3i::new(20, 0, 5), false));
        assert!(!outer.contains_point(Vector3i::new(5, 21, 5), false));
        assert!(outer.contains_point(Vector3i::new(5, 99, 5), true));
        assert!(outer.contains_box(&bx((2, 0, 2), (5, 20, 5)), false));
        assert!(!outer.contains_box(&bx((2, 0, 2), (25, 20, 5)), false));
    }

    #[test]
    fn test_chunks_span_negative_coordinates() {
        let b = bx((-1, 0, 0), (16, 0, 15));
        let chunks: Vec<_> = b.chunks().collect();
        assert_eq!(
            chunks,
            vec![
                ChunkPos::new(-1, 0),
                ChunkPos::new(0, 0),
                ChunkPos::new(1, 0)
            ]
        );
    }

    #[test]
    fn test_area() {
        assert_eq!(bx((0, 0, 0), (10, 64, 8)).area(), 80);
    }

    #[test]
    fn test_window() {
        let c = ChunkPos::new(0, 0);
        assert_eq!(c.window(0).count(), 1);
        assert_eq!(c.window(2).count(), 25);
    }
}
