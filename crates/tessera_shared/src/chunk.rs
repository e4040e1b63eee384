//! Chunk coordinates and the world grid.
//!
//! The world is cut into square columns on the XZ plane. A [`ChunkId`] is a
//! pure function of a position and the chunk size; the same position always
//! maps to the same chunk on client and server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Error parsing a `"x,z"` chunk id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid chunk id `{0}`, expected \"x,z\"")]
pub struct ChunkIdParseError(pub String);

/// Integer grid coordinate of a chunk.
///
/// On the wire this is the string `"x,z"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId {
    /// Grid X
    pub x: i32,
    /// Grid Z
    pub z: i32,
}

impl ChunkId {
    /// Creates a chunk id from grid coordinates.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing world coordinates `(x, z)`.
    ///
    /// Floor division, so `-0.5` lands in chunk `-1`.
    #[must_use]
    pub fn from_world(x: f32, z: f32, chunk_size: f32) -> Self {
        Self::new((x / chunk_size).floor() as i32, (z / chunk_size).floor() as i32)
    }

    /// Chunk containing a position. Y is ignored.
    #[must_use]
    pub fn containing(position: Vec3, chunk_size: f32) -> Self {
        Self::from_world(position.x, position.z, chunk_size)
    }

    /// Packs both coordinates into one map key.
    #[must_use]
    pub const fn key(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }

    /// Inverse of [`ChunkId::key`].
    #[must_use]
    pub const fn from_key(key: u64) -> Self {
        Self::new((key >> 32) as u32 as i32, key as u32 as i32)
    }

    /// Chebyshev distance in chunks.
    #[must_use]
    pub fn ring_distance(self, other: Self) -> u32 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }

    /// Adjacent means one coordinate differs by exactly one unit and the other is equal.
    #[must_use]
    pub fn is_adjacent(self, other: Self) -> bool {
        self.x.abs_diff(other.x) + self.z.abs_diff(other.z) == 1
    }

    /// Square of chunks within `radius` rings, row-major, including `self`.
    pub fn neighborhood(self, radius: i32) -> impl Iterator<Item = ChunkId> {
        let radius = radius.max(0);
        (-radius..=radius)
            .flat_map(move |dz| (-radius..=radius).map(move |dx| ChunkId::new(self.x + dx, self.z + dz)))
    }

    /// World-space centre of the chunk at height zero.
    #[must_use]
    pub fn center(self, chunk_size: f32) -> Vec3 {
        Vec3::new(
            (self.x as f32 + 0.5) * chunk_size,
            0.0,
            (self.z as f32 + 0.5) * chunk_size,
        )
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

impl FromStr for ChunkId {
    type Err = ChunkIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ChunkIdParseError(s.to_string());
        let (x, z) = s.split_once(',').ok_or_else(bad)?;
        let x = x.trim().parse().map_err(|_| bad())?;
        let z = z.trim().parse().map_err(|_| bad())?;
        Ok(Self::new(x, z))
    }
}

impl TryFrom<String> for ChunkId {
    type Error = ChunkIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_string()
    }
}

/// Fixed world partition: chunk size plus the square world extent.
///
/// The playable area is `[-world_size/2, world_size/2)` on X and Z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldGrid {
    chunk_size: f32,
    half_extent: f32,
    min_chunk: i32,
    max_chunk: i32,
}

impl WorldGrid {
    /// Creates a grid. `chunk_size` and `world_size` must be positive.
    #[must_use]
    pub fn new(chunk_size: f32, world_size: f32) -> Self {
        let half_extent = world_size / 2.0;
        let min_chunk = (-half_extent / chunk_size).floor() as i32;
        // Last chunk that still has area inside the half-open range.
        let max_chunk = (half_extent / chunk_size).ceil() as i32 - 1;
        Self { chunk_size, half_extent, min_chunk, max_chunk }
    }

    /// Edge length of a chunk.
    #[must_use]
    pub const fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    /// Half of the world edge length.
    #[must_use]
    pub const fn half_extent(&self) -> f32 {
        self.half_extent
    }

    /// Chunks per axis.
    #[must_use]
    pub const fn chunks_per_axis(&self) -> i32 {
        self.max_chunk - self.min_chunk + 1
    }

    /// Chunk containing a position.
    #[must_use]
    pub fn chunk_of(&self, position: Vec3) -> ChunkId {
        ChunkId::containing(position, self.chunk_size)
    }

    /// True when the chunk lies inside the world.
    #[must_use]
    pub fn contains_chunk(&self, id: ChunkId) -> bool {
        (self.min_chunk..=self.max_chunk).contains(&id.x) && (self.min_chunk..=self.max_chunk).contains(&id.z)
    }

    /// True when a position lies inside the world on X and Z.
    #[must_use]
    pub fn contains(&self, position: Vec3) -> bool {
        (-self.half_extent..self.half_extent).contains(&position.x)
            && (-self.half_extent..self.half_extent).contains(&position.z)
    }

    /// Clamps X and Z into the world. Y is untouched.
    #[must_use]
    pub fn clamp(&self, position: Vec3) -> Vec3 {
        // Stay strictly below the open upper edge.
        let max = self.half_extent - self.chunk_size * 1e-4;
        Vec3::new(
            position.x.clamp(-self.half_extent, max),
            position.y,
            position.z.clamp(-self.half_extent, max),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division() {
        assert_eq!(ChunkId::from_world(31.0, 31.0, 64.0), ChunkId::new(0, 0));
        assert_eq!(ChunkId::from_world(64.0, 0.0, 64.0), ChunkId::new(1, 0));
        assert_eq!(ChunkId::from_world(-0.5, -64.0, 64.0), ChunkId::new(-1, -1));
        assert_eq!(ChunkId::from_world(-64.5, 0.0, 64.0), ChunkId::new(-2, 0));
    }

    #[test]
    fn test_small_move_maps_to_same_or_adjacent_chunk() {
        let size = 64.0;
        let mut x = -200.0_f32;
        while x < 200.0 {
            let a = ChunkId::from_world(x, 10.0, size);
            let b = ChunkId::from_world(x + 0.5, 10.0, size);
            assert!(a == b || a.is_adjacent(b), "{a} -> {b}");
            x += 0.37;
        }
    }

    #[test]
    fn test_key_roundtrip_negative() {
        for id in [ChunkId::new(-6, 5), ChunkId::new(i32::MIN, i32::MAX), ChunkId::new(0, -1)] {
            assert_eq!(ChunkId::from_key(id.key()), id);
        }
        assert_ne!(ChunkId::new(0, 1).key(), ChunkId::new(1, 0).key());
    }

    #[test]
    fn test_wire_format() {
        let id = ChunkId::new(-3, 12);
        assert_eq!(id.to_string(), "-3,12");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"-3,12\"");
        assert_eq!(serde_json::from_str::<ChunkId>("\" 4, -2\"").unwrap(), ChunkId::new(4, -2));
        assert!("4".parse::<ChunkId>().is_err());
        assert!("a,b".parse::<ChunkId>().is_err());
        assert!(serde_json::from_str::<ChunkId>("17").is_err());
    }

    #[test]
    fn test_neighborhood_is_five_by_five() {
        let ring: Vec<_> = ChunkId::new(2, 2).neighborhood(2).collect();
        assert_eq!(ring.len(), 25);
        assert!(ring.iter().all(|c| c.ring_distance(ChunkId::new(2, 2)) <= 2));
    }

    #[test]
    fn test_world_bounds() {
        let grid = WorldGrid::new(64.0, 768.0);
        assert_eq!(grid.chunks_per_axis(), 12);
        assert!(grid.contains_chunk(ChunkId::new(-6, 5)));
        assert!(!grid.contains_chunk(ChunkId::new(6, 0)));
        assert!(!grid.contains_chunk(ChunkId::new(0, -7)));

        assert!(grid.contains(Vec3::new(-384.0, 0.0, 383.9)));
        assert!(!grid.contains(Vec3::new(384.0, 0.0, 0.0)));

        let clamped = grid.clamp(Vec3::new(1000.0, 5.0, -1000.0));
        assert!(grid.contains(clamped));
        assert!(grid.contains_chunk(grid.chunk_of(clamped)));
        assert_eq!(clamped.y, 5.0);
    }
}
