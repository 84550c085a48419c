//! Coordinate types for block and chunk positions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Width and depth of a chunk in blocks. Also the viewport granularity
/// used when sizing the cache from a window.
pub const CHUNK_SPAN: u32 = 16;

/// Block coordinate on the horizontal plane (global position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockCoord {
    /// X coordinate in block space
    pub x: i64,
    /// Z coordinate in block space
    pub z: i64,
}

impl BlockCoord {
    /// Creates a new block coordinate.
    #[must_use]
    pub const fn new(x: i64, z: i64) -> Self {
        Self { x, z }
    }

    /// Returns the key of the chunk containing this block.
    #[must_use]
    pub const fn to_chunk_key(self) -> ChunkKey {
        let span = CHUNK_SPAN as i64;
        ChunkKey {
            x: self.x.div_euclid(span) as i32,
            z: self.z.div_euclid(span) as i32,
        }
    }
}

/// Identifies a chunk in the world grid.
///
/// Hashing feeds a single cheap combination of both coordinates to the
/// hasher: `(x << 16) ^ (z & 0xFFFF)`. Collisions are possible for
/// coordinates far apart and are resolved by the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkKey {
    /// X coordinate in chunk space
    pub x: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkKey {
    /// Creates a new chunk key.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Combined hash of both coordinates.
    #[must_use]
    pub const fn hash_code(self) -> u32 {
        ((self.x << 16) ^ (self.z & 0xFFFF)) as u32
    }

    /// Block coordinate of the chunk's north-west corner.
    #[must_use]
    pub const fn block_origin(self) -> BlockCoord {
        BlockCoord {
            x: (self.x as i64) * (CHUNK_SPAN as i64),
            z: (self.z as i64) * (CHUNK_SPAN as i64),
        }
    }
}

impl Hash for ChunkKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

impl From<(i32, i32)> for ChunkKey {
    fn from((x, z): (i32, i32)) -> Self {
        Self::new(x, z)
    }
}
