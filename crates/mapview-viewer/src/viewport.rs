//! The visible map area, one pixel per block.

use mapview_common::{BlockCoord, ChunkKey};

/// A window onto the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Block at the top-left pixel
    pub origin: BlockCoord,
    /// Width in pixels
    pub width_px: u32,
    /// Height in pixels
    pub height_px: u32,
}

impl Viewport {
    /// Creates a viewport centred on `center`.
    #[must_use]
    pub fn centered(center: BlockCoord, width_px: u32, height_px: u32) -> Self {
        Self {
            origin: BlockCoord::new(
                center.x - i64::from(width_px / 2),
                center.z - i64::from(height_px / 2),
            ),
            width_px,
            height_px,
        }
    }

    /// Scrolls by the given number of blocks.
    pub fn pan(&mut self, dx: i64, dz: i64) {
        self.origin.x += dx;
        self.origin.z += dz;
    }

    /// Chunks touched by the viewport, row by row.
    #[must_use]
    pub fn visible_chunks(&self) -> Vec<ChunkKey> {
        if self.width_px == 0 || self.height_px == 0 {
            return Vec::new();
        }
        let first = self.origin.to_chunk_key();
        let last = BlockCoord::new(
            self.origin.x + i64::from(self.width_px) - 1,
            self.origin.z + i64::from(self.height_px) - 1,
        )
        .to_chunk_key();

        (first.z..=last.z)
            .flat_map(|z| (first.x..=last.x).map(move |x| ChunkKey::new(x, z)))
            .collect()
    }
}
