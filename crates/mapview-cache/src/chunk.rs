//! Chunk records and the read-only views handed to callers.

use mapview_common::ChunkKey;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Maximum number of sections a chunk can hold.
pub const MAX_SECTIONS: usize = 16;

/// A vertical slice of a chunk's payload.
///
/// The payload is opaque to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Position of the section within its chunk (0..16)
    pub index: u8,
    /// Raw section data
    pub payload: Box<[u8]>,
}

impl Section {
    /// Creates a new section.
    #[must_use]
    pub fn new(index: u8, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A cached chunk.
///
/// Created unloaded as a placeholder when a miss is recorded, then filled
/// exactly once by its load job. A failed load fills it with no sections.
#[derive(Debug)]
pub struct Chunk {
    /// Chunk coordinate
    key: ChunkKey,
    /// Section data, set once by the load job
    sections: OnceLock<Box<[Section]>>,
}

impl Chunk {
    /// Creates an unloaded placeholder.
    #[must_use]
    pub fn placeholder(key: ChunkKey) -> Self {
        Self {
            key,
            sections: OnceLock::new(),
        }
    }

    /// Returns the chunk coordinate.
    #[must_use]
    pub const fn key(&self) -> ChunkKey {
        self.key
    }

    /// Returns whether the load job has finished with this chunk.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.sections.get().is_some()
    }

    /// Returns the loaded sections, or an empty slice while unloaded.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        match self.sections.get() {
            Some(sections) => &sections[..],
            None => &[],
        }
    }

    /// Returns the number of loaded sections.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections().len()
    }

    /// Returns whether the chunk finished loading without any content.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.is_loaded() && self.sections().is_empty()
    }

    /// Fills the chunk and marks it loaded.
    ///
    /// Sections with an index outside `0..MAX_SECTIONS`, or repeating an
    /// index already seen, are dropped. Returns `false` if the chunk was
    /// already filled; the new sections are discarded in that case.
    pub(crate) fn fill(&self, mut sections: Vec<Section>) -> bool {
        let mut seen = [false; MAX_SECTIONS];
        let before = sections.len();
        sections.retain(|section| {
            let slot = usize::from(section.index);
            slot < MAX_SECTIONS && !std::mem::replace(&mut seen[slot], true)
        });
        if sections.len() != before {
            warn!(
                chunk = %self.key,
                dropped = before - sections.len(),
                "Loader returned out-of-range or duplicate sections, dropping them"
            );
        }
        self.sections.set(sections.into_boxed_slice()).is_ok()
    }
}

/// Read-only handle to a loaded chunk.
///
/// The handle shares ownership with the cache, so it stays valid after the
/// entry is evicted or the cache is cleared.
#[derive(Debug, Clone)]
pub struct ChunkView(Arc<Chunk>);

impl ChunkView {
    pub(crate) fn new(chunk: Arc<Chunk>) -> Self {
        Self(chunk)
    }

    /// Returns whether two views refer to the same cached chunk.
    #[must_use]
    pub fn same_chunk(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ChunkView {
    type Target = Chunk;

    fn deref(&self) -> &Chunk {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_unloaded() {
        let chunk = Chunk::placeholder(ChunkKey::new(1, 2));
        assert_eq!(chunk.key(), ChunkKey::new(1, 2));
        assert!(!chunk.is_loaded());
        assert!(!chunk.is_blank());
        assert!(chunk.sections().is_empty());
    }

    #[test]
    fn test_fill_once() {
        let chunk = Chunk::placeholder(ChunkKey::new(0, 0));
        assert!(chunk.fill(vec![Section::new(0, vec![1, 2, 3])]));
        assert!(chunk.is_loaded());
        assert_eq!(chunk.section_count(), 1);

        assert!(!chunk.fill(Vec::new()));
        assert_eq!(chunk.sections()[0].payload.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_empty_fill_is_blank() {
        let chunk = Chunk::placeholder(ChunkKey::new(0, 0));
        assert!(chunk.fill(Vec::new()));
        assert!(chunk.is_loaded());
        assert!(chunk.is_blank());
    }

    #[test]
    fn test_fill_drops_out_of_range_sections() {
        let chunk = Chunk::placeholder(ChunkKey::new(0, 0));
        let sections = (0..20u8).map(|i| Section::new(i, vec![i])).collect();
        assert!(chunk.fill(sections));
        assert_eq!(chunk.section_count(), MAX_SECTIONS);
        assert!(chunk
            .sections()
            .iter()
            .all(|s| usize::from(s.index) < MAX_SECTIONS));
    }

    #[test]
    fn test_fill_keeps_first_of_duplicate_index() {
        let chunk = Chunk::placeholder(ChunkKey::new(0, 0));
        assert!(chunk.fill(vec![
            Section::new(3, vec![1]),
            Section::new(200, vec![2]),
            Section::new(3, vec![3]),
            Section::new(5, vec![4]),
        ]));
        let kept: Vec<(u8, u8)> = chunk
            .sections()
            .iter()
            .map(|s| (s.index, s.payload[0]))
            .collect();
        assert_eq!(kept, vec![(3, 1), (5, 4)]);
    }

    #[test]
    fn test_view_shares_chunk() {
        let chunk = Arc::new(Chunk::placeholder(ChunkKey::new(4, 4)));
        let a = ChunkView::new(Arc::clone(&chunk));
        let b = a.clone();
        assert!(a.same_chunk(&b));
        drop(chunk);
        assert_eq!(b.key(), ChunkKey::new(4, 4));
    }
}
