//! Loader boundary and the background job that fills a placeholder.

use mapview_common::{ChunkKey, LoadError, LoadResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::chunk::{Chunk, Section};
use crate::controller::Shared;

/// Reads and parses stored chunk data.
///
/// Implementations report failures through [`LoadError`]; the job turns
/// every failure into a loaded, blank chunk.
pub trait ChunkLoader: Send + Sync {
    /// Loads the sections of chunk `key` from the storage `root`.
    fn load(&self, root: &Path, key: ChunkKey) -> LoadResult<Vec<Section>>;
}

impl<F> ChunkLoader for F
where
    F: Fn(&Path, ChunkKey) -> LoadResult<Vec<Section>> + Send + Sync,
{
    fn load(&self, root: &Path, key: ChunkKey) -> LoadResult<Vec<Section>> {
        self(root, key)
    }
}

/// How a load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    /// Loader returned sections
    Loaded,
    /// No stored data for the chunk
    Missing,
    /// Loader failed or panicked
    Failed,
}

/// Populates one placeholder chunk in the background.
pub(crate) struct LoadJob {
    key: ChunkKey,
    root: PathBuf,
    target: Arc<Chunk>,
    loader: Arc<dyn ChunkLoader>,
    shared: Arc<Shared>,
}

impl LoadJob {
    pub(crate) fn new(
        key: ChunkKey,
        root: PathBuf,
        target: Arc<Chunk>,
        loader: Arc<dyn ChunkLoader>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            key,
            root,
            target,
            loader,
            shared,
        }
    }

    /// Runs the loader outside the lock, then hands the result to the cache.
    pub(crate) fn run(self) {
        let started = Instant::now();
        let key = self.key;

        let result = catch_unwind(AssertUnwindSafe(|| self.loader.load(&self.root, key)));
        let (sections, outcome) = match result {
            Ok(Ok(sections)) => (sections, LoadOutcome::Loaded),
            Ok(Err(LoadError::NotFound { .. })) => {
                debug!(chunk = %key, "No stored data, using blank chunk");
                (Vec::new(), LoadOutcome::Missing)
            },
            Ok(Err(e)) => {
                warn!(chunk = %key, error = %e, "Chunk load failed, using blank chunk");
                (Vec::new(), LoadOutcome::Failed)
            },
            Err(_) => {
                error!(chunk = %key, "Chunk loader panicked, using blank chunk");
                (Vec::new(), LoadOutcome::Failed)
            },
        };

        let section_count = sections.len();
        self.shared.complete(key, &self.target, sections, outcome);
        debug!(
            chunk = %key,
            sections = section_count,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Chunk load finished"
        );
    }
}
