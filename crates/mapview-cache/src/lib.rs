//! # Mapview Cache
//!
//! Chunk cache for a scrolling map viewer.
//!
//! This crate handles:
//! - Cost-bounded LRU storage of chunks
//! - Background loading with at most one load per chunk
//! - Budget sizing from available memory and the visible viewport
//! - "Chunk loaded" notifications to a listener of the caller's choice

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod budget;
pub mod chunk;
pub mod config;
pub mod controller;
pub mod events;
pub mod executor;
pub mod file;
pub mod job;
pub mod store;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::budget::{CacheBudget, FixedMemory, MemoryProbe, SystemMemory};
    pub use crate::chunk::{Chunk, ChunkView, Section, MAX_SECTIONS};
    pub use crate::config::CacheConfig;
    pub use crate::controller::{CacheStats, ChunkCacheController};
    pub use crate::events::{ChunkEvents, ChunkListener, ChunkLoaded};
    pub use crate::executor::{Executor, InlineExecutor, WorkerPool};
    pub use crate::file::DirectoryLoader;
    pub use crate::job::ChunkLoader;
    pub use crate::store::CacheStore;
}

pub use prelude::*;
