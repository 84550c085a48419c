//! Viewer session: wires the cache to a world and scrolls across it.

use anyhow::{bail, Context, Result};
use mapview_cache::file::write_chunk_file;
use mapview_cache::prelude::*;
use mapview_common::{BlockCoord, ChunkKey};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::viewport::Viewport;

/// Time between simulated frames.
const FRAME_TIME: Duration = Duration::from_millis(16);

/// Radius, in chunks, of the generated demo world.
const DEMO_RADIUS: i32 = 24;

/// Command line options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    /// World directory (overrides the config file)
    pub world: Option<PathBuf>,
    /// Config file (defaults to the platform config directory)
    pub config: Option<PathBuf>,
    /// Viewport size in pixels
    pub size: (u32, u32),
    /// Number of frames to simulate
    pub frames: u32,
    /// Generate a throwaway world instead of reading one
    pub demo: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            world: None,
            config: None,
            size: (800, 600),
            frames: 120,
            demo: false,
        }
    }
}

impl Args {
    /// Parses `[world-dir] [--config path] [--size WxH] [--frames n] [--demo]`.
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut parsed = Self::default();
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().context("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                },
                "--size" => {
                    let size = iter.next().context("--size needs WxH")?;
                    parsed.size = parse_size(&size)?;
                },
                "--frames" => {
                    let frames = iter.next().context("--frames needs a count")?;
                    parsed.frames = frames.parse().context("invalid frame count")?;
                },
                "--demo" => parsed.demo = true,
                other if other.starts_with("--") => bail!("unknown option {other}"),
                other => parsed.world = Some(PathBuf::from(other)),
            }
        }
        Ok(parsed)
    }
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("size {value} is not WxH"))?;
    Ok((
        w.parse().context("invalid width")?,
        h.parse().context("invalid height")?,
    ))
}

/// Writes a small world of chunks around the origin.
///
/// Every seventh chunk is left out so the viewer also sees blank chunks.
fn generate_demo_world(root: &std::path::Path) -> Result<usize> {
    let mut written = 0;
    for z in -DEMO_RADIUS..=DEMO_RADIUS {
        for x in -DEMO_RADIUS..=DEMO_RADIUS {
            if (x * 31 + z * 17).rem_euclid(7) == 0 {
                continue;
            }
            let depth = (x.unsigned_abs() + z.unsigned_abs()) % MAX_SECTIONS as u32 + 1;
            let sections: Vec<Section> = (0..depth as u8)
                .map(|i| Section::new(i, vec![i ^ (x as u8); 256]))
                .collect();
            write_chunk_file(root, ChunkKey::new(x, z), &sections)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Runs a viewer session.
pub fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::load_from(path),
        None => CacheConfig::load(),
    };
    config.validate();

    // Held until the session ends so the demo world is not deleted early.
    let demo_dir = if args.demo {
        let dir = tempfile::tempdir().context("failed to create demo world directory")?;
        let written = generate_demo_world(dir.path())?;
        info!("Generated demo world with {written} chunks in {}", dir.path().display());
        Some(dir)
    } else {
        None
    };
    if let Some(dir) = &demo_dir {
        config.storage_root = Some(dir.path().to_path_buf());
    } else if let Some(world) = &args.world {
        config.storage_root = Some(world.clone());
    }

    info!("Configuration loaded:");
    info!("  Storage root: {}", config.resolved_storage_root().display());
    info!("  Worker threads: {}", config.resolved_worker_threads());
    info!("  Viewport: {}x{}", args.size.0, args.size.1);

    let pool = Arc::new(WorkerPool::new(config.resolved_worker_threads())?);
    let (cache, events) =
        ChunkCacheController::new(&config, Arc::new(DirectoryLoader), pool, &SystemMemory);
    let budget = cache.adapt_cache_to_window(args.size.0, args.size.1);
    info!(budget, ceiling = cache.max_cache(), "Cache sized for viewport");

    let notified = AtomicUsize::new(0);
    let on_loaded = |x: i32, z: i32| {
        debug!(x, z, "Chunk ready");
        notified.fetch_add(1, Ordering::Relaxed);
    };

    let mut viewport = Viewport::centered(BlockCoord::new(0, 0), args.size.0, args.size.1);
    let mut sections_seen = 0usize;
    for frame in 0..args.frames {
        // Scroll east, one block per frame.
        viewport.pan(1, 0);

        let visible = viewport.visible_chunks();
        let mut ready = 0;
        for key in &visible {
            if let Some(chunk) = cache.fetch_key(*key) {
                ready += 1;
                sections_seen += chunk.section_count();
            }
        }
        events.dispatch_pending(&on_loaded);

        if frame % 30 == 0 {
            info!(frame, ready, visible = visible.len(), "Frame");
        }
        std::thread::sleep(FRAME_TIME);
    }

    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        pending = stats.pending_hits,
        loads = stats.loads_completed,
        failures = stats.load_failures,
        evictions = stats.evictions,
        resident = stats.resident,
        notified = notified.load(Ordering::Relaxed),
        sections_seen,
        "Session statistics (hit rate {:.1}%)",
        stats.hit_rate() * 100.0
    );

    cache.clear();
    info!("Cache cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        Args::parse(list.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(args(&[]).expect("parse"), Args::default());
    }

    #[test]
    fn test_parse_all_options() {
        let parsed = args(&[
            "/srv/world",
            "--config",
            "viewer.toml",
            "--size",
            "1920x1080",
            "--frames",
            "5",
            "--demo",
        ])
        .expect("parse");
        assert_eq!(parsed.world, Some(PathBuf::from("/srv/world")));
        assert_eq!(parsed.config, Some(PathBuf::from("viewer.toml")));
        assert_eq!(parsed.size, (1920, 1080));
        assert_eq!(parsed.frames, 5);
        assert!(parsed.demo);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(args(&["--size", "big"]).is_err());
        assert!(args(&["--frames"]).is_err());
        assert!(args(&["--verbose"]).is_err());
    }

    #[test]
    fn test_demo_world_is_loadable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let written = generate_demo_world(dir.path()).expect("generate");
        let side = (2 * DEMO_RADIUS + 1) as usize;
        assert!(written > 0 && written < side * side);

        let sections = DirectoryLoader
            .load(dir.path(), ChunkKey::new(1, 0))
            .expect("stored chunk");
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn test_short_demo_session() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config_path = dir.path().join("mapview.toml");
        CacheConfig {
            worker_threads: 2,
            ..CacheConfig::default()
        }
        .save_to(&config_path)
        .expect("save config");

        run(Args {
            config: Some(config_path),
            size: (64, 64),
            frames: 3,
            demo: true,
            ..Args::default()
        })
        .expect("session");
    }
}
