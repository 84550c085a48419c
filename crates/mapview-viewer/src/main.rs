//! # Mapview
//!
//! Headless scrolling map viewer. Drives the chunk cache the way an
//! interactive view would: size it for the window, poll visible chunks
//! every frame, and re-poll when a chunk reports it is ready.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod app;
mod viewport;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("mapview=info".parse()?)
                .add_directive("mapview_cache=info".parse()?),
        )
        .init();

    info!("Mapview starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = app::Args::parse(std::env::args().skip(1))?;
    app::run(args)?;

    info!("Mapview shutdown complete");
    Ok(())
}
