//! # Coordinator Binary Entry Point
//!
//! Thin wrapper that loads configuration and runs the difframe coordinator.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/server.toml
//! ```
//!
//! Without a config file every setting starts from its default, and single
//! settings can be overridden on the command line:
//!
//! ```bash
//! cargo run --bin server -- --frame-dir ./frames --threshold 30.0
//! ```
//!
//! The coordinator will:
//! 1. Load the frame sequence and derive the block grid
//! 2. Answer UDP discovery probes from workers
//! 3. Hand out frame ranges to connecting workers
//! 4. Serve frame downloads to workers without a local frame copy
//! 5. Assemble completed delta frames and export the provenance map

use clap::Parser;

// Import from the library crate
use difframe::common::config::{load_config, ServerConfig};
use difframe::common::logging::init_logger;
use difframe::server::Coordinator;

/// Command-line arguments for the coordinator binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the coordinator configuration file (TOML format)
    ///
    /// Example: config/server.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Directory holding the sequential input frames
    #[arg(long)]
    frame_dir: Option<String>,

    /// Directory delta frames and the provenance map are written to
    #[arg(long)]
    delta_dir: Option<String>,

    /// Similarity score at or below which a block is flagged as changed
    #[arg(long)]
    threshold: Option<f64>,

    /// Dispatch listener port
    #[arg(long)]
    port: Option<u16>,

    /// Run the whole pipeline locally without any workers
    #[arg(long)]
    standalone: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logger();

    // Parse command-line arguments
    let args = Args::parse();

    // Load coordinator configuration, falling back to defaults without a file
    let mut config: ServerConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    // Command-line overrides take precedence over the file
    if let Some(frame_dir) = args.frame_dir {
        config.server.frame_dir = frame_dir;
    }
    if let Some(delta_dir) = args.delta_dir {
        config.server.delta_dir = delta_dir;
    }
    if let Some(threshold) = args.threshold {
        config.processing.similarity_threshold = threshold;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }

    let coordinator = Coordinator::new(config)?;

    if args.standalone {
        // Detect and assemble locally, then exit
        coordinator.run_standalone().await?;
    } else {
        // Serve workers indefinitely until error or shutdown
        coordinator.run().await;
    }

    Ok(())
}
