//! # Worker Binary Entry Point
//!
//! Thin wrapper that loads configuration and runs a difframe worker.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml
//! ```
//!
//! Without a config file every setting starts from its default; the worker
//! then discovers the coordinator over UDP broadcast and downloads frames
//! on demand. A node with its own copy of the frame sequence skips the
//! downloads:
//!
//! ```bash
//! cargo run --bin client -- --frame-dir ./frames --name render-box
//! ```
//!
//! The worker will:
//! 1. Discover the coordinator over UDP broadcast
//! 2. Negotiate project name, threshold, and mini-batch size
//! 3. Fetch dispatched frame ranges and detect changed blocks
//! 4. Upload flagged blocks until released by the coordinator
//! 5. Retry the whole session with jittered backoff on failure

use clap::Parser;

// Import from the library crate
use difframe::client::Worker;
use difframe::common::config::{load_config, ClientConfig};
use difframe::common::logging::init_logger;

/// Command-line arguments for the worker binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the worker configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Node name reported to the coordinator
    #[arg(long)]
    name: Option<String>,

    /// Local copy of the frame directory (skips downloads)
    #[arg(long)]
    frame_dir: Option<String>,

    /// Coordinator dispatch port
    #[arg(long)]
    port: Option<u16>,

    /// UDP discovery port
    #[arg(long)]
    discovery_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logger();

    // Parse command-line arguments
    let args = Args::parse();

    // Load worker configuration, falling back to defaults without a file
    let mut config: ClientConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    // Command-line overrides take precedence over the file
    if let Some(name) = args.name {
        config.client.name = Some(name);
    }
    if let Some(frame_dir) = args.frame_dir {
        config.client.frame_dir = Some(frame_dir);
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(discovery_port) = args.discovery_port {
        config.network.discovery_port = discovery_port;
    }

    let worker = Worker::new(config);
    worker.run().await
}
