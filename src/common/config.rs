//! # Configuration Utilities
//!
//! Shared configuration structures and parsing utilities used by both
//! coordinator and worker binaries. Every field carries a default so a
//! node can start from an empty or partial TOML file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

use super::protocol::{DEFAULT_PORT, DISCOVERY_PORT, DOWNLOAD_PORT};

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Complete coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerInfo,
    pub processing: ProcessingConfig,
    pub network: NetworkConfig,
}

/// Identity and storage paths for the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Frame-source name agreed with workers during handshake
    pub name: String,
    /// Directory holding the sequential input frames
    pub frame_dir: String,
    /// Directory delta frames and the provenance map are written to
    pub delta_dir: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "difframe-project".to_string(),
            frame_dir: "frames".to_string(),
            delta_dir: "frame_deltas".to_string(),
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client: ClientInfo,
    pub processing: ProcessingConfig,
    pub network: NetworkConfig,
}

/// Worker identity and optional local frame copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    /// Node name reported to the coordinator; a random one is generated
    /// when left empty
    pub name: Option<String>,
    /// Local copy of the frame directory; when absent the worker downloads
    /// frames from the coordinator on demand
    pub frame_dir: Option<String>,
}

/// Detection and assembly parameters.
///
/// Both node roles carry this section. On a worker the threshold and
/// mini-batch values are placeholders until the handshake overwrites them
/// with the coordinator's.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Similarity score at or below which a block is flagged as changed.
    /// Lower scores mean more different.
    pub similarity_threshold: f64,
    /// Multiplier for the parallel delta-frame flush batch
    pub mini_batch_size: usize,
    /// Grid cells per reduced-aspect-ratio unit. The handshake does not
    /// carry this value, so it must agree across every node of a session
    /// for block coordinates to address the same pixels everywhere.
    pub grid_density: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 34.50,
            mini_batch_size: 2,
            grid_density: 2,
        }
    }
}

/// Ports shared by both node roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Coordinator dispatch listener port
    pub port: u16,
    /// UDP discovery port
    pub discovery_port: u16,
    /// On-demand frame download port
    pub download_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            discovery_port: DISCOVERY_PORT,
            download_port: DOWNLOAD_PORT,
        }
    }
}
