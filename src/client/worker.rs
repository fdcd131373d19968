//! # Worker Node
//!
//! Finds a coordinator over UDP broadcast, completes the echo handshake,
//! and then scores whatever frame pair ranges it is dispatched until the
//! coordinator releases it.
//!
//! ## Session Workflow
//!
//! 1. **Discover**: broadcast probes until a coordinator answers
//! 2. **Handshake**: echo the session parameters back until accepted, then
//!    adopt them
//! 3. **Dispatch loop**: receive a range, download any frames not held
//!    locally, score the pairs, upload flagged blocks until none remain
//! 4. **Release**: an empty range from the coordinator ends the session
//!
//! Connection failures restart the whole workflow, discovery included,
//! under a bounded retry policy with jittered delays.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::sleep;
use uuid::Uuid;

use crate::common::config::ClientConfig;
use crate::common::protocol::{
    HandshakeReply, ProtocolError, RetryPolicy, WIRE_BLOCK_PREFERRED,
};
use crate::common::wire::Connection;
use crate::discovery;
use crate::engine::{DeltaEngine, EngineSettings};

/// Worker state: the engine plus the session identity sent at handshake.
pub struct Worker {
    config: ClientConfig,
    engine: Arc<DeltaEngine>,
    name: String,
    local_copy: bool,
}

impl Worker {
    /// Builds a worker from its configuration.
    ///
    /// With a configured frame directory the worker scores against its own
    /// copy of the source; otherwise frames are pulled from the coordinator
    /// on demand and cached only as long as pairs still need them.
    pub fn new(config: ClientConfig) -> Self {
        let name = config
            .client
            .name
            .clone()
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

        // Threshold and mini-batch are handshake-adopted later; density has
        // to come up matching the coordinator's already.
        let engine = Arc::new(DeltaEngine::new(
            PathBuf::from("frame_deltas"),
            EngineSettings::from(config.processing),
        ));

        let local_copy = match config.client.frame_dir.as_deref() {
            Some(dir) => match engine.load_frame_dir(Path::new(dir)) {
                Ok(count) => {
                    info!("📂 Worker holds a local copy with {} frames", count);
                    true
                }
                Err(e) => {
                    warn!(
                        "⚠️ Local frame copy unavailable ({}), frames will be downloaded",
                        e
                    );
                    engine.enable_remote_source();
                    false
                }
            },
            None => {
                engine.enable_remote_source();
                false
            }
        };

        Self {
            config,
            engine,
            name,
            local_copy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Works for a coordinator until released.
    ///
    /// Each attempt runs the full workflow from discovery onward. A clean
    /// release ends the worker; failures are retried with a jittered delay
    /// up to the policy's attempt cap.
    pub async fn run(&self) -> Result<()> {
        let policy = RetryPolicy::connection();

        for attempt in policy.attempts() {
            if attempt > 1 {
                let jitter = rand::thread_rng().gen_range(100..500);
                let delay = Duration::from_millis(policy.backoff_ms + jitter);
                info!(
                    "🔄 Retry attempt {}/{} in {:?}",
                    attempt, policy.max_attempts, delay
                );
                sleep(delay).await;
            }

            match self.work_session().await {
                Ok(()) => {
                    info!("✅ {} released by coordinator, work complete", self.name);
                    return Ok(());
                }
                Err(e) => warn!(
                    "⚠️ Session attempt {}/{} failed: {}",
                    attempt, policy.max_attempts, e
                ),
            }
        }

        bail!("Gave up after {} connection attempts", policy.max_attempts)
    }

    async fn work_session(&self) -> Result<()> {
        let coordinator_ip =
            discovery::find_coordinator(self.config.network.discovery_port).await?;

        let address = format!("{}:{}", coordinator_ip, self.config.network.port);
        let socket = TcpStream::connect(&address)
            .await
            .with_context(|| format!("Failed to connect to coordinator at {}", address))?;
        info!("🔗 Connected to coordinator at {}", address);

        let mut conn = Connection::new(socket);
        let (threshold, mini_batch) = self.handshake(&mut conn).await?;
        self.engine.apply_remote_settings(threshold, mini_batch);
        info!("🤝 Initiated with coordinator as {}", self.name);

        self.process_dispatches(&mut conn, coordinator_ip).await
    }

    /// Echo handshake, worker side.
    ///
    /// Echoes the project name, threshold, and mini-batch size back
    /// verbatim each round. An `OK` verdict means both sides saw identical
    /// values; the worker then identifies itself and adopts the settings.
    async fn handshake(&self, conn: &mut Connection) -> Result<(f64, usize)> {
        let policy = RetryPolicy::handshake();

        for _ in policy.attempts() {
            let project = conn.recv_string().await?;
            conn.send_string(&project).await?;

            let threshold = conn.recv_double().await?;
            conn.send_double(threshold).await?;

            let mini_batch = conn.recv_int().await?;
            conn.send_int(mini_batch).await?;

            let verdict = HandshakeReply::parse(&conn.recv_string().await?)?;
            if verdict == HandshakeReply::Ok {
                conn.send_string(&self.name).await?;
                let mini_batch =
                    usize::try_from(mini_batch).context("Negative mini-batch size offered")?;
                return Ok((threshold, mini_batch));
            }
            debug!("⚠️ Coordinator rejected the handshake round, retrying");
        }

        Err(ProtocolError::HandshakeExhausted {
            attempts: policy.max_attempts,
        }
        .into())
    }

    /// Receives ranges until the coordinator sends the empty one.
    async fn process_dispatches(
        &self,
        conn: &mut Connection,
        coordinator_ip: IpAddr,
    ) -> Result<()> {
        loop {
            let range = match conn.recv_int_collection().await? {
                Some(range) => range,
                None => {
                    debug!("📭 Coordinator has no frames left");
                    return Ok(());
                }
            };

            let mut indices = Vec::with_capacity(range.len());
            for value in range {
                indices.push(usize::try_from(value).context("Negative frame index dispatched")?);
            }
            debug!("📥 Received {} pair indices", indices.len());

            if !self.local_copy {
                let missing = self.engine.missing_frames(&indices);
                if !missing.is_empty() {
                    self.download_frames(coordinator_ip, &missing).await?;
                }
            }

            let engine = self.engine.clone();
            let batch = indices.clone();
            let processed =
                tokio::task::spawn_blocking(move || engine.detect_range(&batch)).await?;
            debug!("🔍 Scored {} of {} pairs", processed, indices.len());

            self.upload_flagged_blocks(conn).await?;
        }
    }

    /// Ships every flagged block, then the empty collection the coordinator
    /// reads as end-of-results.
    async fn upload_flagged_blocks(&self, conn: &mut Connection) -> Result<()> {
        loop {
            let blocks = self.engine.extract_flagged_blocks(WIRE_BLOCK_PREFERRED);
            if blocks.is_empty() {
                conn.send_int_collection(&[]).await?;
                return Ok(());
            }
            debug!("📤 Uploading {} flagged blocks", blocks.len() / 3);
            conn.send_int_collection(&blocks).await?;
        }
    }

    /// Pulls missing frames over the download channel, one batch per
    /// connection, and feeds them into the engine's cache.
    async fn download_frames(&self, coordinator_ip: IpAddr, indices: &[usize]) -> Result<()> {
        let address = format!(
            "{}:{}",
            coordinator_ip, self.config.network.download_port
        );
        let socket = TcpStream::connect(&address)
            .await
            .with_context(|| format!("Failed to reach download listener at {}", address))?;
        let mut conn = Connection::new(socket);

        conn.send_int(indices.len() as i32).await?;
        for &index in indices {
            conn.send_int(index as i32).await?;
            let bytes = conn.recv_bytes().await?;
            self.engine.ingest_downloaded_frame(index, &bytes)?;
        }

        info!("📡 Downloaded {} frames from coordinator", indices.len());
        Ok(())
    }
}

// ===== Tests =====
