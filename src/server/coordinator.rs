//! # Coordinator Node
//!
//! Owns the delta pipeline for one clip and farms frame-pair scoring out to
//! worker nodes over the LAN.
//!
//! ## Core Responsibilities
//!
//! ### 1. Worker Sessions
//! - Accepts TCP connections on the dispatch port
//! - Runs the echo handshake until both sides agree on the session
//!   parameters (project name, similarity threshold, mini-batch size)
//! - Hands each worker ranges of frame pair indices and ingests the
//!   flagged blocks it sends back
//!
//! ### 2. Discovery
//! - Answers UDP broadcast probes so workers can find the coordinator
//!   without configuration
//!
//! ### 3. Frame Downloads
//! - Serves encoded frames on a separate listener to workers that have no
//!   local copy of the source
//!
//! ### 4. Delta Assembly
//! - Periodically drains full batches of flagged blocks into delta-frame
//!   mosaics on a blocking thread, and exports the provenance log
//!
//! Every inbound connection gets its own task; the work queue and the
//! engine are the only state shared between sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};

use crate::common::config::ServerConfig;
use crate::common::protocol::{
    HandshakeReply, ProtocolError, RetryPolicy, DISPATCH_RANGE_LIMIT,
};
use crate::common::wire::Connection;
use crate::discovery;
use crate::engine::{DeltaEngine, EngineSettings};
use crate::server::queue::WorkQueue;

/// Seconds between assembly passes over the pending block queue.
const ASSEMBLY_INTERVAL_SECS: u64 = 5;

/// Coordinator state shared across its listener and session tasks.
pub struct Coordinator {
    config: ServerConfig,
    engine: Arc<DeltaEngine>,
    queue: Arc<WorkQueue>,
}

impl Coordinator {
    /// Prepares the pipeline: binds the engine to the configured frame
    /// directory, derives the grid, and seeds the dispatch queue with every
    /// frame pair.
    ///
    /// A missing or empty frame source is not fatal. The coordinator comes
    /// up with an empty queue and releases workers immediately, matching
    /// the degraded 1x1-grid behavior of the engine.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let settings = EngineSettings::from(config.processing);

        let delta_dir = PathBuf::from(&config.server.delta_dir);
        std::fs::create_dir_all(&delta_dir).with_context(|| {
            format!("Failed to create delta directory {}", delta_dir.display())
        })?;

        let engine = Arc::new(DeltaEngine::new(delta_dir, settings));
        match engine.load_frame_dir(Path::new(&config.server.frame_dir)) {
            Ok(count) => debug!("🎞️ Frame source holds {} frames", count),
            Err(e) => warn!("⚠️ Frame source unavailable: {}", e),
        }

        let queue = match engine.last_frame_index() {
            Some(last) if last > 0 => Arc::new(WorkQueue::for_sequence(last)),
            _ => Arc::new(WorkQueue::new()),
        };
        info!(
            "🎬 Project {} ready: {} frame pairs queued",
            config.server.name,
            queue.len()
        );

        Ok(Self {
            config,
            engine,
            queue,
        })
    }

    /// Runs all coordinator tasks until one of them dies.
    pub async fn run(&self) {
        info!(
            "🚀 Coordinator starting on port {}",
            self.config.network.port
        );

        let dispatch_task = self.start_dispatch_listener();
        let discovery_task = self.start_discovery_responder();
        let download_task = self.start_download_listener();
        let assembly_task = self.run_assembly_ticker();

        // Run all tasks concurrently - if any terminates, log an error
        tokio::select! {
            _ = dispatch_task => error!("❌ Dispatch listener terminated"),
            _ = discovery_task => error!("❌ Discovery responder terminated"),
            _ = download_task => error!("❌ Download listener terminated"),
            _ = assembly_task => error!("❌ Assembly task terminated"),
        }
    }

    /// Runs the whole pipeline locally with no workers involved: scores
    /// every pair, assembles all full batches, and exports provenance.
    pub async fn run_standalone(&self) -> Result<()> {
        info!("🚀 Standalone pass over {} frame pairs", self.queue.len());

        let engine = self.engine.clone();
        let (processed, written) = tokio::task::spawn_blocking(move || -> Result<(usize, usize)> {
            let processed = engine.detect_all();
            let written = engine.drain_ready_delta_frames()?;
            Self::export_provenance(&engine)?;
            Ok((processed, written))
        })
        .await??;

        let leftover = self.engine.pending_blocks();
        if leftover > 0 {
            info!("📦 {} flagged blocks below a full batch left pending", leftover);
        }

        info!(
            "✅ Standalone pass complete: {} pairs scored, {} delta frames written",
            processed, written
        );
        Ok(())
    }

    // ========================================================================
    // TASK 1: Dispatch listener - worker sessions
    // ========================================================================

    async fn start_dispatch_listener(&self) {
        let address = format!("0.0.0.0:{}", self.config.network.port);
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ Failed to bind dispatch listener on {}: {}", address, e);
                return;
            }
        };
        info!("📡 Dispatch listener on {}", address);

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    debug!("🔗 Worker connection from {}", addr);

                    let coordinator = self.clone_arc();
                    tokio::spawn(async move {
                        if let Err(e) = coordinator.handle_worker_session(socket).await {
                            error!("❌ Worker session from {} ended with error: {}", addr, e);
                        }
                        debug!("🔌 Worker connection from {} closed", addr);
                    });
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    async fn handle_worker_session(&self, socket: TcpStream) -> Result<()> {
        let mut conn = Connection::new(socket);
        let worker_name = self.handshake(&mut conn).await?;
        info!("🤝 Worker {} completed initiation handshake", worker_name);
        self.dispatch_loop(&mut conn, &worker_name).await
    }

    /// Echo handshake, coordinator side.
    ///
    /// Sends the project name, similarity threshold, and mini-batch size,
    /// reading an echo after each. All three echoes are evaluated before
    /// the verdict: a full match gets `OK` and the worker's name back, any
    /// mismatch gets `FAIL` and another attempt, up to the retry cap.
    async fn handshake(&self, conn: &mut Connection) -> Result<String> {
        let settings = self.engine.settings();
        let policy = RetryPolicy::handshake();

        for attempt in policy.attempts() {
            let mut mismatch = false;

            conn.send_string(&self.config.server.name).await?;
            let name_echo = conn.recv_string().await?;
            if name_echo != self.config.server.name {
                mismatch = true;
            }

            // The decimal string framing round-trips f64 exactly, so the
            // echo must come back bit-identical.
            conn.send_double(settings.similarity_threshold).await?;
            let threshold_echo = conn.recv_double().await?;
            if threshold_echo != settings.similarity_threshold {
                mismatch = true;
            }

            conn.send_int(settings.mini_batch_size as i32).await?;
            let batch_echo = conn.recv_int().await?;
            if batch_echo != settings.mini_batch_size as i32 {
                mismatch = true;
            }

            if mismatch {
                debug!("⚠️ Handshake attempt {} mismatched, retrying", attempt);
                conn.send_string(HandshakeReply::Fail.as_str()).await?;
                continue;
            }

            conn.send_string(HandshakeReply::Ok.as_str()).await?;
            return conn.recv_string().await;
        }

        Err(ProtocolError::HandshakeExhausted {
            attempts: policy.max_attempts,
        }
        .into())
    }

    /// Feeds the worker ranges until the queue runs dry, ingesting flagged
    /// blocks between dispatches. A dead session puts its range back.
    async fn dispatch_loop(&self, conn: &mut Connection, worker_name: &str) -> Result<()> {
        loop {
            let range = self.queue.pop_range(DISPATCH_RANGE_LIMIT);
            if range.is_empty() {
                conn.send_int_collection(&[]).await?;
                info!("✅ No frames left to process, releasing worker {}", worker_name);
                return Ok(());
            }

            debug!(
                "📤 Dispatching {} pairs starting at {} to {}",
                range.len(),
                range[0],
                worker_name
            );

            if let Err(e) = self.exchange_range(conn, &range).await {
                self.queue.requeue(&range);
                warn!(
                    "🔁 Requeued {} pairs after losing worker {}",
                    range.len(),
                    worker_name
                );
                return Err(e);
            }
        }
    }

    async fn exchange_range(&self, conn: &mut Connection, range: &[usize]) -> Result<()> {
        let wire_range: Vec<i32> = range.iter().map(|&index| index as i32).collect();
        conn.send_int_collection(&wire_range).await?;

        // Flagged-block uploads keep coming until the worker sends the
        // empty terminator collection.
        loop {
            match conn.recv_int_collection().await? {
                Some(values) => {
                    let queued = self.engine.ingest_flagged_triples(&values)?;
                    debug!("📥 Received {} flagged blocks", queued);
                }
                None => return Ok(()),
            }
        }
    }

    // ========================================================================
    // TASK 2: Discovery responder
    // ========================================================================

    async fn start_discovery_responder(&self) {
        if let Err(e) = discovery::respond_to_probes(self.config.network.discovery_port).await {
            error!("❌ Discovery responder failed: {}", e);
        }
    }

    // ========================================================================
    // TASK 3: Frame download listener
    // ========================================================================

    async fn start_download_listener(&self) {
        let address = format!("0.0.0.0:{}", self.config.network.download_port);
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ Failed to bind download listener on {}: {}", address, e);
                return;
            }
        };
        info!("📡 Frame download listener on {}", address);

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    debug!("🔗 Download request from {}", addr);

                    let coordinator = self.clone_arc();
                    tokio::spawn(async move {
                        if let Err(e) = coordinator.serve_frame_downloads(socket).await {
                            error!("❌ Download session from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    /// Serves one batch of frame requests: a count, then one index in and
    /// one encoded frame out per request.
    async fn serve_frame_downloads(&self, socket: TcpStream) -> Result<()> {
        let mut conn = Connection::new(socket);

        let count = conn.recv_int().await?;
        if count < 0 {
            bail!("Negative frame request count: {}", count);
        }

        for _ in 0..count {
            let raw = conn.recv_int().await?;
            let index = usize::try_from(raw).context("Negative frame index requested")?;

            let engine = self.engine.clone();
            let bytes =
                tokio::task::spawn_blocking(move || engine.encode_frame(index)).await??;
            conn.send_bytes(&bytes).await?;
        }

        debug!("📤 Served {} frames", count);
        Ok(())
    }

    // ========================================================================
    // TASK 4: Periodic delta assembly
    // ========================================================================

    async fn run_assembly_ticker(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(ASSEMBLY_INTERVAL_SECS));
        loop {
            interval.tick().await;

            let engine = self.engine.clone();
            let drained = tokio::task::spawn_blocking(move || -> Result<usize> {
                let written = engine.drain_ready_delta_frames()?;
                if written > 0 {
                    if let Err(e) = Self::export_provenance(&engine) {
                        warn!("⚠️ Provenance export failed: {}", e);
                    }
                }
                Ok(written)
            })
            .await;

            match drained {
                Ok(Ok(0)) => {}
                Ok(Ok(written)) => info!("🧩 Assembled {} delta frames", written),
                Ok(Err(e)) => error!("❌ Delta assembly failed: {}", e),
                Err(e) => error!("❌ Assembly task panicked: {}", e),
            }
        }
    }

    /// Writes the committed-block map next to the delta frames. Does file
    /// IO, so callers keep it on the blocking pool.
    fn export_provenance(engine: &DeltaEngine) -> Result<()> {
        let path = engine.delta_dir().join("provenance.json");
        let records = engine.export_provenance(&path)?;
        debug!("🧾 Exported {} provenance records", records);
        Ok(())
    }

    /// Create an Arc-wrapped clone of this coordinator.
    ///
    /// Needed because connection tasks outlive the borrow of `self`. All
    /// heavy fields are already behind an Arc, so this is cheap.
    fn clone_arc(&self) -> Arc<Self> {
        Arc::new(Self {
            config: self.config.clone(),
            engine: self.engine.clone(),
            queue: self.queue.clone(),
        })
    }
}

// ===== Tests =====
