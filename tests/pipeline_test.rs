#[cfg(test)]
mod tests {
    use difframe::common::config::ServerConfig;
    use difframe::engine::{DeltaEngine, EngineSettings};
    use difframe::server::Coordinator;
    use image::{GenericImageView, Rgb, RgbImage};
    use serde_json::Value;
    use tempfile::tempdir;

    #[test]
    fn test_three_frame_scenario_accumulates_then_assembles() {
        let dir = tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir_all(&frames).unwrap();

        // Pair 0-1 differs only in grid cell (0,0); pair 1-2 is identical.
        RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]))
            .save(frames.join("frame_0.png"))
            .unwrap();
        let mut changed = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        for y in 0..5 {
            for x in 0..5 {
                changed.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        changed.save(frames.join("frame_1.png")).unwrap();
        changed.save(frames.join("frame_2.png")).unwrap();

        let deltas = dir.path().join("deltas");
        std::fs::create_dir_all(&deltas).unwrap();
        // Threshold below the score the downscale bleed produces in the
        // neighboring cells (about 28), so only the changed cell flags.
        let settings = EngineSettings {
            similarity_threshold: 20.0,
            ..Default::default()
        };
        let engine = DeltaEngine::new(deltas.clone(), settings);
        engine.load_frame_dir(&frames).unwrap();

        engine.detect_all();
        assert_eq!(engine.pending_blocks(), 1);

        // One block sits below the 4-block batch; nothing assembles yet.
        assert_eq!(engine.drain_ready_delta_frames().unwrap(), 0);
        assert!(!deltas.join("delta_0.jpg").exists());

        // Three more blocks arrive over the wire, as a worker scoring a
        // later differing pair would report them.
        engine
            .ingest_flagged_triples(&[1, 1, 0, 1, 0, 1, 1, 1, 1])
            .unwrap();
        assert_eq!(engine.pending_blocks(), 4);

        assert_eq!(engine.drain_ready_delta_frames().unwrap(), 1);
        assert_eq!(engine.pending_blocks(), 0);
        assert_eq!(engine.committed_blocks(), 4);

        let delta = image::open(deltas.join("delta_0.jpg")).unwrap().to_rgb8();
        assert_eq!(delta.dimensions(), (18, 18));
        // Slot 0 holds the changed cell's new content (dark); slot 1 holds
        // an unchanged white cell from the later pair.
        assert!(delta.get_pixel(4, 4)[0] < 80);
        assert!(delta.get_pixel(13, 4)[0] > 180);
    }

    #[tokio::test]
    async fn test_standalone_pass_writes_delta_and_provenance() {
        let dir = tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir_all(&frames).unwrap();

        // Frame 1 changes every block relative to frame 0; frame 2 repeats
        // frame 1, so the second pair flags nothing.
        RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]))
            .save(frames.join("frame_0.png"))
            .unwrap();
        for name in ["frame_1.png", "frame_2.png"] {
            RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]))
                .save(frames.join(name))
                .unwrap();
        }

        let deltas = dir.path().join("deltas");
        let mut config = ServerConfig::default();
        config.server.frame_dir = frames.to_str().unwrap().to_string();
        config.server.delta_dir = deltas.to_str().unwrap().to_string();

        let coordinator = Coordinator::new(config).unwrap();
        coordinator.run_standalone().await.unwrap();

        // 10x10 frames at density 2 split into a 2x2 grid of 5x5 blocks.
        // The four flagged blocks fill exactly one delta frame, each block
        // padded by 2 pixels per edge.
        let delta = image::open(deltas.join("delta_0.jpg")).unwrap();
        assert_eq!(delta.dimensions(), (18, 18));

        let raw = std::fs::read_to_string(deltas.join("provenance.json")).unwrap();
        let provenance: Value = serde_json::from_str(&raw).unwrap();
        let records = provenance.as_array().unwrap();
        assert_eq!(records.len(), 4);
        for record in records {
            assert_eq!(record["source_frame"], 0);
            assert_eq!(record["delta_index"], 0);
        }

        // Every block landed in its own mosaic cell.
        let mut cells: Vec<(u64, u64)> = records
            .iter()
            .map(|record| {
                (
                    record["delta_col"].as_u64().unwrap(),
                    record["delta_row"].as_u64().unwrap(),
                )
            })
            .collect();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), 4);
    }

    #[tokio::test]
    async fn test_standalone_pass_with_static_clip_writes_nothing() {
        let dir = tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir_all(&frames).unwrap();
        for index in 0..3 {
            RgbImage::from_pixel(10, 10, Rgb([90, 90, 90]))
                .save(frames.join(format!("frame_{}.png", index)))
                .unwrap();
        }

        let deltas = dir.path().join("deltas");
        let mut config = ServerConfig::default();
        config.server.frame_dir = frames.to_str().unwrap().to_string();
        config.server.delta_dir = deltas.to_str().unwrap().to_string();

        let coordinator = Coordinator::new(config).unwrap();
        coordinator.run_standalone().await.unwrap();

        assert!(!deltas.join("delta_0.jpg").exists());
        let raw = std::fs::read_to_string(deltas.join("provenance.json")).unwrap();
        let provenance: Value = serde_json::from_str(&raw).unwrap();
        assert!(provenance.as_array().unwrap().is_empty());
    }
}
