//! annotatord - frame annotation daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured camera source
//! 2. Runs the selected detection backend on each frame
//! 3. Appends frames with significant changes to the in-memory session
//! 4. Autosaves the session on the configured interval
//! 5. Serves the HTTP control surface until shutdown

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use annotator_kernel::{
    api::{ApiConfig, ApiServer},
    config::AnnotatordConfig,
    detect::{BackendRegistry, StubBackend},
    ingest::CameraSource,
    settings::PauseMode,
    AnnotatorEngine,
};

const CONNECT_BACKOFF: Duration = Duration::from_secs(1);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AnnotatordConfig::load()?;
    log::info!(
        "annotatord {} starting, source={} backend={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.detector_backend
    );

    let engine = Arc::new(AnnotatorEngine::new(cfg.engine_config())?);

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, engine.clone()).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let ctrlc_engine = engine.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        ctrlc_engine.begin_shutdown();
    })?;

    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    registry.set_default(&cfg.detector_backend).map_err(|_| {
        anyhow!(
            "detector backend '{}' not available (have: {:?})",
            cfg.detector_backend,
            registry.list()
        )
    })?;

    let mut source = CameraSource::new(cfg.source.clone())?;
    source.connect_with_retries(cfg.connect_attempts, CONNECT_BACKOFF)?;

    engine.mark_running()?;
    log::info!(
        "annotatord running. autosave every {}s to {}",
        engine.settings()?.save_interval_secs,
        cfg.autosave_path.display()
    );

    let frame_interval = source.frame_interval();
    let mut last_health_log = Instant::now();

    while !engine.should_stop() {
        let loop_start = Instant::now();

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame capture failed: {}", e);
                source.connect_with_retries(cfg.connect_attempts, CONNECT_BACKOFF)?;
                continue;
            }
        };

        let settings = engine.settings()?;
        let raw = if settings.paused && settings.pause_mode == PauseMode::SkipDetection {
            Vec::new()
        } else {
            match registry.detect_with(&cfg.detector_backend, &frame.data, frame.width, frame.height)
            {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("detection failed on frame {}: {}", frame.frame_number, e);
                    Vec::new()
                }
            }
        };

        let outcome = engine.process_frame(&frame, &raw)?;
        if let Some(saved_index) = outcome.saved_index {
            log::info!(
                "saved frame #{} ({} objects) as index {}",
                frame.frame_number,
                outcome.object_count,
                saved_index
            );
        }

        // Autosave failures are logged inside the engine and must not stop capture.
        engine.maybe_autosave()?;

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = source.stats();
            let session_stats = engine.stats()?;
            log::info!(
                "camera health={} frames={} saved={} fps={:.1}",
                source.is_healthy(),
                stats.frames_captured,
                session_stats.saved_frames,
                session_stats.fps
            );
            last_health_log = Instant::now();
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }

    log::info!("finalizing session");
    engine.finalize()?;
    api_handle.stop()?;
    log::info!("annotatord stopped. output: {}", cfg.output_path.display());
    Ok(())
}
