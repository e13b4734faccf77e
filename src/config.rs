use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::broadcast::MAX_STREAM_CAPACITY;
use crate::engine::EngineConfig;
use crate::ingest::CameraConfig;
use crate::settings::{PauseMode, Settings};

const DEFAULT_OUTPUT_PATH: &str = "annotations.json";
const DEFAULT_AUTOSAVE_PATH: &str = "autosave_annotations.json";
const DEFAULT_SCREENSHOTS_DIR: &str = "screenshots";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8797";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_STREAM_CAPACITY: usize = 10;
const DEFAULT_HISTORY_CAPACITY: usize = 100;
const DEFAULT_HISTORY_SAMPLE_SECS: u64 = 2;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Deserialize, Default)]
struct AnnotatordConfigFile {
    output: Option<OutputConfigFile>,
    api: Option<ApiConfigFile>,
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    stream: Option<StreamConfigFile>,
    history: Option<HistoryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    path: Option<String>,
    autosave_path: Option<String>,
    screenshots_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    connect_attempts: Option<u32>,
    detector_backend: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f64>,
    iou_threshold: Option<f64>,
    position_threshold: Option<f64>,
    save_interval_secs: Option<u64>,
    pause_mode: Option<PauseMode>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct HistoryConfigFile {
    capacity: Option<usize>,
    sample_secs: Option<u64>,
}

/// Resolved daemon configuration: file values, then env overrides, then
/// validation.
#[derive(Debug, Clone)]
pub struct AnnotatordConfig {
    pub output_path: PathBuf,
    pub autosave_path: PathBuf,
    pub screenshots_dir: PathBuf,
    pub api_addr: String,
    pub source: CameraConfig,
    pub connect_attempts: u32,
    pub detector_backend: String,
    pub settings: Settings,
    pub stream_capacity: usize,
    pub history_capacity: usize,
    pub history_sample_secs: u64,
}

impl AnnotatordConfig {
    /// Load from the JSON file named by `ANNOTATOR_CONFIG` (defaults apply
    /// when unset), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANNOTATOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnnotatordConfigFile) -> Self {
        let output = file.output.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let defaults = Settings::default();

        Self {
            output_path: PathBuf::from(
                output.path.unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string()),
            ),
            autosave_path: PathBuf::from(
                output
                    .autosave_path
                    .unwrap_or_else(|| DEFAULT_AUTOSAVE_PATH.to_string()),
            ),
            screenshots_dir: PathBuf::from(
                output
                    .screenshots_dir
                    .unwrap_or_else(|| DEFAULT_SCREENSHOTS_DIR.to_string()),
            ),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            source: CameraConfig {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
            connect_attempts: source.connect_attempts.unwrap_or(DEFAULT_CONNECT_ATTEMPTS),
            detector_backend: source
                .detector_backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            settings: Settings {
                confidence: detection.confidence.unwrap_or(defaults.confidence),
                iou_threshold: detection.iou_threshold.unwrap_or(defaults.iou_threshold),
                position_threshold: detection
                    .position_threshold
                    .unwrap_or(defaults.position_threshold),
                paused: false,
                save_interval_secs: detection
                    .save_interval_secs
                    .unwrap_or(defaults.save_interval_secs),
                pause_mode: detection.pause_mode.unwrap_or_default(),
            },
            stream_capacity: file
                .stream
                .and_then(|stream| stream.capacity)
                .unwrap_or(DEFAULT_STREAM_CAPACITY),
            history_capacity: file
                .history
                .as_ref()
                .and_then(|history| history.capacity)
                .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            history_sample_secs: file
                .history
                .and_then(|history| history.sample_secs)
                .unwrap_or(DEFAULT_HISTORY_SAMPLE_SECS),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("ANNOTATOR_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("ANNOTATOR_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(path) = std::env::var("ANNOTATOR_OUTPUT") {
            if !path.trim().is_empty() {
                self.output_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("ANNOTATOR_AUTOSAVE") {
            if !path.trim().is_empty() {
                self.autosave_path = PathBuf::from(path);
            }
        }
        if let Ok(dir) = std::env::var("ANNOTATOR_SCREENSHOTS_DIR") {
            if !dir.trim().is_empty() {
                self.screenshots_dir = PathBuf::from(dir);
            }
        }
        if let Ok(interval) = std::env::var("ANNOTATOR_SAVE_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("ANNOTATOR_SAVE_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.settings.save_interval_secs = seconds;
        }
        if let Ok(capacity) = std::env::var("ANNOTATOR_STREAM_CAPACITY") {
            let capacity: usize = capacity
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_STREAM_CAPACITY must be an integer"))?;
            self.stream_capacity = capacity;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.settings.save_interval_secs == 0 {
            return Err(anyhow!("save interval must be greater than zero"));
        }
        if self.stream_capacity == 0 || self.stream_capacity > MAX_STREAM_CAPACITY {
            return Err(anyhow!(
                "stream capacity must be in 1..={}",
                MAX_STREAM_CAPACITY
            ));
        }
        if self.history_capacity == 0 {
            return Err(anyhow!("history capacity must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.settings.confidence) {
            return Err(anyhow!("confidence must be in 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.settings.iou_threshold) {
            return Err(anyhow!("iou_threshold must be in 0..=1"));
        }
        if self.settings.position_threshold <= 0.0 {
            return Err(anyhow!("position_threshold must be positive"));
        }
        if self.output_path == self.autosave_path {
            return Err(anyhow!("output and autosave paths must differ"));
        }
        Ok(())
    }

    /// Engine construction parameters for this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            settings: self.settings,
            stream_capacity: self.stream_capacity,
            history_capacity: self.history_capacity,
            history_sample_secs: self.history_sample_secs,
            output_path: self.output_path.clone(),
            autosave_path: self.autosave_path.clone(),
            screenshots_dir: self.screenshots_dir.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<AnnotatordConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
