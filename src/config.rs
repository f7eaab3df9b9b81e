use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::dispatch::{DispatchConfig, DEFAULT_DETECT_TIMEOUT, DEFAULT_MIN_CONFIDENCE};
use crate::gate::{GateConfig, DEFAULT_MIN_INTERVAL, DEFAULT_WARM_UP};
use crate::ingest::{
    SourceSettings, DEFAULT_SOURCE_FPS, DEFAULT_SOURCE_HEIGHT, DEFAULT_SOURCE_URL,
    DEFAULT_SOURCE_WIDTH,
};
use crate::overlay::{
    OverlayStyle, DEFAULT_BOX_COLOR, DEFAULT_LABEL_COLOR, DEFAULT_LABEL_SCALE,
    DEFAULT_STROKE_WIDTH,
};
use crate::pipeline::{PipelineOptions, DEFAULT_QUEUE_DEPTH};

const DEFAULT_DETECTOR: &str = "motion";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    gate: Option<GateConfigFile>,
    detector: Option<DetectorConfigFile>,
    overlay: Option<OverlayConfigFile>,
    source: Option<SourceConfigFile>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    min_interval_ms: Option<u64>,
    warm_up_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    timeout_ms: Option<u64>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    stroke_width: Option<u32>,
    label_scale: Option<u32>,
    box_color: Option<[u8; 3]>,
    label_color: Option<[u8; 3]>,
    show_confidence: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub gate: GateConfig,
    /// Registry name of the detector backend.
    pub detector: String,
    pub dispatch: DispatchConfig,
    pub overlay: OverlayStyle,
    pub source: SourceSettings,
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig {
                min_interval: DEFAULT_MIN_INTERVAL,
                warm_up: DEFAULT_WARM_UP,
            },
            detector: DEFAULT_DETECTOR.to_string(),
            dispatch: DispatchConfig {
                timeout: DEFAULT_DETECT_TIMEOUT,
                min_confidence: DEFAULT_MIN_CONFIDENCE,
            },
            overlay: OverlayStyle::default(),
            source: SourceSettings::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl PipelineConfig {
    /// Load from the file named by `PIPELINE_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PIPELINE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            gate: self.gate,
            dispatch: self.dispatch,
            overlay: self.overlay,
            queue_depth: self.queue_depth,
        }
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let gate = file.gate.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let source = file.source.unwrap_or_default();

        Self {
            gate: GateConfig {
                min_interval: gate
                    .min_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_MIN_INTERVAL),
                warm_up: gate
                    .warm_up_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_WARM_UP),
            },
            detector: detector
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            dispatch: DispatchConfig {
                timeout: detector
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_DETECT_TIMEOUT),
                min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            },
            overlay: OverlayStyle {
                stroke_width: overlay.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH),
                label_scale: overlay.label_scale.unwrap_or(DEFAULT_LABEL_SCALE),
                box_color: overlay.box_color.unwrap_or(DEFAULT_BOX_COLOR),
                label_color: overlay.label_color.unwrap_or(DEFAULT_LABEL_COLOR),
                show_confidence: overlay.show_confidence.unwrap_or(false),
            },
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            },
            queue_depth: file.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PIPELINE_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(backend) = std::env::var("PIPELINE_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector = backend.trim().to_string();
            }
        }
        if let Some(ms) = env_u64("PIPELINE_MIN_INTERVAL_MS", "milliseconds")? {
            self.gate.min_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("PIPELINE_WARM_UP_SECS", "seconds")? {
            self.gate.warm_up = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("PIPELINE_DETECT_TIMEOUT_MS", "milliseconds")? {
            self.dispatch.timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source dimensions must be non-zero (got {}x{})",
                self.source.width,
                self.source.height
            ));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.overlay.stroke_width == 0 {
            return Err(anyhow!("overlay stroke_width must be greater than zero"));
        }
        if self.overlay.label_scale == 0 {
            return Err(anyhow!("overlay label_scale must be greater than zero"));
        }
        if self.dispatch.timeout.is_zero() {
            return Err(anyhow!("detector timeout must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.dispatch.min_confidence) {
            return Err(anyhow!(
                "detector min_confidence must be within [0, 1] (got {})",
                self.dispatch.min_confidence
            ));
        }
        if self.queue_depth == 0 {
            return Err(anyhow!("queue_depth must be greater than zero"));
        }
        if self.detector.is_empty() {
            return Err(anyhow!("detector backend name must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_u64(key: &str, unit: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an integer number of {}", key, unit)),
        _ => Ok(None),
    }
}
