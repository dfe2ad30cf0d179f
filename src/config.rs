use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::camera::CameraConfig;
use crate::estimate::{VolumeUnit, DEFAULT_CAPACITY_ML};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MIN_SCORE: f32 = 0.5;
const DEFAULT_LABELS: &[&str] = &["cup", "wine glass"];
const DEFAULT_GLASS_SHAPE: &str = "Cylinder";
const DEFAULT_CONFIDENCE_TIMEOUT_MS: u64 = 4000;

#[derive(Debug, Deserialize, Default)]
struct GaugeConfigFile {
    capacity_ml: Option<f64>,
    poll_interval_ms: Option<u64>,
    unit: Option<String>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    confidence: Option<ConfidenceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    labels: Option<Vec<String>>,
    min_score: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    user_url: Option<String>,
    environment_url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfidenceConfigFile {
    endpoint: Option<String>,
    glass_shape: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GaugeConfig {
    pub capacity_ml: f64,
    pub poll_interval: Duration,
    pub unit: VolumeUnit,
    pub detector: DetectorSettings,
    pub camera: CameraConfig,
    pub confidence: ConfidenceSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub labels: Vec<String>,
    pub min_score: f32,
}

#[derive(Debug, Clone)]
pub struct ConfidenceSettings {
    /// Reasoning-service endpoint; `None` disables confidence scoring.
    pub endpoint: Option<String>,
    pub glass_shape: String,
    pub timeout: Duration,
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            capacity_ml: DEFAULT_CAPACITY_ML,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            unit: VolumeUnit::Milliliters,
            detector: DetectorSettings {
                labels: DEFAULT_LABELS.iter().map(|label| label.to_string()).collect(),
                min_score: DEFAULT_MIN_SCORE,
            },
            camera: CameraConfig::default(),
            confidence: ConfidenceSettings {
                endpoint: None,
                glass_shape: DEFAULT_GLASS_SHAPE.to_string(),
                timeout: Duration::from_millis(DEFAULT_CONFIDENCE_TIMEOUT_MS),
            },
        }
    }
}

impl GaugeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GAUGE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GaugeConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(capacity) = file.capacity_ml {
            cfg.capacity_ml = capacity;
        }
        if let Some(interval) = file.poll_interval_ms {
            cfg.poll_interval = Duration::from_millis(interval);
        }
        if let Some(unit) = file.unit {
            cfg.unit = unit.parse()?;
        }
        if let Some(detector) = file.detector {
            if let Some(labels) = detector.labels {
                cfg.detector.labels = labels;
            }
            if let Some(min_score) = detector.min_score {
                cfg.detector.min_score = min_score;
            }
        }
        if let Some(camera) = file.camera {
            if let Some(url) = camera.user_url {
                cfg.camera.user_url = url;
            }
            if let Some(url) = camera.environment_url {
                cfg.camera.environment_url = url;
            }
            if let Some(width) = camera.width {
                cfg.camera.width = width;
            }
            if let Some(height) = camera.height {
                cfg.camera.height = height;
            }
            if let Some(fps) = camera.target_fps {
                cfg.camera.target_fps = fps;
            }
        }
        if let Some(confidence) = file.confidence {
            if confidence.endpoint.is_some() {
                cfg.confidence.endpoint = confidence.endpoint;
            }
            if let Some(shape) = confidence.glass_shape {
                cfg.confidence.glass_shape = shape;
            }
            if let Some(timeout) = confidence.timeout_ms {
                cfg.confidence.timeout = Duration::from_millis(timeout);
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(capacity) = std::env::var("GAUGE_CAPACITY_ML") {
            self.capacity_ml = capacity
                .parse()
                .map_err(|_| anyhow!("GAUGE_CAPACITY_ML must be a number of milliliters"))?;
        }
        if let Ok(interval) = std::env::var("GAUGE_POLL_INTERVAL_MS") {
            let ms: u64 = interval
                .parse()
                .map_err(|_| anyhow!("GAUGE_POLL_INTERVAL_MS must be an integer number of milliseconds"))?;
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Ok(unit) = std::env::var("GAUGE_UNIT") {
            if !unit.trim().is_empty() {
                self.unit = unit.parse()?;
            }
        }
        if let Ok(labels) = std::env::var("GAUGE_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detector.labels = parsed;
            }
        }
        if let Ok(score) = std::env::var("GAUGE_MIN_SCORE") {
            self.detector.min_score = score
                .parse()
                .map_err(|_| anyhow!("GAUGE_MIN_SCORE must be a number in [0, 1]"))?;
        }
        if let Ok(url) = std::env::var("GAUGE_CAMERA_USER_URL") {
            if !url.trim().is_empty() {
                self.camera.user_url = url;
            }
        }
        if let Ok(url) = std::env::var("GAUGE_CAMERA_ENVIRONMENT_URL") {
            if !url.trim().is_empty() {
                self.camera.environment_url = url;
            }
        }
        if let Ok(endpoint) = std::env::var("GAUGE_CONFIDENCE_URL") {
            if !endpoint.trim().is_empty() {
                self.confidence.endpoint = Some(endpoint);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !self.capacity_ml.is_finite() || self.capacity_ml <= 0.0 {
            return Err(anyhow!("capacity_ml must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_score) {
            return Err(anyhow!("min_score must be within [0, 1]"));
        }
        if self.detector.labels.is_empty() {
            return Err(anyhow!("detector label allow-list must not be empty"));
        }
        for label in &self.detector.labels {
            validate_label(label)?;
        }
        self.detector.labels = self
            .detector
            .labels
            .iter()
            .map(|label| label.to_lowercase())
            .collect();
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if let Some(endpoint) = &self.confidence.endpoint {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| anyhow!("invalid confidence endpoint {}: {}", endpoint, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "confidence endpoint must be http(s), got '{}'",
                    parsed.scheme()
                ));
            }
        }
        Ok(())
    }
}

/// A conforming detector label is a short lowercase phrase.
///
/// Allowed: "cup", "wine glass", "beer-mug". Disallowed: punctuation outside
/// [ _-], empty strings, anything over 32 characters.
pub fn validate_label(label: &str) -> Result<()> {
    // Compile once for hot paths.
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9 _-]{0,31}$").unwrap());

    let label = label.to_lowercase();
    if !re.is_match(&label) {
        return Err(anyhow!(
            "detector label must match ^[a-z0-9][a-z0-9 _-]{{0,31}}$"
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<GaugeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let mut cfg = GaugeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity_ml, 350.0);
        assert_eq!(cfg.poll_interval, Duration::from_millis(1000));
        assert_eq!(cfg.detector.labels, vec!["cup", "wine glass"]);
    }

    #[test]
    fn labels_are_lowercased_by_validation() {
        let mut cfg = GaugeConfig::default();
        cfg.detector.labels = vec!["Cup".to_string(), "Wine Glass".to_string()];
        cfg.validate().unwrap();
        assert_eq!(cfg.detector.labels, vec!["cup", "wine glass"]);
    }

    #[test]
    fn bad_labels_are_rejected() {
        assert!(validate_label("cup").is_ok());
        assert!(validate_label("wine glass").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("cup!").is_err());
        assert!(validate_label(&"x".repeat(40)).is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut cfg = GaugeConfig::default();
        cfg.capacity_ml = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_http_confidence_endpoint_is_rejected() {
        let mut cfg = GaugeConfig::default();
        cfg.confidence.endpoint = Some("ftp://scores.local".to_string());
        assert!(cfg.validate().is_err());
        cfg.confidence.endpoint = Some("https://scores.local/assess".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn csv_splitting_trims_entries() {
        assert_eq!(split_csv("cup, wine glass ,"), vec!["cup", "wine glass"]);
        assert!(split_csv(" ,").is_empty());
    }
}
