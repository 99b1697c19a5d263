use crate::batch::DEFAULT_CHUNK_SIZE;
use crate::tracker::TrackerSettings;
use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    pub model: ModelSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
}

impl Validatable for Settings {
    fn validate(&self) -> Result<(), String> {
        self.pipeline.validate()?;
        self.tracker.validate()?;
        self.model.validate()
    }
}

impl Validatable for TrackerSettings {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("high_threshold", self.high_threshold),
            ("low_threshold", self.low_threshold),
            ("new_track_threshold", self.new_track_threshold),
            ("match_threshold", self.match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!(
                    "tracker.{} must be within [0, 1], got {}",
                    name, value
                ));
            }
        }
        if self.low_threshold > self.high_threshold {
            return Err("tracker.low_threshold must not exceed tracker.high_threshold".to_string());
        }
        Ok(())
    }
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_true")]
    pub reclaim_between_batches: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            reclaim_between_batches: true,
        }
    }
}

impl Validatable for PipelineSettings {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("pipeline.chunk_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelSettings {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default)]
    pub device: DevicePreference,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_true")]
    pub tracking: bool,
    /// Maps boxes back to the source frame size instead of the model's
    /// square input space.
    #[serde(default)]
    pub rescale_boxes: bool,
}

fn default_input_size() -> u32 {
    640
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

impl ModelSettings {
    pub fn get_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

impl Validatable for ModelSettings {
    fn validate(&self) -> Result<(), String> {
        if self.input_size == 0 || self.input_size % 32 != 0 {
            return Err(format!(
                "model.input_size must be a positive multiple of 32, got {}",
                self.input_size
            ));
        }
        if !(0.0..=1.0).contains(&self.min_probability) {
            return Err(format!(
                "model.min_probability must be within [0, 1], got {}",
                self.min_probability
            ));
        }
        if !self.get_model_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_model_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }

    pub fn from_env() -> Result<Self, String> {
        std::env::var("APP_ENVIRONMENT")
            .unwrap_or_else(|_| "local".into())
            .try_into()
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

/// Layers `configuration/base.yaml`, the environment's YAML file and
/// `APP_`-prefixed environment variables, then validates the result.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No working directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");
    let environment = Environment::from_env().map_err(config::ConfigError::Message)?;

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings = settings.try_deserialize::<Settings>()?;
    if let Err(e) = settings.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Settings, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<Settings>()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(
            r#"
log_level: info
model:
  onnx_file: yolov8n.onnx
  model_dir: models
"#,
        )
        .unwrap();

        assert_eq!(settings.log_level, LogLevel::Info);
        assert_eq!(settings.pipeline.chunk_size, 100);
        assert!(settings.pipeline.reclaim_between_batches);
        assert_eq!(settings.model.device, DevicePreference::Auto);
        assert_eq!(settings.model.input_size, 640);
        assert!(settings.model.tracking);
        assert!(!settings.model.rescale_boxes);
        assert_eq!(settings.tracker.track_buffer, 30);
        assert_eq!(settings.tracker.high_threshold, 0.25);
        assert!(settings.tracker.fuse_score);
        assert_eq!(
            settings.model.get_model_path(),
            PathBuf::from("models/yolov8n.onnx")
        );
    }

    #[test]
    fn test_overrides() {
        let settings = parse(
            r#"
log_level: DEBUG
pipeline:
  chunk_size: 1
  reclaim_between_batches: false
model:
  onnx_file: yolov8n.onnx
  model_dir: models
  device: cpu
  tracking: false
tracker:
  match_threshold: 0.5
  track_buffer: 60
"#,
        )
        .unwrap();

        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.pipeline.chunk_size, 1);
        assert!(!settings.pipeline.reclaim_between_batches);
        assert_eq!(settings.model.device, DevicePreference::Cpu);
        assert!(!settings.model.tracking);
        assert_eq!(settings.tracker.match_threshold, 0.5);
        assert_eq!(settings.tracker.track_buffer, 60);
        assert_eq!(settings.tracker.low_threshold, 0.1);
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let result = parse(
            r#"
log_level: verbose
model:
  onnx_file: yolov8n.onnx
  model_dir: models
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        assert!(PipelineSettings {
            chunk_size: 0,
            reclaim_between_batches: true
        }
        .validate()
        .is_err());

        let mut model = ModelSettings {
            onnx_file: "missing.onnx".to_string(),
            model_dir: PathBuf::from("/nonexistent"),
            device: DevicePreference::Auto,
            input_size: 640,
            min_probability: 0.25,
            iou_threshold: 0.7,
            tracking: true,
            rescale_boxes: false,
        };
        let err = model.validate().unwrap_err();
        assert!(err.contains("Model file not found"));

        model.input_size = 600;
        assert!(model.validate().unwrap_err().contains("multiple of 32"));
    }

    #[test]
    fn test_tracker_validation() {
        assert!(TrackerSettings::default().validate().is_ok());

        let inverted = TrackerSettings {
            low_threshold: 0.6,
            high_threshold: 0.5,
            ..TrackerSettings::default()
        };
        assert!(inverted.validate().unwrap_err().contains("low_threshold"));

        let out_of_range = TrackerSettings {
            match_threshold: 1.5,
            ..TrackerSettings::default()
        };
        assert!(out_of_range.validate().unwrap_err().contains("match_threshold"));
    }
}
