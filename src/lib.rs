//! Galaxy shape estimation training harness
//!
//! Trains convolutional regressors that estimate galaxy shape parameters from
//! simulated galaxy/PSF image pairs, plus a calibration network trained on
//! groups of repeated noisy measurements.

pub mod compute;
pub mod data;
pub mod fits;
pub mod model;
pub mod predict;
pub mod training;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which of the two supported problem shapes a run trains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Per-sample regression of shape parameters from galaxy + PSF stamps
    Shape,
    /// Per-group calibration regression scored on group means
    Calibration,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Shape => write!(f, "shape"),
            TaskKind::Calibration => write!(f, "calibration"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shape" => Ok(TaskKind::Shape),
            "calibration" | "cali" => Ok(TaskKind::Calibration),
            _ => Err(format!("Unknown task: {}. Use shape or calibration.", s)),
        }
    }
}

/// Epoch loss the plateau scheduler watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    TrainLoss,
    ValidLoss,
}

/// Which checkpoints survive once a new one is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// One file per epoch, never pruned
    KeepAll,
    /// Only the most recent `n` epochs
    KeepLast(usize),
    /// Only the epoch with the lowest monitored loss
    KeepBest,
}

/// When the group-mean loss reports a non-constant target group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GmsbWarning {
    /// Warn on every evaluation, whatever the target looks like
    Always,
    /// Warn only when some target group has nonzero spread
    NonzeroStd,
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum GalshapeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error for {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Dataset error: {0}")]
    Data(String),

    #[error("FITS error: {0}")]
    Fits(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GalshapeError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub train: TrainConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub task: TaskKind,
    pub epoch_number: usize,
    pub initial_learning_rate: f64,
    /// SGD momentum (shape task)
    pub momentum: f64,
    /// Adam (beta1, beta2) (calibration task)
    pub adam_betas: (f32, f32),
    /// Samples per batch (shape task)
    pub batch_size: usize,
    /// Cases per batch, each expanding to `real_size` rows (calibration task)
    pub batch_cases: usize,
    pub validation_split: f64,
    /// Number of regressed shape parameters (shape task)
    pub feature_number: usize,
    pub device: String,
    pub gpu_number: usize,
    pub workers: usize,
    pub save_model: bool,
    pub model_path: String,
    pub model_name: String,
    #[serde(default = "default_show_log")]
    pub show_log: bool,
    /// Shuffle seed; drawn at random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Overrides the task's default scheduler metric
    #[serde(default)]
    pub monitor: Option<Monitor>,
    #[serde(default = "default_retention")]
    pub checkpoint_retention: Retention,
    #[serde(default = "default_gmsb_warning")]
    pub gmsb_warning: GmsbWarning,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_show_log() -> bool {
    true
}

fn default_retention() -> Retention {
    Retention::KeepAll
}

fn default_gmsb_warning() -> GmsbWarning {
    GmsbWarning::NonzeroStd
}

/// Plateau scheduler settings; defaults follow the usual reduce-on-plateau values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub cooldown: usize,
    pub min_lr: f64,
    pub eps: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            factor: 0.1,
            patience: 10,
            threshold: 1e-4,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Convolution channels per ForkNet branch
    pub channels: usize,
    /// Width of the dense layers
    pub hidden: usize,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            channels: 16,
            hidden: 128,
            dropout: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the simulated .npy arrays
    pub path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            path: "data/train".to_string(),
        }
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            task: TaskKind::Shape,
            epoch_number: 150,
            initial_learning_rate: 0.01,
            momentum: 0.9,
            adam_betas: (0.9, 0.999),
            batch_size: 250,
            batch_cases: 10,
            validation_split: 0.1,
            feature_number: 4,
            device: "cpu".to_string(),
            gpu_number: 1,
            workers: 4,
            save_model: true,
            model_path: "./model/".to_string(),
            model_name: "test_model".to_string(),
            show_log: true,
            seed: None,
            monitor: None,
            checkpoint_retention: Retention::KeepAll,
            gmsb_warning: GmsbWarning::NonzeroStd,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Reject settings that would fail mid-run
    pub fn validate(&self) -> Result<()> {
        if self.epoch_number == 0 {
            return Err(GalshapeError::Config("epoch_number must be > 0".to_string()));
        }
        if !(self.initial_learning_rate > 0.0) {
            return Err(GalshapeError::Config(
                "initial_learning_rate must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(GalshapeError::Config(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if self.gpu_number == 0 {
            return Err(GalshapeError::Config("gpu_number must be >= 1".to_string()));
        }
        match self.task {
            TaskKind::Shape => {
                if self.batch_size == 0 {
                    return Err(GalshapeError::Config("batch_size must be > 0".to_string()));
                }
                if self.feature_number == 0 {
                    return Err(GalshapeError::Config(
                        "feature_number must be > 0".to_string(),
                    ));
                }
            }
            TaskKind::Calibration => {
                if self.batch_cases == 0 {
                    return Err(GalshapeError::Config("batch_cases must be > 0".to_string()));
                }
                let (beta1, beta2) = self.adam_betas;
                if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
                    return Err(GalshapeError::Config(format!(
                        "adam_betas must lie in [0, 1), got ({}, {})",
                        beta1, beta2
                    )));
                }
            }
        }
        if self.scheduler.factor <= 0.0 || self.scheduler.factor >= 1.0 {
            return Err(GalshapeError::Config(
                "scheduler.factor must be in (0, 1)".to_string(),
            ));
        }
        if let Retention::KeepLast(0) = self.checkpoint_retention {
            return Err(GalshapeError::Config(
                "keep_last retention needs at least one checkpoint".to_string(),
            ));
        }
        Ok(())
    }

    /// Scheduler metric: explicit setting, else the task's historical choice
    pub fn monitor(&self) -> Monitor {
        self.monitor.unwrap_or(match self.task {
            TaskKind::Shape => Monitor::TrainLoss,
            TaskKind::Calibration => Monitor::ValidLoss,
        })
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GalshapeError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| GalshapeError::Config(format!("Failed to parse config: {}", e)))?;
        config.train.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GalshapeError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.train.validate().is_ok());
        assert_eq!(config.train.monitor(), Monitor::TrainLoss);
    }

    #[test]
    fn test_rejects_degenerate_split() {
        let mut config = TrainConfig::default();
        config.validation_split = 1.0;
        assert!(matches!(config.validate(), Err(GalshapeError::Config(_))));

        config.validation_split = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_calibration_monitors_validation_loss() {
        let config = TrainConfig {
            task: TaskKind::Calibration,
            ..TrainConfig::default()
        };
        assert_eq!(config.monitor(), Monitor::ValidLoss);

        let config = TrainConfig {
            monitor: Some(Monitor::TrainLoss),
            ..config
        };
        assert_eq!(config.monitor(), Monitor::TrainLoss);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_src = r#"
            [train]
            task = "calibration"
            epoch_number = 3
            initial_learning_rate = 0.001
            momentum = 0.9
            adam_betas = [0.5, 0.9]
            batch_size = 32
            batch_cases = 4
            validation_split = 0.2
            feature_number = 2
            device = "cpu"
            gpu_number = 1
            workers = 0
            save_model = false
            model_path = "./model/"
            model_name = "cali"
            checkpoint_retention = { keep_last = 2 }
            gmsb_warning = "always"

            [train.scheduler]
            patience = 3
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.train.task, TaskKind::Calibration);
        assert_eq!(config.train.adam_betas, (0.5, 0.9));
        assert_eq!(config.train.checkpoint_retention, Retention::KeepLast(2));
        assert_eq!(config.train.gmsb_warning, GmsbWarning::Always);
        assert_eq!(config.train.scheduler.patience, 3);
        assert_eq!(config.train.scheduler.factor, 0.1);
        assert!(config.train.show_log);
        assert_eq!(config.model.hidden, 128);
        assert!(config.train.validate().is_ok());
    }
}
