//! Configuration management
//!
//! One immutable [`RunConfig`] is built at startup (file defaults, then CLI
//! overrides) and passed by reference to every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::training::LossVariant;

/// Number of stride-2 stages in both networks; image sides must divide by 2^4.
const SPATIAL_DIVISOR: usize = 16;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Input pipeline configuration
    pub data: DataConfig,
    /// Network configuration
    pub model: ModelConfig,
    /// Optimization configuration
    pub training: TrainingConfig,
    /// Output locations and sample grid layout
    pub output: OutputConfig,
}

/// Input pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directory of the image corpus
    pub data_dir: String,
    /// Corpus selector: 1 = hollywood, 2 = lfw
    pub data_type: i64,
    /// Center-crop to the source dimensions before resizing
    pub is_crop: bool,
    /// Source image height
    pub image_height_org: usize,
    /// Source image width
    pub image_width_org: usize,
    /// Source image depth (1 or 3)
    pub image_depth_org: usize,
    /// Training image height
    pub image_height: usize,
    /// Training image width
    pub image_width: usize,
    /// Upper bound on the number of images used per epoch
    pub train_size: Option<usize>,
    /// Number of background decoding workers
    pub num_threads: usize,
    /// Bounded queue capacity, in batches
    pub queue_capacity: usize,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Loss variant
    pub variant: LossVariant,
    /// Latent vector size
    pub z_dim: i64,
    /// Generator base filters
    pub gc_dim: i64,
    /// Discriminator base filters
    pub dc_dim: i64,
}

/// Optimization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    /// Steps per epoch shown in the progress line
    pub steps: usize,
    pub batch_size: usize,
    /// Latent vectors drawn for each sample grid
    pub sample_size: usize,
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta1: f64,
    /// Weight clipping bound (classic variant)
    pub c_param: f64,
    /// Feature matching weight (classic variant)
    pub fm_rate: f64,
    /// Gradient penalty weight (WGAN-GP variant)
    pub grad_penalty_lambda: f64,
    /// Render a grid when `counter % sample_every == 1`
    pub sample_every: usize,
    /// Save a checkpoint when `epoch % checkpoint_every == 0`
    pub checkpoint_every: usize,
    /// Device: "cpu" or "cuda"
    pub device: String,
    /// Accepted for compatibility; libtorch manages its own allocator
    pub gpu_memory_fraction: f64,
    /// Seed for libtorch and worker shuffling
    pub seed: Option<u64>,
}

/// Output locations and sample grid layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run directory; samples and checkpoints live underneath it
    pub model_name: String,
    pub sample_dir: String,
    pub checkpoint_dir: String,
    pub grid_rows: usize,
    pub grid_cols: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/faces".to_string(),
            data_type: 1,
            is_crop: true,
            image_height_org: 108,
            image_width_org: 108,
            image_depth_org: 3,
            image_height: 64,
            image_width: 64,
            train_size: None,
            num_threads: 4,
            queue_capacity: 8,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: LossVariant::WassersteinGp,
            z_dim: 100,
            gc_dim: 64,
            dc_dim: 64,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            steps: 100,
            batch_size: 64,
            sample_size: 64,
            learning_rate: 1e-4,
            beta1: 0.5,
            c_param: 0.01,
            fm_rate: 0.1,
            grad_penalty_lambda: 10.0,
            sample_every: 100,
            checkpoint_every: 10,
            device: "cpu".to_string(),
            gpu_memory_fraction: 0.5,
            seed: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            model_name: "models/wface".to_string(),
            sample_dir: "samples".to_string(),
            checkpoint_dir: "checkpoint".to_string(),
            grid_rows: 8,
            grid_cols: 8,
        }
    }
}

impl RunConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load from TOML or JSON depending on the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if is_toml(path) {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save as TOML or JSON depending on the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if is_toml(path) {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Get device from configuration
    pub fn device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// `<model_name>/<sample_dir>`
    pub fn sample_path(&self) -> PathBuf {
        Path::new(&self.output.model_name).join(&self.output.sample_dir)
    }

    /// `<model_name>/<checkpoint_dir>`
    pub fn checkpoint_path(&self) -> PathBuf {
        Path::new(&self.output.model_name).join(&self.output.checkpoint_dir)
    }

    /// `<model_name>/metrics.csv`
    pub fn metrics_path(&self) -> PathBuf {
        Path::new(&self.output.model_name).join("metrics.csv")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        let training = &self.training;

        if training.batch_size == 0 {
            return Err(Error::config("Batch size must be > 0"));
        }
        if training.epochs == 0 {
            return Err(Error::config("Number of epochs must be > 0"));
        }
        if self.model.z_dim <= 0 || self.model.gc_dim <= 0 || self.model.dc_dim <= 0 {
            return Err(Error::config("z_dim, gc_dim and dc_dim must be > 0"));
        }
        if data.image_height == 0
            || data.image_width == 0
            || data.image_height % SPATIAL_DIVISOR != 0
            || data.image_width % SPATIAL_DIVISOR != 0
        {
            return Err(Error::config(format!(
                "Image size {}x{} must be a non-zero multiple of {}",
                data.image_height, data.image_width, SPATIAL_DIVISOR
            )));
        }
        if data.image_height_org == 0 || data.image_width_org == 0 {
            return Err(Error::config("Source image size must be > 0"));
        }
        if !matches!(data.image_depth_org, 1 | 3) {
            return Err(Error::config(format!(
                "Image depth must be 1 or 3, got {}",
                data.image_depth_org
            )));
        }
        if !matches!(data.data_type, 1 | 2) {
            return Err(Error::UnsupportedCorpus(data.data_type));
        }
        if data.num_threads == 0 || data.queue_capacity == 0 {
            return Err(Error::config("num_threads and queue_capacity must be > 0"));
        }
        if data.train_size == Some(0) {
            return Err(Error::config("train_size must be > 0 when set"));
        }
        if training.learning_rate <= 0.0 || !(0.0..1.0).contains(&training.beta1) {
            return Err(Error::config("learning_rate must be > 0 and beta1 in [0, 1)"));
        }
        if training.c_param <= 0.0 {
            return Err(Error::config("c_param must be > 0"));
        }
        if training.fm_rate < 0.0 || training.grad_penalty_lambda < 0.0 {
            return Err(Error::config("fm_rate and grad_penalty_lambda must be >= 0"));
        }
        if training.sample_every == 0 || training.checkpoint_every == 0 {
            return Err(Error::config("sample_every and checkpoint_every must be > 0"));
        }
        let grid = self.output.grid_rows * self.output.grid_cols;
        if grid == 0 {
            return Err(Error::config("Sample grid must have at least one tile"));
        }
        if training.sample_size < grid {
            return Err(Error::config(format!(
                "sample_size {} is smaller than the {}x{} grid",
                training.sample_size, self.output.grid_rows, self.output.grid_cols
            )));
        }
        if self.output.model_name.is_empty() {
            return Err(Error::config("model_name must not be empty"));
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

/// Load a configuration file, writing the defaults there first if it is missing
pub fn ensure_config_exists(path: impl AsRef<Path>) -> Result<RunConfig> {
    let path = path.as_ref();
    if path.exists() {
        RunConfig::load(path)
    } else {
        let config = RunConfig::default();
        config.save(path)?;
        Ok(config)
    }
}
