//! Utility functions and helpers
//!
//! - Run configuration
//! - Checkpoint save/restore
//! - Sample grid rendering

mod checkpoint;
mod config;
mod grid;

pub use checkpoint::{checkpoint_name, CheckpointGateway, CheckpointMeta, CHECKPOINT_PREFIX};
pub use config::{ensure_config_exists, DataConfig, ModelConfig, OutputConfig, RunConfig, TrainingConfig};
pub use grid::{encode_png, render_grid, tile, to_pixels, GridLayout};
