//! # wface GAN
//!
//! DCGAN trainer for face images with two adversarial variants:
//!
//! - **Classic**: weight-clipped critic, generator loss plus feature matching
//! - **WGAN-GP**: gradient-penalized critic without batch norm
//!
//! ## Modules
//!
//! - `data`: Corpus discovery, preprocessing and the background batch queue
//! - `model`: Generator and Discriminator networks
//! - `training`: Loss engine, critic constraint and the training loop
//! - `utils`: Configuration, checkpoints and sample grids

pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{BatchSource, Corpus, ImageBatch, ImageQueue, InMemoryBatches, StopToken};
pub use error::{Error, Result};
pub use model::{Critic, Discriminator, Generator, ImageGenerator, NetworkOutput, DCGAN};
pub use training::{LossEngine, LossVariant, Trainer, TrainerState, TrainingMetrics};
pub use utils::{CheckpointGateway, GridLayout, RunConfig};
