//! Training module for DCGAN
//!
//! This module provides:
//! - Loss engine for the classic and WGAN-GP variants
//! - Lipschitz constraint on the critic (weight clipping)
//! - Training loop state machine and metrics

mod constraint;
mod losses;
mod metrics;
mod trainer;

pub use constraint::{clip_parameters, LipschitzConstraint};
pub use losses::{
    adversarial_losses, feature_matching_loss, gradient_penalty, penalty_at, LossBundle,
    LossEngine, LossValues, LossVariant,
};
pub use metrics::{StepRecord, TrainingMetrics};
pub use trainer::{
    progress_line, run, sample_file_name, should_checkpoint, should_sample, write_grid, Trainer,
    TrainerState, CRITIC_UPDATES_PER_STEP,
};
