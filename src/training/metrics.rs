//! Training metrics for monitoring GAN progress
//!
//! Every step's reported losses are kept in memory and written to CSV at the
//! end of a run.

use serde::Serialize;
use std::path::Path;

use super::LossValues;
use crate::error::Result;

/// Reported losses of one training step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub epoch: usize,
    pub step: usize,
    pub counter: usize,
    pub d_loss: f64,
    pub d_loss_real: f64,
    pub d_loss_fake: f64,
    pub g_loss: f64,
    pub fm_loss: f64,
    pub gradient_penalty: Option<f64>,
}

/// Metrics collected during training
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    pub records: Vec<StepRecord>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step
    pub fn record_step(&mut self, epoch: usize, step: usize, counter: usize, values: &LossValues) {
        self.records.push(StepRecord {
            epoch,
            step,
            counter,
            d_loss: values.d_loss,
            d_loss_real: values.d_loss_real,
            d_loss_fake: values.d_loss_fake,
            g_loss: values.g_loss,
            fm_loss: values.fm_loss,
            gradient_penalty: values.gradient_penalty,
        });
    }

    /// Number of recorded steps
    pub fn num_steps(&self) -> usize {
        self.records.len()
    }

    /// Get latest critic loss
    pub fn latest_d_loss(&self) -> Option<f64> {
        self.records.last().map(|r| r.d_loss)
    }

    /// Get latest generator loss
    pub fn latest_g_loss(&self) -> Option<f64> {
        self.records.last().map(|r| r.g_loss)
    }

    /// Mean `(d_loss, g_loss)` over the steps of one epoch
    pub fn epoch_means(&self, epoch: usize) -> Option<(f64, f64)> {
        let steps: Vec<&StepRecord> = self.records.iter().filter(|r| r.epoch == epoch).collect();
        if steps.is_empty() {
            return None;
        }
        let n = steps.len() as f64;
        let d = steps.iter().map(|r| r.d_loss).sum::<f64>() / n;
        let g = steps.iter().map(|r| r.g_loss).sum::<f64>() / n;
        Some((d, g))
    }

    /// Save metrics to CSV file
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
