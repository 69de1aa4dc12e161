//! Training loop implementation for DCGAN
//!
//! The driver walks `Init -> RestoredOrFresh -> Running -> ShuttingDown ->
//! Terminated`. Each step runs five critic updates, one generator update, a
//! loss report for the global counter and, on cadence, a sample grid.
//! Checkpoints are written at the end of every `checkpoint_every`-th epoch.

use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::{nn, Device, Tensor};
use tracing::{debug, error, info};

use super::constraint::LipschitzConstraint;
use super::losses::{LossEngine, LossValues, LossVariant};
use super::metrics::TrainingMetrics;
use crate::data::{batch_count, batch_to_tensor, BatchSource, Corpus, ImageQueue, Preprocess};
use crate::error::{Error, Result};
use crate::model::{ImageGenerator, DCGAN};
use crate::utils::{render_grid, CheckpointGateway, CheckpointMeta, GridLayout, RunConfig};

/// Critic updates per generator update
pub const CRITIC_UPDATES_PER_STEP: usize = 5;

/// Lifecycle of one training run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Init,
    RestoredOrFresh,
    Running { epoch: usize, step: usize },
    ShuttingDown,
    Terminated,
}

/// Sample when `counter % every == 1` (every step when `every == 1`)
pub fn should_sample(counter: usize, every: usize) -> bool {
    every == 1 || counter % every == 1
}

/// Checkpoint after epochs divisible by `every`
pub fn should_checkpoint(epoch: usize, every: usize) -> bool {
    every > 0 && epoch % every == 0
}

/// `out_<counter:05>.png`
pub fn sample_file_name(counter: usize) -> String {
    format!("out_{:05}.png", counter)
}

/// Console progress line for one step
///
/// The classic line prints `d_loss` as the sum of the fake and real means
/// followed by both components; the optimized critic loss is their difference.
pub fn progress_line(
    variant: LossVariant,
    epoch: usize,
    step: usize,
    steps: usize,
    elapsed: f64,
    values: &LossValues,
    counter: usize,
) -> String {
    match variant {
        LossVariant::Classic => format!(
            "epochs: {:02} {:04}/{:04} time: {:.4}, d_loss: {:.8} (F:{:.8}, R:{:.8}), g_loss: {:.8}: : sample count: {}",
            epoch,
            step,
            steps,
            elapsed,
            values.d_loss_fake + values.d_loss_real,
            values.d_loss_fake,
            values.d_loss_real,
            values.g_loss,
            counter
        ),
        LossVariant::WassersteinGp => format!(
            "epochs: {:02} {:04}/{:04} time: {:.4}, d_loss: {:.8}, g_loss: {:.8}: sample count: {}",
            epoch, step, steps, elapsed, values.d_loss, values.g_loss, counter
        ),
    }
}

struct Optimizers {
    gen: nn::Optimizer,
    disc: nn::Optimizer,
}

/// DCGAN Trainer
pub struct Trainer<'a> {
    config: &'a RunConfig,
    device: Device,
    engine: LossEngine,
    constraint: LipschitzConstraint,
    gateway: CheckpointGateway,
    grid: GridLayout,
    metrics: TrainingMetrics,
    state: TrainerState,
    counter: usize,
    started: Instant,
}

impl<'a> Trainer<'a> {
    /// Create a new trainer
    pub fn new(config: &'a RunConfig, device: Device) -> Self {
        Self {
            config,
            device,
            engine: LossEngine::from_config(config),
            constraint: LipschitzConstraint::from_config(config),
            gateway: CheckpointGateway::new(config.checkpoint_path()),
            grid: GridLayout::new(config.output.grid_rows, config.output.grid_cols),
            metrics: TrainingMetrics::new(),
            state: TrainerState::Init,
            counter: 1,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Global step counter; starts at 1 and is never persisted
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    fn transition(&mut self, next: TrainerState) {
        debug!("Trainer state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Load the latest checkpoint into `model` if there is one
    ///
    /// A missing checkpoint is not an error: training starts from the fresh
    /// parameters.
    pub fn restore(&mut self, model: &mut DCGAN) -> Result<Option<CheckpointMeta>> {
        let restored = self.gateway.restore(model)?;
        match &restored {
            Some(meta) => info!("Model restored from step {}", meta.step),
            None => info!(
                "No checkpoint file found in {}, starting fresh",
                self.gateway.dir().display()
            ),
        }
        self.transition(TrainerState::RestoredOrFresh);
        Ok(restored)
    }

    /// Run every epoch, then shut `source` down
    ///
    /// The source is shut down on failure too; the first error wins.
    pub fn train<S: BatchSource + ?Sized>(
        &mut self,
        model: &mut DCGAN,
        source: &mut S,
        batch_count: usize,
    ) -> Result<&TrainingMetrics> {
        if self.state == TrainerState::Init {
            self.transition(TrainerState::RestoredOrFresh);
        }

        let outcome = self.run_epochs(model, source, batch_count);

        self.transition(TrainerState::ShuttingDown);
        info!("Stopping data workers");
        let shutdown = source.shutdown();
        self.transition(TrainerState::Terminated);

        outcome?;
        shutdown?;
        Ok(&self.metrics)
    }

    fn run_epochs<S: BatchSource + ?Sized>(
        &mut self,
        model: &mut DCGAN,
        source: &mut S,
        batch_count: usize,
    ) -> Result<()> {
        let config = self.config;
        let training = &config.training;
        let mut opts = Optimizers {
            gen: model.gen_optimizer(training.learning_rate, training.beta1)?,
            disc: model.disc_optimizer(training.learning_rate, training.beta1)?,
        };

        info!(
            "Starting {} training for {} epochs, {} batches per epoch",
            self.engine.variant().name(),
            training.epochs,
            batch_count
        );
        self.started = Instant::now();

        for epoch in 0..training.epochs {
            let pb = ProgressBar::new(batch_count as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );

            for step in 0..batch_count {
                self.transition(TrainerState::Running { epoch, step });
                let values = self.train_step(model, source, &mut opts)?;
                self.check_finite(epoch, step, &values)?;

                let line = progress_line(
                    self.engine.variant(),
                    epoch,
                    step,
                    training.steps,
                    self.started.elapsed().as_secs_f64(),
                    &values,
                    self.counter,
                );
                pb.suspend(|| info!("{}", line));
                self.metrics.record_step(epoch, step, self.counter, &values);

                if should_sample(self.counter, training.sample_every) {
                    let path = self.write_sample_grid(model)?;
                    pb.suspend(|| info!("Saved samples to {}", path.display()));
                }

                self.counter += 1;
                pb.set_message(format!("D: {:.4}, G: {:.4}", values.d_loss, values.g_loss));
                pb.inc(1);
            }
            pb.finish_and_clear();

            if let Some((d, g)) = self.metrics.epoch_means(epoch) {
                info!("Epoch {}/{}: D_loss={:.4}, G_loss={:.4}", epoch, training.epochs, d, g);
            }

            if should_checkpoint(epoch, training.checkpoint_every) {
                self.gateway.save(model, epoch)?;
            }
        }
        Ok(())
    }

    fn next_real<S: BatchSource + ?Sized>(&self, source: &mut S) -> Result<Tensor> {
        batch_to_tensor(&source.next_batch()?, self.device)
    }

    /// Five critic updates, one generator update, then a loss report
    fn train_step<S: BatchSource + ?Sized>(
        &self,
        model: &DCGAN,
        source: &mut S,
        opts: &mut Optimizers,
    ) -> Result<LossValues> {
        let variant = self.engine.variant();
        let z = model.sample_latent(self.config.training.batch_size as i64);

        for _ in 0..CRITIC_UPDATES_PER_STEP {
            let real = self.next_real(source)?;
            let bundle =
                self.engine
                    .critic_losses(&model.generator, &model.discriminator, &real, &z, true)?;
            let objective = variant.critic_objective(&bundle);

            opts.disc.zero_grad();
            objective.backward();
            opts.disc.step();
            self.constraint.enforce(&model.disc_vs);
        }

        let real = if variant.generator_needs_real_batch() {
            Some(self.next_real(source)?)
        } else {
            None
        };
        let g_objective = self.engine.generator_objective(
            &model.generator,
            &model.discriminator,
            real.as_ref(),
            &z,
            true,
        )?;
        opts.gen.zero_grad();
        g_objective.backward();
        opts.gen.step();

        let real = self.next_real(source)?;
        let report =
            self.engine
                .critic_losses(&model.generator, &model.discriminator, &real, &z, true)?;
        Ok(report.values())
    }

    fn check_finite(&self, epoch: usize, step: usize, values: &LossValues) -> Result<()> {
        if values.is_finite() {
            return Ok(());
        }
        error!(
            "Training diverged at epoch {} step {} (counter {}, {:.1}s elapsed): {}",
            epoch,
            step,
            self.counter,
            self.started.elapsed().as_secs_f64(),
            values
        );
        Err(Error::Divergence {
            epoch,
            step,
            counter: self.counter,
            losses: values.to_string(),
        })
    }

    fn write_sample_grid(&self, model: &DCGAN) -> Result<PathBuf> {
        let path = self.config.sample_path().join(sample_file_name(self.counter));
        write_grid(model, self.config.training.sample_size, self.grid, &path)?;
        Ok(path)
    }
}

/// Render one grid from fresh latents with the deterministic sampler and write it to `path`
pub fn write_grid(model: &DCGAN, sample_size: usize, grid: GridLayout, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let z = model.sample_latent(sample_size as i64);
    let images = tch::no_grad(|| model.generator.sampler(&z));
    std::fs::write(path, render_grid(&images, grid)?)?;
    Ok(())
}

/// Train end to end from a configuration: discover the corpus, start the
/// workers, restore, train, shut down and write the metrics CSV
pub fn run(config: &RunConfig) -> Result<TrainingMetrics> {
    config.validate()?;
    let device = config.device();
    if let Some(seed) = config.training.seed {
        tch::manual_seed(seed as i64);
    }
    info!(
        "Device {:?}, gpu_memory_fraction {} (libtorch manages device memory itself)",
        device, config.training.gpu_memory_fraction
    );

    let corpus = Corpus::from_selector(config.data.data_type)?;
    let files = corpus.discover(Path::new(&config.data.data_dir))?;
    let batches = batch_count(files.len(), config.data.train_size, config.training.batch_size);
    if batches == 0 {
        return Err(Error::config(format!(
            "{} images are not enough for one batch of {}",
            files.len(),
            config.training.batch_size
        )));
    }

    let mut model = DCGAN::from_config(config, device);
    let mut trainer = Trainer::new(config, device);

    let mut queue = ImageQueue::spawn(
        files,
        Preprocess::from_config(config),
        config.training.batch_size,
        config.data.num_threads,
        config.data.queue_capacity,
        config.training.seed,
    )?;

    if let Err(e) = trainer.restore(&mut model) {
        queue.shutdown()?;
        return Err(e);
    }
    trainer.train(&mut model, &mut queue, batches)?;

    let metrics = trainer.metrics().clone();
    std::fs::create_dir_all(&config.output.model_name)?;
    metrics.save_csv(config.metrics_path())?;
    info!("Training complete after {} steps", metrics.num_steps());
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_cadence() {
        let sampled: Vec<usize> = (1..=250).filter(|&c| should_sample(c, 100)).collect();
        assert_eq!(sampled, vec![1, 101, 201]);
    }

    #[test]
    fn test_sampling_every_step() {
        assert!((1..=5).all(|c| should_sample(c, 1)));
    }

    #[test]
    fn test_checkpoint_cadence() {
        let saved: Vec<usize> = (0..25).filter(|&e| should_checkpoint(e, 10)).collect();
        assert_eq!(saved, vec![0, 10, 20]);
    }

    #[test]
    fn test_sample_file_name() {
        assert_eq!(sample_file_name(1), "out_00001.png");
        assert_eq!(sample_file_name(12345), "out_12345.png");
    }

    #[test]
    fn test_progress_line_classic_prints_sum() {
        let values = LossValues {
            d_loss: 0.75,
            d_loss_real: 1.0,
            d_loss_fake: 0.25,
            g_loss: -0.25,
            fm_loss: 0.0,
            gradient_penalty: None,
        };
        let line = progress_line(LossVariant::Classic, 3, 7, 100, 1.5, &values, 42);
        assert_eq!(
            line,
            "epochs: 03 0007/0100 time: 1.5000, d_loss: 1.25000000 (F:0.25000000, R:1.00000000), g_loss: -0.25000000: : sample count: 42"
        );
    }

    #[test]
    fn test_progress_line_wasserstein() {
        let values = LossValues {
            d_loss: -1.0,
            d_loss_real: 1.0,
            d_loss_fake: 0.0,
            g_loss: 0.0,
            fm_loss: 0.0,
            gradient_penalty: Some(0.0),
        };
        let line = progress_line(LossVariant::WassersteinGp, 0, 1, 100, 0.0, &values, 2);
        assert_eq!(
            line,
            "epochs: 00 0001/0100 time: 0.0000, d_loss: -1.00000000, g_loss: 0.00000000: sample count: 2"
        );
    }

    #[test]
    fn test_new_trainer_state() {
        let config = RunConfig::default();
        let trainer = Trainer::new(&config, Device::Cpu);
        assert_eq!(trainer.state(), TrainerState::Init);
        assert_eq!(trainer.counter(), 1);
    }
}
