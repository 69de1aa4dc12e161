//! End-to-end training runs on tiny networks

use image::{Rgb, RgbImage};
use std::path::Path;
use tch::Device;
use tempfile::TempDir;

use wface_gan::{
    training::{run, TrainerState},
    BatchSource, CheckpointGateway, Error, ImageBatch, InMemoryBatches, LossVariant, RunConfig,
    Trainer, DCGAN,
};

fn tiny_config(variant: LossVariant, run_dir: &Path) -> RunConfig {
    let mut config = RunConfig::default();
    config.model.variant = variant;
    config.model.z_dim = 8;
    config.model.gc_dim = 4;
    config.model.dc_dim = 4;
    config.data.image_height = 16;
    config.data.image_width = 16;
    config.data.image_height_org = 24;
    config.data.image_width_org = 24;
    config.data.num_threads = 2;
    config.training.epochs = 2;
    config.training.batch_size = 4;
    config.training.sample_size = 4;
    config.training.sample_every = 2;
    config.training.checkpoint_every = 1;
    config.training.seed = Some(3);
    config.output.model_name = run_dir.to_string_lossy().to_string();
    config.output.grid_rows = 2;
    config.output.grid_cols = 2;
    config
}

fn random_batches(count: usize) -> InMemoryBatches {
    let batches = (0..count)
        .map(|i| ImageBatch::from_elem((4, 16, 16, 3), (i as f32 / count as f32) * 2.0 - 1.0))
        .collect();
    InMemoryBatches::new(batches)
}

fn train_in_memory(variant: LossVariant) {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(variant, dir.path());
    tch::manual_seed(3);

    let mut model = DCGAN::from_config(&config, Device::Cpu);
    let mut trainer = Trainer::new(&config, Device::Cpu);
    let mut source = random_batches(3);

    assert!(trainer.restore(&mut model).unwrap().is_none());
    assert_eq!(trainer.state(), TrainerState::RestoredOrFresh);

    let metrics = trainer.train(&mut model, &mut source, 3).unwrap();
    assert_eq!(metrics.num_steps(), 6);
    assert!(metrics.records.iter().all(|r| r.d_loss.is_finite() && r.g_loss.is_finite()));
    assert_eq!(
        metrics.records.iter().all(|r| r.gradient_penalty.is_some()),
        variant == LossVariant::WassersteinGp
    );

    assert_eq!(trainer.state(), TrainerState::Terminated);
    assert_eq!(trainer.counter(), 7);
    assert!(source.is_closed());

    // counters 1, 3 and 5 are sampled with a cadence of 2
    let samples = config.sample_path();
    for counter in [1, 3, 5] {
        assert!(samples.join(format!("out_{:05}.png", counter)).exists());
    }
    assert!(!samples.join("out_00002.png").exists());
    let grid = image::open(samples.join("out_00001.png")).unwrap();
    assert_eq!((grid.width(), grid.height()), (32, 32));

    let gateway = CheckpointGateway::new(config.checkpoint_path());
    let steps: Vec<usize> = gateway.list().unwrap().iter().map(|m| m.step).collect();
    assert_eq!(steps, vec![0, 1]);

    // a fresh model picks up the latest checkpoint
    let mut resumed = DCGAN::from_config(&config, Device::Cpu);
    let mut second = Trainer::new(&config, Device::Cpu);
    assert_eq!(second.restore(&mut resumed).unwrap().unwrap().step, 1);
    assert_eq!(second.counter(), 1);
}

#[test]
fn test_wasserstein_training_loop() {
    train_in_memory(LossVariant::WassersteinGp);
}

#[test]
fn test_classic_training_loop_clips_critic() {
    train_in_memory(LossVariant::Classic);

    let dir = TempDir::new().unwrap();
    let config = tiny_config(LossVariant::Classic, dir.path());
    let mut model = DCGAN::from_config(&config, Device::Cpu);
    let mut trainer = Trainer::new(&config, Device::Cpu);
    trainer.train(&mut model, &mut random_batches(2), 1).unwrap();

    let c = config.training.c_param;
    for var in model.disc_vs.trainable_variables() {
        assert!(var.abs().max().double_value(&[]) <= c + 1e-7);
    }
}

#[test]
fn test_training_step_at_default_image_size() {
    for variant in [LossVariant::Classic, LossVariant::WassersteinGp] {
        let dir = TempDir::new().unwrap();
        let mut config = tiny_config(variant, dir.path());
        config.data.image_height = 64;
        config.data.image_width = 64;
        config.data.image_height_org = 64;
        config.data.image_width_org = 64;
        config.training.epochs = 1;
        config.training.sample_every = 1;

        let batch = ImageBatch::from_shape_fn((4, 64, 64, 3), |(b, y, x, c)| {
            ((b + y * 3 + x * 5 + c * 7) % 17) as f32 / 8.0 - 1.0
        });
        let mut model = DCGAN::from_config(&config, Device::Cpu);
        let mut trainer = Trainer::new(&config, Device::Cpu);
        let mut source = InMemoryBatches::new(vec![batch]);

        let metrics = trainer.train(&mut model, &mut source, 1).unwrap();
        assert_eq!(metrics.num_steps(), 1);
        assert!(metrics.records[0].d_loss.is_finite());

        let grid = image::open(config.sample_path().join("out_00001.png")).unwrap();
        assert_eq!((grid.width(), grid.height()), (128, 128));
    }
}

/// A source that breaks after a fixed number of batches
struct FailingSource {
    remaining: usize,
    stopped: bool,
}

impl BatchSource for FailingSource {
    fn next_batch(&mut self) -> wface_gan::Result<ImageBatch> {
        if self.remaining == 0 {
            return Err(Error::PipelineClosed);
        }
        self.remaining -= 1;
        Ok(ImageBatch::zeros((4, 16, 16, 3)))
    }

    fn shutdown(&mut self) -> wface_gan::Result<()> {
        self.stopped = true;
        Ok(())
    }
}

#[test]
fn test_failure_still_shuts_down_source() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(LossVariant::WassersteinGp, dir.path());
    let mut model = DCGAN::from_config(&config, Device::Cpu);
    let mut trainer = Trainer::new(&config, Device::Cpu);
    let mut source = FailingSource {
        remaining: 3,
        stopped: false,
    };

    let err = trainer.train(&mut model, &mut source, 2).unwrap_err();
    assert!(matches!(err, Error::PipelineClosed));
    assert!(source.stopped);
    assert_eq!(trainer.state(), TrainerState::Terminated);
}

#[test]
fn test_run_from_image_directory() {
    let data = TempDir::new().unwrap();
    for i in 0..8u8 {
        RgbImage::from_pixel(30, 26, Rgb([i * 30, 100, 200 - i * 20]))
            .save(data.path().join(format!("face_{}.jpg", i)))
            .unwrap();
    }

    let out = TempDir::new().unwrap();
    let mut config = tiny_config(LossVariant::WassersteinGp, out.path());
    config.data.data_dir = data.path().to_string_lossy().to_string();
    config.training.epochs = 1;

    let metrics = run(&config).unwrap();
    assert_eq!(metrics.num_steps(), 2);
    assert!(config.metrics_path().exists());
    assert!(config.checkpoint_path().join("model.ckpt-0").exists());
    assert!(config.checkpoint_path().join("checkpoint").exists());
}

#[test]
fn test_run_rejects_unknown_corpus() {
    let out = TempDir::new().unwrap();
    let mut config = tiny_config(LossVariant::Classic, out.path());
    config.data.data_type = 9;
    assert!(matches!(run(&config), Err(Error::UnsupportedCorpus(9))));
}
