//! Background image feeding
//!
//! A pool of worker threads decodes random batches of images and pushes them
//! into a bounded queue. The control thread pulls one batch at a time through
//! [`BatchSource`]. Shutdown raises the shared [`StopToken`], drops the queue
//! receiver so that any worker blocked on a full queue wakes up, and joins
//! every worker.

use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tch::{Device, Tensor};

use super::Preprocess;
use crate::error::{Error, Result};

/// Batch of real images, `[batch, height, width, channels]` in `[-1, 1]`
pub type ImageBatch = Array4<f32>;

/// Supplier of real image batches for the training loop
pub trait BatchSource {
    /// Block until the next batch is available
    fn next_batch(&mut self) -> Result<ImageBatch>;

    /// Stop producing and release every resource; later calls are no-ops
    fn shutdown(&mut self) -> Result<()>;
}

/// Copy a host batch into a float tensor on `device`
pub fn batch_to_tensor(batch: &ImageBatch, device: Device) -> Result<Tensor> {
    let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
    let contiguous = batch.as_standard_layout();
    let data = contiguous
        .as_slice()
        .ok_or_else(|| Error::PipelineError("batch is not contiguous".to_string()))?;
    Ok(Tensor::from_slice(data).view(shape.as_slice()).to_device(device))
}

/// Cooperative stop signal shared by the control thread and the workers
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded queue of decoded batches fed by a pool of worker threads
pub struct ImageQueue {
    rx: Option<Receiver<Result<ImageBatch>>>,
    workers: Vec<JoinHandle<()>>,
    stop: StopToken,
}

impl ImageQueue {
    /// Start `num_threads` workers over `files`
    ///
    /// # Arguments
    ///
    /// * `files` - Image files to draw from
    /// * `preprocess` - Per-image preprocessing
    /// * `batch_size` - Images per batch
    /// * `num_threads` - Number of worker threads
    /// * `capacity` - Maximum number of batches waiting in the queue
    /// * `seed` - Base seed; worker `i` shuffles with `seed + i`, or from entropy when `None`
    pub fn spawn(
        files: Vec<PathBuf>,
        preprocess: Preprocess,
        batch_size: usize,
        num_threads: usize,
        capacity: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 || files.len() < batch_size {
            return Err(Error::config(format!(
                "need at least one full batch of {} images, found {}",
                batch_size,
                files.len()
            )));
        }

        let files = Arc::new(files);
        let preprocess = Arc::new(preprocess);
        let stop = StopToken::new();
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));

        let mut workers = Vec::with_capacity(num_threads.max(1));
        for worker in 0..num_threads.max(1) {
            let feeder = Feeder {
                files: Arc::clone(&files),
                preprocess: Arc::clone(&preprocess),
                batch_size,
                stop: stop.clone(),
                tx: tx.clone(),
                rng: worker_rng(seed, worker),
            };
            let handle = thread::Builder::new()
                .name(format!("image-feeder-{}", worker))
                .spawn(move || feeder.run())?;
            workers.push(handle);
        }

        tracing::info!(
            "Started {} image workers (batch {}, queue capacity {})",
            workers.len(),
            batch_size,
            capacity.max(1)
        );

        Ok(Self {
            rx: Some(rx),
            workers,
            stop,
        })
    }

    /// Token observed by the workers
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    fn stop_and_join(&mut self) -> Result<()> {
        self.stop.request_stop();
        self.rx.take();

        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(Error::PipelineError(format!("{} image workers panicked", panicked)));
        }
        Ok(())
    }
}

impl BatchSource for ImageQueue {
    fn next_batch(&mut self) -> Result<ImageBatch> {
        let rx = self.rx.as_ref().ok_or(Error::PipelineClosed)?;
        rx.recv().map_err(|_| Error::PipelineClosed)?
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.rx.is_none() && self.workers.is_empty() {
            return Ok(());
        }
        tracing::debug!("Stopping {} image workers", self.workers.len());
        self.stop_and_join()
    }
}

impl Drop for ImageQueue {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}

/// Shuffling generator for worker `worker`
fn worker_rng(seed: Option<u64>, worker: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
        None => StdRng::from_entropy(),
    }
}

/// State owned by one worker thread
struct Feeder {
    files: Arc<Vec<PathBuf>>,
    preprocess: Arc<Preprocess>,
    batch_size: usize,
    stop: StopToken,
    tx: SyncSender<Result<ImageBatch>>,
    rng: StdRng,
}

impl Feeder {
    fn run(mut self) {
        let mut order: Vec<usize> = (0..self.files.len()).collect();
        let mut cursor = order.len();

        while !self.stop.should_stop() {
            let mut indices = Vec::with_capacity(self.batch_size);
            while indices.len() < self.batch_size {
                if cursor >= order.len() {
                    order.shuffle(&mut self.rng);
                    cursor = 0;
                }
                indices.push(order[cursor]);
                cursor += 1;
            }

            let batch = self.load_batch(&indices);
            let failed = batch.is_err();
            // a send error means the receiver is gone: the run is shutting down
            if self.tx.send(batch).is_err() || failed {
                break;
            }
        }
    }

    fn load_batch(&self, indices: &[usize]) -> Result<ImageBatch> {
        let p = &*self.preprocess;
        let mut batch = Array4::<f32>::zeros((
            indices.len(),
            p.target_height as usize,
            p.target_width as usize,
            p.channels,
        ));
        for (slot, &idx) in indices.iter().enumerate() {
            let path = &self.files[idx];
            let image = p.load(path).map_err(|e| {
                tracing::error!("Failed to load {}: {}", path.display(), e);
                e
            })?;
            batch.index_axis_mut(Axis(0), slot).assign(&image);
        }
        Ok(batch)
    }
}

/// Fixed in-memory batches served in a cycle
///
/// Useful for smoke runs and tests that should not touch the filesystem.
#[derive(Debug, Clone)]
pub struct InMemoryBatches {
    batches: Vec<ImageBatch>,
    next: usize,
    closed: bool,
}

impl InMemoryBatches {
    pub fn new(batches: Vec<ImageBatch>) -> Self {
        Self {
            batches,
            next: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl BatchSource for InMemoryBatches {
    fn next_batch(&mut self) -> Result<ImageBatch> {
        if self.closed || self.batches.is_empty() {
            return Err(Error::PipelineClosed);
        }
        let batch = self.batches[self.next % self.batches.len()].clone();
        self.next += 1;
        Ok(batch)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn write_images(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("face_{:03}.png", i));
                RgbImage::from_pixel(6, 6, Rgb([i as u8 * 20, 0, 255]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect()
    }

    fn preprocess() -> Preprocess {
        Preprocess {
            source_height: 4,
            source_width: 4,
            channels: 3,
            target_height: 4,
            target_width: 4,
            crop: true,
        }
    }

    #[test]
    fn test_queue_produces_batches() {
        let dir = TempDir::new().unwrap();
        let files = write_images(&dir, 5);

        let mut queue = ImageQueue::spawn(files, preprocess(), 3, 2, 2, Some(7)).unwrap();
        for _ in 0..4 {
            let batch = queue.next_batch().unwrap();
            assert_eq!(batch.shape(), &[3, 4, 4, 3]);
            assert!(batch.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
        queue.shutdown().unwrap();
        assert!(matches!(queue.next_batch(), Err(Error::PipelineClosed)));
    }

    #[test]
    fn test_shutdown_with_full_queue_is_prompt() {
        let dir = TempDir::new().unwrap();
        let files = write_images(&dir, 4);

        let mut queue = ImageQueue::spawn(files, preprocess(), 2, 4, 1, Some(0)).unwrap();
        let token = queue.stop_token();
        // let the workers fill the queue and block
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        queue.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(token.should_stop());
        assert!(queue.shutdown().is_ok());
    }

    #[test]
    fn test_decode_failure_surfaces_on_consumer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let mut queue = ImageQueue::spawn(vec![path], preprocess(), 1, 1, 1, None).unwrap();
        assert!(matches!(queue.next_batch(), Err(Error::ImageError(_))));
    }

    #[test]
    fn test_worker_shuffle_seeding() {
        use rand::Rng;
        let draw = |seed: Option<u64>, worker: usize| -> Vec<u64> {
            let mut rng = worker_rng(seed, worker);
            (0..4).map(|_| rng.gen()).collect()
        };

        assert_eq!(draw(Some(11), 0), draw(Some(11), 0));
        assert_ne!(draw(Some(11), 0), draw(Some(11), 1));
        assert_ne!(draw(None, 0), draw(None, 0));
    }

    #[test]
    fn test_not_enough_files() {
        let dir = TempDir::new().unwrap();
        let files = write_images(&dir, 2);
        assert!(ImageQueue::spawn(files, preprocess(), 3, 1, 1, None).is_err());
    }

    #[test]
    fn test_batch_to_tensor() {
        let mut batch = ImageBatch::zeros((2, 3, 4, 1));
        batch[[1, 2, 3, 0]] = 0.5;

        let tensor = batch_to_tensor(&batch, Device::Cpu).unwrap();
        assert_eq!(tensor.size(), vec![2, 3, 4, 1]);
        assert_eq!(tensor.double_value(&[1, 2, 3, 0]), 0.5);
    }

    #[test]
    fn test_in_memory_batches_cycle() {
        let a = ImageBatch::zeros((1, 1, 1, 1));
        let b = ImageBatch::ones((1, 1, 1, 1));
        let mut source = InMemoryBatches::new(vec![a, b]);

        assert_eq!(source.next_batch().unwrap()[[0, 0, 0, 0]], 0.0);
        assert_eq!(source.next_batch().unwrap()[[0, 0, 0, 0]], 1.0);
        assert_eq!(source.next_batch().unwrap()[[0, 0, 0, 0]], 0.0);

        source.shutdown().unwrap();
        assert!(source.is_closed());
        assert!(source.next_batch().is_err());
    }
}
