//! Data module for the face image pipeline
//!
//! This module provides:
//! - Corpus discovery for the hollywood and LFW layouts
//! - Per-image crop/resize/normalize preprocessing
//! - A worker pool feeding a bounded batch queue

mod corpus;
mod loader;
mod preprocessing;

pub use corpus::{batch_count, Corpus};
pub use loader::{batch_to_tensor, BatchSource, ImageBatch, ImageQueue, InMemoryBatches, StopToken};
pub use preprocessing::{center_crop, normalize_pixel, Preprocess};
