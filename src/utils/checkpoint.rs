//! Checkpoint save/restore
//!
//! A checkpoint is one multi-tensor file `model.ckpt-<step>` holding every
//! generator and discriminator variable, plus a JSON pointer file named
//! `checkpoint` that records the most recent save.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tch::Tensor;

use crate::error::Result;
use crate::model::DCGAN;

/// File name prefix of saved snapshots
pub const CHECKPOINT_PREFIX: &str = "model.ckpt";

/// Name of the pointer file
pub const POINTER_FILE: &str = "checkpoint";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// File name of the snapshot, relative to the checkpoint directory
    pub model_checkpoint_path: String,
    /// Step tag (the epoch at which it was saved)
    pub step: usize,
    /// Timestamp of checkpoint
    pub saved_at: String,
}

/// Saves and restores full parameter snapshots in one directory
#[derive(Debug, Clone)]
pub struct CheckpointGateway {
    dir: PathBuf,
}

impl CheckpointGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot both parameter sets under `model.ckpt-<step>`
    ///
    /// Returns the path of the snapshot file.
    pub fn save(&self, model: &DCGAN, step: usize) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let name = checkpoint_name(step);
        let path = self.dir.join(&name);
        Tensor::save_multi(&model.named_parameters(), &path)?;

        let meta = CheckpointMeta {
            model_checkpoint_path: name,
            step,
            saved_at: chrono::Utc::now().to_rfc3339(),
        };
        std::fs::write(self.dir.join(POINTER_FILE), serde_json::to_string_pretty(&meta)?)?;

        tracing::info!("Saved checkpoint to {}", path.display());
        Ok(path)
    }

    /// Load the most recent snapshot into `model`
    ///
    /// Returns `Ok(None)` when the directory holds no checkpoint.
    pub fn restore(&self, model: &mut DCGAN) -> Result<Option<CheckpointMeta>> {
        let meta = match self.latest()? {
            Some(meta) => meta,
            None => return Ok(None),
        };

        let path = self.dir.join(&meta.model_checkpoint_path);
        model.load_parameters(Tensor::load_multi(&path)?)?;

        tracing::info!("Restored checkpoint {} (step {})", path.display(), meta.step);
        Ok(Some(meta))
    }

    /// Most recent checkpoint: the pointer file if it names an existing
    /// snapshot, otherwise the highest-numbered snapshot in the directory
    pub fn latest(&self) -> Result<Option<CheckpointMeta>> {
        let pointer = self.dir.join(POINTER_FILE);
        if pointer.exists() {
            let meta: CheckpointMeta = serde_json::from_str(&std::fs::read_to_string(&pointer)?)?;
            if self.dir.join(&meta.model_checkpoint_path).exists() {
                return Ok(Some(meta));
            }
            tracing::warn!(
                "Checkpoint pointer names missing file {}, scanning directory",
                meta.model_checkpoint_path
            );
        }
        Ok(self.list()?.pop())
    }

    /// All snapshots in the directory, ordered by step
    pub fn list(&self) -> Result<Vec<CheckpointMeta>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(step) = parse_step(&name) {
                let saved_at = entry
                    .metadata()?
                    .modified()
                    .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
                    .unwrap_or_default();
                found.push(CheckpointMeta {
                    model_checkpoint_path: name,
                    step,
                    saved_at,
                });
            }
        }

        found.sort_by_key(|meta| meta.step);
        Ok(found)
    }
}

/// `model.ckpt-<step>`
pub fn checkpoint_name(step: usize) -> String {
    format!("{}-{}", CHECKPOINT_PREFIX, step)
}

fn parse_step(name: &str) -> Option<usize> {
    name.strip_prefix(CHECKPOINT_PREFIX)?
        .strip_prefix('-')?
        .parse()
        .ok()
}
