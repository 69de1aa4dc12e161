//! Image corpus discovery
//!
//! Two corpora are supported, selected by the `data_type` flag:
//! hollywood faces stored flat in one directory, and LFW with one
//! sub-directory per identity.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Supported face corpora
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corpus {
    /// `data_dir/*.jpg`
    Hollywood,
    /// `data_dir/<identity>/*.jpg`
    Lfw,
}

impl Corpus {
    /// Map the numeric selector (1 = hollywood, 2 = lfw)
    pub fn from_selector(data_type: i64) -> Result<Self> {
        match data_type {
            1 => Ok(Corpus::Hollywood),
            2 => Ok(Corpus::Lfw),
            other => Err(Error::UnsupportedCorpus(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Corpus::Hollywood => "hollywood",
            Corpus::Lfw => "lfw",
        }
    }

    /// List every image file of the corpus under `root`, sorted
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(Error::config(format!(
                "data directory {} does not exist",
                root.display()
            )));
        }

        let mut files = match self {
            Corpus::Hollywood => image_files(root)?,
            Corpus::Lfw => {
                let mut files = Vec::new();
                for entry in std::fs::read_dir(root)? {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        files.extend(image_files(&entry.path())?);
                    }
                }
                files
            }
        };

        if files.is_empty() {
            return Err(Error::config(format!(
                "no {} images found under {}",
                self.name(),
                root.display()
            )));
        }

        files.sort();
        tracing::info!("Found {} {} images in {}", files.len(), self.name(), root.display());
        Ok(files)
    }
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Full batches per epoch: `min(files, train_size) / batch_size`
pub fn batch_count(num_files: usize, train_size: Option<usize>, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    num_files.min(train_size.unwrap_or(usize::MAX)) / batch_size
}
