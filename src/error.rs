//! Error types for the wface GAN trainer

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Corpus selector outside the supported set
    #[error("Unsupported corpus selector {0} (expected 1 = hollywood, 2 = lfw)")]
    UnsupportedCorpus(i64),

    /// Real and latent batches disagree on the number of examples
    #[error("Batch shape mismatch: real batch has {real} examples, latent batch has {latent}")]
    ShapeMismatch { real: i64, latent: i64 },

    /// A reported loss became NaN or infinite
    #[error("Non-finite loss at epoch {epoch}, step {step} (counter {counter}): {losses}")]
    Divergence {
        epoch: usize,
        step: usize,
        counter: usize,
        losses: String,
    },

    /// Checkpoint file is malformed or does not match the model
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// Every data worker has gone away
    #[error("Image pipeline closed")]
    PipelineClosed,

    /// A data worker failed outside of image decoding
    #[error("Image pipeline error: {0}")]
    PipelineError(String),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    /// libtorch error
    #[error("Torch error: {0}")]
    TorchError(#[from] tch::TchError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    /// TOML write error
    #[error("TOML write error: {0}")]
    TomlWriteError(#[from] toml::ser::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl Error {
    /// Build a configuration error from anything printable
    pub fn config(msg: impl Into<String>) -> Self {
        Error::ConfigError(msg.into())
    }

    /// Whether the error is a training divergence rather than an environment failure
    pub fn is_divergence(&self) -> bool {
        matches!(self, Error::Divergence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnsupportedCorpus(7);
        assert!(err.to_string().contains('7'));

        let err = Error::ShapeMismatch { real: 64, latent: 32 };
        assert_eq!(
            err.to_string(),
            "Batch shape mismatch: real batch has 64 examples, latent batch has 32"
        );
    }

    #[test]
    fn test_divergence_flag() {
        let err = Error::Divergence {
            epoch: 1,
            step: 2,
            counter: 3,
            losses: "d_loss=NaN".to_string(),
        };
        assert!(err.is_divergence());
        assert!(!Error::config("bad").is_divergence());
    }
}
