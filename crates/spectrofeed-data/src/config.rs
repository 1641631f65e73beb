// BatchConfig: constructor configuration for a BatchDataset

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use spectrofeed_core::{Error, Result};

use crate::stats::Estimator;

/// Configuration for a [`BatchDataset`](crate::BatchDataset).
///
/// Deserializes from JSON with every field optional:
///
/// ```json
/// { "batch_size": 32, "dim": [40, 500], "shuffle": false, "seed": 7 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Number of samples per batch.
    pub batch_size: usize,
    /// `(F, T_max)`: feature rows, and the frame count every batch is cut/padded to.
    pub dim: (usize, usize),
    /// Trailing channel axis of the feature tensor; each channel holds a copy of the matrix.
    pub n_channels: usize,
    /// Whether to reshuffle record order at construction and at every epoch end.
    pub shuffle: bool,
    /// Optional random seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Accumulation strategy for `compute_norm`.
    pub estimator: Estimator,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            dim: (40, 500),
            n_channels: 1,
            shuffle: true,
            seed: None,
            estimator: Estimator::TwoMoment,
        }
    }
}

impl BatchConfig {
    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    pub fn dim(mut self, rows: usize, max_frames: usize) -> Self {
        self.dim = (rows, max_frames);
        self
    }

    pub fn n_channels(mut self, n: usize) -> Self {
        self.n_channels = n;
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = s;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }

    pub fn estimator(mut self, e: Estimator) -> Self {
        self.estimator = e;
        self
    }

    /// Feature rows (F).
    pub fn rows(&self) -> usize {
        self.dim.0
    }

    /// Frames per batch slot (T_max).
    pub fn max_frames(&self) -> usize {
        self.dim.1
    }

    /// Reject sizes that would produce empty batches.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.dim.0 == 0 || self.dim.1 == 0 {
            return Err(Error::InvalidConfig(format!(
                "dim must be non-zero, got {:?}",
                self.dim
            )));
        }
        if self.n_channels == 0 {
            return Err(Error::InvalidConfig("n_channels must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }
}
